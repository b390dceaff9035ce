//! # Event Model
//!
//! Events are immutable values behind `Arc<dyn Event>`. Each concrete type
//! points at a static [`EventDescriptor`] that names its kind and its parent
//! kinds. Parents may be concrete kinds or abstract ones that no struct
//! implements directly, which is how a handler subscribes to a whole family
//! of events.
//!
//! ```text
//!               Event (root)
//!              /           \
//!        Monitoring       Control
//!         /      \            \
//!   LoadSample  Alert  ForwardRequest
//! ```
//!
//! Facets are optional trait methods rather than struct fields:
//!
//! - **channel**: sub-filter among handlers of the same kind
//! - **local-only**: declared on the descriptor, never written to a socket
//! - **returnable**: carries a [`ReturnAddress`] stamped by the bus
//! - **response**: carries a [`ResponseAddress`] naming the request it answers

use crate::codec::CodecError;
use crate::ids::{ManagerId, MessageId};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Shared handle to a dispatched event.
pub type SharedEvent = Arc<dyn Event>;

/// Static description of an event kind.
#[derive(Debug)]
pub struct EventDescriptor {
    name: &'static str,
    parents: &'static [&'static EventDescriptor],
    local_only: bool,
}

/// Root of every kind hierarchy. Handlers for it see every event.
pub static ROOT_EVENT: EventDescriptor = EventDescriptor::new("Event", &[]);

impl EventDescriptor {
    /// Describe a kind that may cross the wire.
    #[must_use]
    pub const fn new(name: &'static str, parents: &'static [&'static EventDescriptor]) -> Self {
        Self {
            name,
            parents,
            local_only: false,
        }
    }

    /// Describe a kind that is only ever dispatched in-process.
    #[must_use]
    pub const fn local(name: &'static str, parents: &'static [&'static EventDescriptor]) -> Self {
        Self {
            name,
            parents,
            local_only: true,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn parents(&self) -> &'static [&'static EventDescriptor] {
        self.parents
    }

    #[must_use]
    pub fn is_local_only(&self) -> bool {
        self.local_only
    }

    /// Names of this kind and every ancestor kind, breadth first.
    ///
    /// The list starts with this kind, contains each name once and always
    /// ends with the root kind.
    #[must_use]
    pub fn ancestors(&'static self) -> Vec<&'static str> {
        let mut seen = HashSet::new();
        let mut order = Vec::new();
        let mut queue = std::collections::VecDeque::from([self]);

        while let Some(descriptor) = queue.pop_front() {
            if descriptor.name == ROOT_EVENT.name || !seen.insert(descriptor.name) {
                continue;
            }
            order.push(descriptor.name);
            queue.extend(descriptor.parents.iter().copied());
        }

        order.push(ROOT_EVENT.name);
        order
    }

    /// Whether `other` is this kind or one of its ancestors.
    #[must_use]
    pub fn is_a(&'static self, other: &EventDescriptor) -> bool {
        self.ancestors().contains(&other.name)
    }
}

impl fmt::Display for EventDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Sender identity and message id of a returnable event.
///
/// Both fields are overwritten by the bus on every send.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnAddress {
    pub sender_id: Option<ManagerId>,
    pub message_id: Option<MessageId>,
}

impl ReturnAddress {
    /// Address stamped by a bus.
    #[must_use]
    pub fn stamped(sender_id: ManagerId, message_id: MessageId) -> Self {
        Self {
            sender_id: Some(sender_id),
            message_id: Some(message_id),
        }
    }
}

/// Which returnable event a response answers, and who receives it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseAddress {
    pub receiver_id: ManagerId,
    pub message_id: MessageId,
}

impl ResponseAddress {
    /// Address a reply to the sender of a returnable event.
    ///
    /// Returns `None` if the request was never stamped by a bus.
    #[must_use]
    pub fn reply_to(request: &ReturnAddress) -> Option<Self> {
        Some(Self {
            receiver_id: request.sender_id?,
            message_id: request.message_id?,
        })
    }
}

/// A unit of communication on the bus.
///
/// Implement it with [`impl_event!`](crate::impl_event) or
/// [`impl_local_event!`](crate::impl_local_event) rather than by hand.
pub trait Event: Send + Sync + fmt::Debug + 'static {
    /// Kind of this event.
    fn descriptor(&self) -> &'static EventDescriptor;

    /// Optional channel used to sub-filter handlers of the same kind.
    fn channel(&self) -> Option<&str> {
        None
    }

    /// Return address, present on returnable events.
    fn return_address(&self) -> Option<&ReturnAddress> {
        None
    }

    /// Mutable return address, used by the bus to stamp it.
    fn return_address_mut(&mut self) -> Option<&mut ReturnAddress> {
        None
    }

    /// Response address, present on responses.
    fn response_address(&self) -> Option<&ResponseAddress> {
        None
    }

    /// Payload bytes for the wire. Local-only kinds fail.
    fn encode(&self) -> Result<Vec<u8>, CodecError>;

    fn as_any(&self) -> &dyn Any;

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl dyn Event {
    /// Narrow to a concrete event type.
    pub fn downcast_ref<T: Event>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn is<T: Event>(&self) -> bool {
        self.as_any().is::<T>()
    }

    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        self.descriptor().name()
    }

    #[must_use]
    pub fn is_local_only(&self) -> bool {
        self.descriptor().is_local_only()
    }
}

/// Narrow a shared event to an owned handle of its concrete type.
pub fn downcast<T: Event>(event: SharedEvent) -> Option<Arc<T>> {
    event.into_any().downcast::<T>().ok()
}

/// Concrete event types with a statically known kind.
pub trait EventType: Event + Sized {
    fn kind() -> &'static EventDescriptor;
}

/// Event types that can be decoded from the wire.
pub trait WireEvent: EventType + Serialize + for<'de> Deserialize<'de> {}

impl<T> WireEvent for T where T: EventType + Serialize + for<'de> Deserialize<'de> {}

/// Implement [`Event`] and [`EventType`] for a serializable struct.
///
/// Facet methods go in the optional trailing block:
///
/// ```rust,ignore
/// static PING: EventDescriptor = EventDescriptor::new("Ping", &[&ROOT_EVENT]);
///
/// #[derive(Debug, Serialize, Deserialize)]
/// struct Ping { origin: ReturnAddress, payload: String }
///
/// impl_event!(Ping, PING, {
///     fn return_address(&self) -> Option<&ReturnAddress> { Some(&self.origin) }
///     fn return_address_mut(&mut self) -> Option<&mut ReturnAddress> { Some(&mut self.origin) }
/// });
/// ```
#[macro_export]
macro_rules! impl_event {
    ($ty:ty, $descriptor:path) => {
        $crate::impl_event!($ty, $descriptor, {});
    };
    ($ty:ty, $descriptor:path, { $($facets:tt)* }) => {
        impl $crate::Event for $ty {
            fn descriptor(&self) -> &'static $crate::EventDescriptor {
                &$descriptor
            }

            fn encode(&self) -> ::std::result::Result<::std::vec::Vec<u8>, $crate::CodecError> {
                $crate::codec::encode_payload(self)
            }

            fn as_any(&self) -> &dyn ::std::any::Any {
                self
            }

            fn into_any(
                self: ::std::sync::Arc<Self>,
            ) -> ::std::sync::Arc<dyn ::std::any::Any + ::std::marker::Send + ::std::marker::Sync> {
                self
            }

            $($facets)*
        }

        impl $crate::EventType for $ty {
            fn kind() -> &'static $crate::EventDescriptor {
                &$descriptor
            }
        }
    };
}

/// Implement [`Event`] and [`EventType`] for a kind that never crosses the
/// wire. The descriptor should be declared with [`EventDescriptor::local`].
#[macro_export]
macro_rules! impl_local_event {
    ($ty:ty, $descriptor:path) => {
        $crate::impl_local_event!($ty, $descriptor, {});
    };
    ($ty:ty, $descriptor:path, { $($facets:tt)* }) => {
        impl $crate::Event for $ty {
            fn descriptor(&self) -> &'static $crate::EventDescriptor {
                &$descriptor
            }

            fn encode(&self) -> ::std::result::Result<::std::vec::Vec<u8>, $crate::CodecError> {
                ::std::result::Result::Err($crate::CodecError::LocalOnly($descriptor.name()))
            }

            fn as_any(&self) -> &dyn ::std::any::Any {
                self
            }

            fn into_any(
                self: ::std::sync::Arc<Self>,
            ) -> ::std::sync::Arc<dyn ::std::any::Any + ::std::marker::Send + ::std::marker::Sync> {
                self
            }

            $($facets)*
        }

        impl $crate::EventType for $ty {
            fn kind() -> &'static $crate::EventDescriptor {
                &$descriptor
            }
        }
    };
}
