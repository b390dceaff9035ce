//! # Control Bus - Typed Event Bus for the Control Plane
//!
//! Lets independently deployed components publish and subscribe to typed
//! events without referencing each other. The same bus runs in-process, as a
//! TCP server, or as a client of such a server, and falls back to local
//! dispatch when the server cannot be reached.
//!
//! ## Topology
//!
//! ```text
//!  ┌────────────┐  send   ┌────────────┐  dispatch  ┌──────────────┐
//!  │ client bus │ ──────► │ server bus │ ─────────► │ local handler│
//!  └────────────┘  frame  └────────────┘            └──────────────┘
//!        ▲                      │
//!        │  forwarded frame     │ ForwardingHandler (client, kind)
//!        └──────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! static PING: EventDescriptor = EventDescriptor::new("Ping", &[&ROOT_EVENT]);
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct Ping { payload: String }
//! impl_event!(Ping, PING);
//!
//! let bus = EventManager::new(BusConfig::from_env());
//! bus.register_wire_type::<Ping>();
//! bus.start(StartMode::Server).await?;
//! bus.on::<Ping, _>(|ping| println!("{}", ping.payload));
//! ```

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod correlation;
pub mod error;
pub mod event;
pub mod forwarding;
pub mod handler;
pub mod ids;
pub mod manager;
mod pool;
mod registry;
mod suppression;
pub mod timer;
mod transport;

// Re-export main types
pub use codec::{CodecError, CodecRegistry, Frame, WIRE_VERSION};
pub use config::BusConfig;
pub use connection::ClientConnection;
pub use correlation::{BusCorrelation, BusResponseStore};
pub use error::BusError;
pub use event::{
    downcast, Event, EventDescriptor, EventType, ResponseAddress, ReturnAddress, SharedEvent,
    WireEvent, ROOT_EVENT,
};
pub use forwarding::{ForwardRequest, FORWARD_REQUEST};
pub use handler::{EventHandler, FnHandler, TypedHandler};
pub use ids::{ManagerId, MessageId};
pub use manager::{EventManager, Mode, StartMode};
pub use response_store::{CorrelationStrategy, ResponseStore, StoreError};
pub use timer::{TimerEvent, TIMER_EVENT};
