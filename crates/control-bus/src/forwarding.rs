//! # Server-to-Client Forwarding
//!
//! A client that registers a handler for a non-local kind sends one
//! [`ForwardRequest`] naming itself and the kind. The server's control
//! handler installs a [`ForwardingHandler`] for exactly that
//! `(client, kind)` pair, which replicates every locally dispatched event of
//! the kind onto the client's connection.
//!
//! ```text
//!  client                        server
//!  register(Ping handler)
//!    └─ ForwardRequest{id, "Ping"} ──►  ForwardRequestHandler
//!                                         └─ install ForwardingHandler(id, "Ping")
//!                                  send(Ping) ─► dispatch
//!    ◄──────────── Ping frame ─────────────── ForwardingHandler::consume
//! ```

use crate::connection::ClientConnection;
use crate::event::{EventDescriptor, SharedEvent, ROOT_EVENT};
use crate::handler::EventHandler;
use crate::ids::ManagerId;
use crate::impl_event;
use crate::manager::Shared;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};

pub static FORWARD_REQUEST: EventDescriptor = EventDescriptor::new("ForwardRequest", &[&ROOT_EVENT]);

/// Control event: `client_id` wants server-originated events of `kind`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardRequest {
    pub client_id: ManagerId,
    pub kind: String,
}

impl ForwardRequest {
    pub fn new(client_id: ManagerId, kind: impl Into<String>) -> Self {
        Self {
            client_id,
            kind: kind.into(),
        }
    }
}

impl_event!(ForwardRequest, FORWARD_REQUEST);

/// Server-side handler that installs forwarders on request.
pub(crate) struct ForwardRequestHandler {
    bus: Weak<Shared>,
}

impl ForwardRequestHandler {
    pub(crate) fn new(bus: Weak<Shared>) -> Self {
        Self { bus }
    }
}

impl EventHandler for ForwardRequestHandler {
    fn kind(&self) -> &str {
        FORWARD_REQUEST.name()
    }

    fn local_only(&self) -> bool {
        true
    }

    fn consume(&self, event: &SharedEvent) -> bool {
        if let (Some(request), Some(bus)) =
            (event.downcast_ref::<ForwardRequest>(), self.bus.upgrade())
        {
            bus.install_forwarder(request.client_id, &request.kind);
        }
        true
    }

    fn handle(&self, _event: SharedEvent) {}
}

/// Replicates dispatched events of one kind onto one client's connection.
pub(crate) struct ForwardingHandler {
    kind: String,
    connection: Arc<ClientConnection>,
    bus: Weak<Shared>,
}

impl ForwardingHandler {
    pub(crate) fn new(kind: &str, connection: Arc<ClientConnection>, bus: Weak<Shared>) -> Self {
        Self {
            kind: kind.to_string(),
            connection,
            bus,
        }
    }
}

impl EventHandler for ForwardingHandler {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn consume(&self, event: &SharedEvent) -> bool {
        if event.is_local_only() {
            return true;
        }
        if self.connection.is_closed() {
            if let Some(bus) = self.bus.upgrade() {
                let this: *const Self = self;
                bus.retire_closed_forwarder(self.connection.client_id(), &self.kind, this.cast());
            }
            return true;
        }
        // Responses only go to the client they answer.
        if let Some(address) = event.response_address() {
            if address.receiver_id != self.connection.client_id() {
                return true;
            }
        }
        if let Some(bus) = self.bus.upgrade() {
            bus.deliver_to(&self.connection, Arc::clone(event));
        }
        true
    }

    fn handle(&self, _event: SharedEvent) {}
}
