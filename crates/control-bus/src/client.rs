//! Client-side link to a bus server.

use crate::event::SharedEvent;
use dashmap::DashSet;
use parking_lot::Mutex;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::mpsc;

/// Outbound queue, the not-yet-started read half, and the set of kinds
/// already subscribed on the server.
pub(crate) struct ClientLink {
    outbound: Mutex<Option<mpsc::UnboundedSender<SharedEvent>>>,
    reader: Mutex<Option<OwnedReadHalf>>,
    subscriptions: DashSet<String>,
}

impl ClientLink {
    pub(crate) fn new() -> Self {
        Self {
            outbound: Mutex::new(None),
            reader: Mutex::new(None),
            subscriptions: DashSet::new(),
        }
    }

    pub(crate) fn connect(&self, outbound: mpsc::UnboundedSender<SharedEvent>, reader: OwnedReadHalf) {
        *self.outbound.lock() = Some(outbound);
        *self.reader.lock() = Some(reader);
    }

    /// Queue an event for the writer. Hands the event back if there is none.
    pub(crate) fn enqueue(&self, event: SharedEvent) -> Result<(), SharedEvent> {
        match self.outbound.lock().as_ref() {
            Some(tx) => tx.send(event).map_err(|e| e.0),
            None => Err(event),
        }
    }

    #[cfg(test)]
    pub(crate) fn is_connected(&self) -> bool {
        self.outbound
            .lock()
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Record a subscription; `false` if the kind was already subscribed.
    pub(crate) fn subscribe(&self, kind: &str) -> bool {
        self.subscriptions.insert(kind.to_string())
    }

    pub(crate) fn unsubscribe(&self, kind: &str) {
        self.subscriptions.remove(kind);
    }

    #[cfg(test)]
    pub(crate) fn is_subscribed(&self, kind: &str) -> bool {
        self.subscriptions.contains(kind)
    }

    /// The read half, once. The first caller starts the reader task.
    pub(crate) fn take_reader(&self) -> Option<OwnedReadHalf> {
        self.reader.lock().take()
    }

    /// Drop the outbound queue so later sends fall back to local dispatch.
    pub(crate) fn disconnect(&self) {
        self.outbound.lock().take();
    }

    pub(crate) fn reset(&self) {
        self.disconnect();
        self.reader.lock().take();
        self.subscriptions.clear();
    }
}
