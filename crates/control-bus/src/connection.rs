//! Server-held handle for one connected client.

use crate::event::SharedEvent;
use crate::ids::ManagerId;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::mpsc;

enum OutputStream {
    /// Write half not yet handed to a writer task.
    Pending(OwnedWriteHalf),
    /// Writer task running; events are queued to it.
    Open(mpsc::UnboundedSender<SharedEvent>),
    Closed,
}

/// One physical connection accepted by a server bus.
///
/// The output stream is opened lazily on the first delivery and shared by
/// every forwarder targeting this client. Deliveries are serialized through
/// one queue so frames from concurrent forwarders never interleave.
pub struct ClientConnection {
    client_id: ManagerId,
    peer: SocketAddr,
    output: Mutex<OutputStream>,
    closed: AtomicBool,
}

impl ClientConnection {
    pub(crate) fn new(client_id: ManagerId, peer: SocketAddr, write_half: OwnedWriteHalf) -> Self {
        Self {
            client_id,
            peer,
            output: Mutex::new(OutputStream::Pending(write_half)),
            closed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn client_id(&self) -> ManagerId {
        self.client_id
    }

    #[must_use]
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Whether a writer task has been started.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(*self.output.lock(), OutputStream::Open(_))
    }

    /// Queue an event for this client.
    ///
    /// On first use `open` receives the write half and the queue receiver and
    /// must start the single writer task. Returns `false` if the connection
    /// is closed or its writer has gone away.
    pub(crate) fn deliver<F>(&self, event: SharedEvent, open: F) -> bool
    where
        F: FnOnce(OwnedWriteHalf, mpsc::UnboundedReceiver<SharedEvent>),
    {
        if self.is_closed() {
            return false;
        }

        let mut output = self.output.lock();
        if let OutputStream::Pending(_) = *output {
            let OutputStream::Pending(write_half) =
                std::mem::replace(&mut *output, OutputStream::Closed)
            else {
                return false;
            };
            let (tx, rx) = mpsc::unbounded_channel();
            open(write_half, rx);
            *output = OutputStream::Open(tx);
        }

        match &*output {
            OutputStream::Open(tx) => tx.send(event).is_ok(),
            OutputStream::Pending(_) | OutputStream::Closed => false,
        }
    }

    /// Mark closed and drop the output stream, ending the writer task.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        *self.output.lock() = OutputStream::Closed;
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("client_id", &self.client_id)
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::TimerEvent;
    use std::sync::Arc;
    use tokio::net::{TcpListener, TcpStream};

    async fn connection() -> (ClientConnection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (accepted, peer) = listener.accept().await.unwrap();
        let (_read, write) = accepted.into_split();
        (ClientConnection::new(ManagerId::new(), peer, write), client)
    }

    #[tokio::test]
    async fn test_writer_opened_once() {
        let (conn, _client) = connection().await;
        let mut opened = 0;
        let mut receivers = Vec::new();

        for _ in 0..3 {
            assert!(conn.deliver(Arc::new(TimerEvent::INSTANCE), |_, rx| {
                opened += 1;
                receivers.push(rx);
            }));
        }

        assert_eq!(opened, 1);
        assert!(conn.is_open());
        let mut rx = receivers.pop().unwrap();
        for _ in 0..3 {
            assert!(rx.try_recv().is_ok());
        }
    }

    #[tokio::test]
    async fn test_closed_connection_rejects_delivery() {
        let (conn, _client) = connection().await;
        conn.close();

        assert!(conn.is_closed());
        assert!(!conn.deliver(Arc::new(TimerEvent::INSTANCE), |_, _| {
            panic!("closed connection must not open a writer");
        }));
    }

    #[tokio::test]
    async fn test_dead_writer_fails_delivery() {
        let (conn, _client) = connection().await;
        assert!(!conn.deliver(Arc::new(TimerEvent::INSTANCE), |_, rx| drop(rx)));
        assert!(conn.is_open());
        assert!(!conn.deliver(Arc::new(TimerEvent::INSTANCE), |_, _| {
            panic!("writer is only opened once");
        }));
    }
}
