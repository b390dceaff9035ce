//! Shared fixtures: wire events, bus configs and polling helpers.

use control_bus::{
    impl_event, BusConfig, EventDescriptor, EventHandler, EventManager, ResponseAddress,
    ReturnAddress, SharedEvent, StartMode, ROOT_EVENT,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// EVENTS
// =============================================================================

pub static PROBE: EventDescriptor = EventDescriptor::new("Probe", &[&ROOT_EVENT]);
pub static PING: EventDescriptor = EventDescriptor::new("Ping", &[&PROBE]);
pub static PONG: EventDescriptor = EventDescriptor::new("Pong", &[&PROBE]);
pub static STATUS_QUERY: EventDescriptor = EventDescriptor::new("StatusQuery", &[&ROOT_EVENT]);
pub static STATUS_REPLY: EventDescriptor = EventDescriptor::new("StatusReply", &[&ROOT_EVENT]);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    pub payload: String,
    pub seq: u64,
}

impl Ping {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            seq: 0,
        }
    }
}

impl_event!(Ping, PING);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pong {
    pub payload: String,
}

impl_event!(Pong, PONG);

/// Returnable query for a component's status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusQuery {
    pub origin: ReturnAddress,
    pub component: String,
}

impl StatusQuery {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            origin: ReturnAddress::default(),
            component: component.into(),
        }
    }
}

impl_event!(StatusQuery, STATUS_QUERY, {
    fn return_address(&self) -> Option<&ReturnAddress> {
        Some(&self.origin)
    }
    fn return_address_mut(&mut self) -> Option<&mut ReturnAddress> {
        Some(&mut self.origin)
    }
});

/// Answer to a [`StatusQuery`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReply {
    pub address: ResponseAddress,
    pub healthy: bool,
}

impl_event!(StatusReply, STATUS_REPLY, {
    fn response_address(&self) -> Option<&ResponseAddress> {
        Some(&self.address)
    }
});

/// Make every fixture event decodable on `bus`.
pub fn register_fixtures(bus: &EventManager) {
    bus.register_wire_type::<Ping>();
    bus.register_wire_type::<Pong>();
    bus.register_wire_type::<StatusQuery>();
    bus.register_wire_type::<StatusReply>();
}

// =============================================================================
// BUSES
// =============================================================================

pub fn test_config(port: u16) -> BusConfig {
    BusConfig {
        host: "127.0.0.1".to_string(),
        port,
        socket_timeout: Duration::from_millis(500),
        poll_interval: Duration::from_millis(10),
        connect_timeout: Duration::from_secs(1),
        ..BusConfig::default()
    }
}

/// Server on an ephemeral port. Returns the bus and its port.
pub async fn start_server() -> (EventManager, u16) {
    let server = EventManager::new(test_config(0));
    register_fixtures(&server);
    server
        .start(StartMode::Server)
        .await
        .expect("server should start");
    let port = server.local_addr().expect("server is bound").port();
    (server, port)
}

/// Client connected to the server on `port`.
pub async fn start_client(port: u16) -> EventManager {
    let client = EventManager::new(test_config(port));
    register_fixtures(&client);
    client
        .start(StartMode::Client {
            fallback_to_local: false,
        })
        .await
        .expect("client should connect");
    client
}

/// A port nothing listens on.
pub fn unused_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind probe");
    let port = listener.local_addr().expect("probe addr").port();
    drop(listener);
    port
}

// =============================================================================
// OBSERVERS
// =============================================================================

/// Thread-safe list of received values.
pub struct Collector<T> {
    items: Arc<Mutex<Vec<T>>>,
}

impl<T: Clone + Send + 'static> Collector<T> {
    pub fn new() -> Self {
        Self {
            items: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Closure pushing into this collector.
    pub fn sink<E>(&self, map: impl Fn(&E) -> T + Send + Sync + 'static) -> impl Fn(Arc<E>) + Send + Sync + 'static
    where
        E: Send + Sync + 'static,
    {
        let items = Arc::clone(&self.items);
        move |event: Arc<E>| items.lock().push(map(&*event))
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn snapshot(&self) -> Vec<T> {
        self.items.lock().clone()
    }
}

impl<T: Clone + Send + 'static> Default for Collector<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handler that counts events of a kind without asking the server to
/// forward them.
pub struct LocalObserver {
    kind: &'static str,
    seen: Arc<Mutex<usize>>,
}

impl LocalObserver {
    pub fn new(descriptor: &'static EventDescriptor) -> (Arc<Self>, Arc<Mutex<usize>>) {
        let seen = Arc::new(Mutex::new(0));
        let observer = Arc::new(Self {
            kind: descriptor.name(),
            seen: Arc::clone(&seen),
        });
        (observer, seen)
    }
}

impl EventHandler for LocalObserver {
    fn kind(&self) -> &str {
        self.kind
    }

    fn local_only(&self) -> bool {
        true
    }

    fn consume(&self, _event: &SharedEvent) -> bool {
        *self.seen.lock() += 1;
        true
    }

    fn handle(&self, _event: SharedEvent) {}
}

/// Poll `condition` until it holds or `deadline` passes.
pub async fn eventually(deadline: Duration, condition: impl Fn() -> bool) -> bool {
    let started = tokio::time::Instant::now();
    loop {
        if condition() {
            return true;
        }
        if started.elapsed() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Default bound for cross-bus waits.
pub const WAIT: Duration = Duration::from_secs(5);
