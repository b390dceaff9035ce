//! # Event Manager
//!
//! The bus instance: handler registry, dispatch, lifecycle and the network
//! plumbing for server and client modes.
//!
//! ## Modes
//!
//! | Mode | Sockets | `send` of a non-local event |
//! |------|---------|-----------------------------|
//! | Local | none | dispatched in-process |
//! | Server | listener + one reader per client | dispatched in-process, forwarded to subscribed clients |
//! | Client | one connection to the server | queued for the server |
//!
//! A bus that was never started bootstraps itself in local mode on the first
//! `send`. A client whose connection dies keeps working as a local bus.
//!
//! ## Dispatch
//!
//! Every handler registered on the event's kind or one of its ancestors, and
//! whose channel filter matches, is first offered the event through
//! `consume` on the sending thread. Handlers that decline run `handle` on the
//! dispatch pool.

use crate::client::ClientLink;
use crate::codec::{CodecRegistry, FrameWriter};
use crate::config::BusConfig;
use crate::connection::ClientConnection;
use crate::error::BusError;
use crate::event::{Event, EventDescriptor, EventType, ReturnAddress, SharedEvent, WireEvent};
use crate::forwarding::{ForwardRequest, ForwardRequestHandler, ForwardingHandler};
use crate::handler::{channel_matches, same_handler, EventHandler, FnHandler, TypedHandler};
use crate::ids::{ManagerId, MessageId};
use crate::pool::DispatchPool;
use crate::registry::HandlerRegistry;
use crate::suppression::LogSuppression;
use crate::timer::{Timer, TimerEvent};
use crate::transport::{self, TransportSettings};
use bus_telemetry::{
    BUS_CONNECTIONS_ACTIVE, BUS_EVENTS_DISPATCHED, BUS_EVENTS_SENT, BUS_HANDLER_PANICS,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Operating mode of a running bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Local,
    Server,
    Client,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Server => write!(f, "server"),
            Self::Client => write!(f, "client"),
        }
    }
}

/// How to start a bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    Local,
    Server,
    /// Connect to the configured server. With `fallback_to_local` a failed
    /// connect starts a local bus instead of returning the error.
    Client { fallback_to_local: bool },
}

/// State shared by the manager handle and its worker tasks.
///
/// Workers hold a `Weak` reference so dropping the last manager handle
/// shuts everything down.
pub(crate) struct Shared {
    id: ManagerId,
    config: BusConfig,
    registry: HandlerRegistry,
    codecs: Arc<CodecRegistry>,
    logging: LogSuppression,
    pool: DispatchPool,
    timer: Timer,

    mode: RwLock<Option<Mode>>,
    /// Set while `stop` tears down; the bus cannot be reopened until the
    /// pool is closed.
    stopping: AtomicBool,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,

    // Server side
    connections: DashMap<ManagerId, Arc<ClientConnection>>,
    forwarders: DashMap<(ManagerId, String), Arc<dyn EventHandler>>,
    control_handler: Mutex<Option<Arc<dyn EventHandler>>>,

    // Client side
    client: ClientLink,
}

impl Shared {
    fn new(config: BusConfig) -> Self {
        Self {
            id: ManagerId::new(),
            registry: HandlerRegistry::new(),
            codecs: Arc::new(CodecRegistry::new()),
            logging: LogSuppression::new(config.suppressed_logging.iter().cloned()),
            pool: DispatchPool::new(config.dispatch_threads),
            timer: Timer::new(),
            mode: RwLock::new(None),
            stopping: AtomicBool::new(false),
            shutdown: Mutex::new(None),
            workers: Mutex::new(Vec::new()),
            local_addr: Mutex::new(None),
            connections: DashMap::new(),
            forwarders: DashMap::new(),
            control_handler: Mutex::new(None),
            client: ClientLink::new(),
            config,
        }
    }

    fn mode(&self) -> Option<Mode> {
        *self.mode.read()
    }

    fn settings(&self) -> TransportSettings {
        TransportSettings {
            socket_timeout: self.config.socket_timeout,
            poll_interval: self.config.poll_interval,
            max_frame_len: self.config.max_frame_len,
        }
    }

    fn shutdown_receiver(&self) -> Option<watch::Receiver<bool>> {
        self.shutdown.lock().as_ref().map(watch::Sender::subscribe)
    }

    /// Spawn a worker on the pool and keep its handle for `stop`.
    pub(crate) fn spawn_worker<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if let Some(handle) = self.pool.spawn(future) {
            let mut workers = self.workers.lock();
            workers.retain(|worker| !worker.is_finished());
            workers.push(handle);
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Claim `mode`, open the pool and create the shutdown channel.
    fn begin(&self, mode: Mode) -> Result<(), BusError> {
        let mut current = self.mode.write();
        if let Some(running) = *current {
            return Err(BusError::AlreadyRunning(running));
        }
        if self.stopping.load(Ordering::Acquire) {
            return Err(BusError::Stopping);
        }
        self.pool.open()?;
        let (tx, _rx) = watch::channel(false);
        *self.shutdown.lock() = Some(tx);
        *current = Some(mode);
        Ok(())
    }

    /// Undo a `begin` whose network setup failed.
    fn abort_start(&self) {
        *self.mode.write() = None;
        if let Some(tx) = self.shutdown.lock().take() {
            let _ = tx.send(true);
        }
        self.client.reset();
        self.pool.close();
    }

    /// Start in local mode unless already running.
    fn ensure_started(self: &Arc<Self>) {
        if self.mode().is_some() {
            return;
        }
        match self.begin(Mode::Local) {
            Ok(()) => {
                self.spawn_ticker();
                info!(manager = %self.id, "Bus bootstrapped in local mode");
            }
            // Lost the race to another starter.
            Err(BusError::AlreadyRunning(_)) => {}
            Err(BusError::Stopping) => {
                debug!(manager = %self.id, "Bus is stopping, not bootstrapping");
            }
            Err(e) => warn!(error = %e, "Cannot bootstrap local bus"),
        }
    }

    fn spawn_ticker(self: &Arc<Self>) {
        if let Some(shutdown) = self.shutdown_receiver() {
            self.spawn_worker(transport::ticker(
                Arc::downgrade(self),
                self.config.poll_interval,
                shutdown,
            ));
        }
    }

    async fn start(self: &Arc<Self>, start: StartMode) -> Result<(), BusError> {
        self.config.validate()?;

        match start {
            StartMode::Local => {
                self.begin(Mode::Local)?;
                self.spawn_ticker();
                info!(manager = %self.id, "Bus started in local mode");
            }
            StartMode::Server => {
                self.begin(Mode::Server)?;
                if let Err(e) = self.start_server().await {
                    self.abort_start();
                    return Err(e);
                }
            }
            StartMode::Client { fallback_to_local } => {
                self.begin(Mode::Client)?;
                match self.start_client().await {
                    Ok(()) => {}
                    Err(e) if fallback_to_local => {
                        warn!(error = %e, "Cannot reach bus server, falling back to local mode");
                        self.client.reset();
                        *self.mode.write() = Some(Mode::Local);
                        self.spawn_ticker();
                    }
                    Err(e) => {
                        self.abort_start();
                        return Err(e);
                    }
                }
            }
        }
        Ok(())
    }

    async fn start_server(self: &Arc<Self>) -> Result<(), BusError> {
        let addr = self.config.address();
        let handle = self.pool.open()?;

        // Bind on the pool so the listener lives on the pool's reactor.
        let bind_addr = addr.clone();
        let listener = handle
            .spawn(async move { TcpListener::bind(bind_addr).await })
            .await
            .map_err(|e| BusError::Pool(e.to_string()))?
            .map_err(|source| BusError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let bound = listener.local_addr().map_err(|source| BusError::Bind {
            addr: addr.clone(),
            source,
        })?;
        *self.local_addr.lock() = Some(bound);

        let control: Arc<dyn EventHandler> =
            Arc::new(ForwardRequestHandler::new(Arc::downgrade(self)));
        self.registry.register(Arc::clone(&control));
        *self.control_handler.lock() = Some(control);

        let shutdown = self
            .shutdown_receiver()
            .ok_or_else(|| BusError::Pool("bus stopped during start".to_string()))?;
        self.spawn_worker(transport::accept_loop(
            Arc::downgrade(self),
            Arc::clone(&self.codecs),
            listener,
            self.settings(),
            shutdown,
        ));
        self.spawn_ticker();

        info!(manager = %self.id, addr = %bound, "Bus server listening");
        Ok(())
    }

    async fn start_client(self: &Arc<Self>) -> Result<(), BusError> {
        let addr = self.config.address();
        let handle = self.pool.open()?;
        let connect_timeout = self.config.connect_timeout;
        let id = self.id;

        let target = addr.clone();
        let (read, writer) = handle
            .spawn(async move {
                let stream = timeout(connect_timeout, TcpStream::connect(target))
                    .await
                    .map_err(|_| "connect timed out".to_string())?
                    .map_err(|e| e.to_string())?;
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(error = %e, "Could not disable Nagle");
                }
                let (read, write) = stream.into_split();
                let mut writer = FrameWriter::new(write);
                writer
                    .write_handshake(id)
                    .await
                    .map_err(|e| e.to_string())?;
                Ok::<_, String>((read, writer))
            })
            .await
            .map_err(|e| BusError::Pool(e.to_string()))?
            .map_err(|reason| BusError::Connect {
                addr: addr.clone(),
                reason,
            })?;

        let (tx, rx) = mpsc::unbounded_channel();
        self.client.connect(tx, read);

        let shutdown = self
            .shutdown_receiver()
            .ok_or_else(|| BusError::Pool("bus stopped during start".to_string()))?;
        self.spawn_worker(transport::client_writer(
            Arc::downgrade(self),
            writer,
            rx,
            self.settings(),
            shutdown,
        ));

        info!(manager = %self.id, addr = %addr, "Bus client connected");

        for kind in self.registry.remote_kinds() {
            self.subscribe_remote(&kind);
        }
        Ok(())
    }

    async fn stop(&self) {
        let mode = {
            let mut current = self.mode.write();
            let Some(mode) = current.take() else {
                return;
            };
            self.stopping.store(true, Ordering::Release);
            mode
        };
        if let Some(tx) = self.shutdown.lock().take() {
            let _ = tx.send(true);
        }

        let connections: Vec<_> = self
            .connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        self.connections.clear();
        for connection in connections {
            connection.close();
            BUS_CONNECTIONS_ACTIVE.dec();
        }

        let forwarders: Vec<_> = self
            .forwarders
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        self.forwarders.clear();
        for forwarder in &forwarders {
            self.registry.unregister(forwarder);
        }
        if let Some(control) = self.control_handler.lock().take() {
            self.registry.unregister(&control);
        }

        self.client.reset();
        *self.local_addr.lock() = None;

        let workers = std::mem::take(&mut *self.workers.lock());
        let bound = self.config.socket_timeout * 3;
        if timeout(bound, join_all(workers)).await.is_err() {
            warn!(bound_ms = bound.as_millis() as u64, "Workers did not stop in time");
        }

        self.pool.close();
        self.stopping.store(false, Ordering::Release);
        info!(manager = %self.id, mode = %mode, "Bus stopped");
    }

    // ------------------------------------------------------------------
    // Sending and dispatch
    // ------------------------------------------------------------------

    fn stamp<E: Event>(&self, event: &mut E) {
        if let Some(address) = event.return_address_mut() {
            *address = ReturnAddress::stamped(self.id, MessageId::new());
        }
    }

    /// Route an already stamped event according to the current mode.
    fn submit(self: &Arc<Self>, event: SharedEvent) {
        BUS_EVENTS_SENT.with_label_values(&[event.kind_name()]).inc();
        if self.logging.shall_be_logged(&*event) {
            debug!(manager = %self.id, kind = event.kind_name(), event = ?event, "Sending event");
        }

        if self.mode() == Some(Mode::Client) && !event.is_local_only() {
            match self.client.enqueue(event) {
                Ok(()) => return,
                Err(event) => {
                    debug!(kind = event.kind_name(), "No server connection, dispatching locally");
                    self.handle(event);
                    return;
                }
            }
        }
        self.handle(event);
    }

    /// Dispatch core. Responses for another bus are routed, never dispatched.
    pub(crate) fn handle(self: &Arc<Self>, event: SharedEvent) {
        if let Some(receiver) = event.response_address().map(|address| address.receiver_id) {
            if receiver != self.id {
                self.route_response(receiver, event);
                return;
            }
        }
        self.dispatch(event);
    }

    /// Events read from the server connection.
    pub(crate) fn handle_inbound(self: &Arc<Self>, event: SharedEvent) {
        if let Some(address) = event.response_address() {
            if address.receiver_id != self.id {
                debug!(
                    kind = event.kind_name(),
                    receiver = %address.receiver_id,
                    "Dropping response addressed to another bus"
                );
                return;
            }
        }
        self.dispatch(event);
    }

    fn route_response(self: &Arc<Self>, receiver: ManagerId, event: SharedEvent) {
        match self.mode() {
            Some(Mode::Server) => {
                let connection = self
                    .connections
                    .get(&receiver)
                    .map(|entry| Arc::clone(entry.value()));
                if let Some(connection) = connection {
                    self.deliver_to(&connection, event);
                    return;
                }
            }
            Some(Mode::Client) => {
                if self.client.enqueue(Arc::clone(&event)).is_ok() {
                    return;
                }
            }
            Some(Mode::Local) | None => {}
        }
        warn!(
            kind = event.kind_name(),
            receiver = %receiver,
            "No route for response, dropping"
        );
    }

    fn dispatch(&self, event: SharedEvent) {
        let kind = event.kind_name();
        if self.logging.shall_be_logged(&*event) {
            debug!(manager = %self.id, kind, "Handling event");
        }

        let registrations = self.registry.resolve(event.descriptor());
        let channel = event.channel();
        for registration in registrations.iter() {
            if !registration.is_active() {
                continue;
            }
            let handler = registration.handler();
            if !channel_matches(handler.channel(), channel) {
                continue;
            }

            match catch_unwind(AssertUnwindSafe(|| handler.consume(&event))) {
                Ok(true) => {
                    BUS_EVENTS_DISPATCHED.with_label_values(&[kind, "inline"]).inc();
                }
                Ok(false) => {
                    if !self.pool.invoke(Arc::clone(registration), Arc::clone(&event)) {
                        warn!(kind, handler = handler.kind(), "Dispatch pool closed, event not handled");
                    }
                }
                Err(_) => {
                    BUS_HANDLER_PANICS.inc();
                    warn!(kind, handler = handler.kind(), "Event handler panicked in consume");
                }
            }
        }
    }

    pub(crate) fn tick_timer(&self) {
        if self.timer.take_due(Instant::now()) {
            self.dispatch(Arc::new(TimerEvent::INSTANCE));
        }
    }

    // ------------------------------------------------------------------
    // Server side
    // ------------------------------------------------------------------

    pub(crate) fn register_connection(&self, connection: Arc<ClientConnection>) {
        let client_id = connection.client_id();
        info!(client = %client_id, peer = %connection.peer(), "Client connected");

        match self.connections.insert(client_id, connection) {
            Some(previous) => {
                debug!(client = %client_id, "Replacing previous connection");
                previous.close();
                self.drop_forwarders(client_id);
            }
            None => BUS_CONNECTIONS_ACTIVE.inc(),
        }
    }

    /// Remove a connection and its forwarders. A connection that has already
    /// been replaced by a reconnect leaves the table untouched.
    pub(crate) fn drop_connection(&self, connection: &Arc<ClientConnection>) {
        connection.close();
        let client_id = connection.client_id();
        let removed = self
            .connections
            .remove_if(&client_id, |_, current| Arc::ptr_eq(current, connection));
        if removed.is_some() {
            self.drop_forwarders(client_id);
            BUS_CONNECTIONS_ACTIVE.dec();
            debug!(client = %client_id, "Connection dropped");
        }
    }

    fn drop_forwarders(&self, client_id: ManagerId) {
        let keys: Vec<_> = self
            .forwarders
            .iter()
            .filter(|entry| entry.key().0 == client_id)
            .map(|entry| entry.key().clone())
            .collect();
        for key in keys {
            if let Some((_, forwarder)) = self.forwarders.remove(&key) {
                self.registry.unregister(&forwarder);
            }
        }
    }

    /// Install the forwarder for `(client_id, kind)` unless one exists.
    pub(crate) fn install_forwarder(self: &Arc<Self>, client_id: ManagerId, kind: &str) {
        let connection = self
            .connections
            .get(&client_id)
            .map(|entry| Arc::clone(entry.value()));
        let Some(connection) = connection else {
            warn!(client = %client_id, kind, "Forward request from unknown client");
            return;
        };
        self.attach_forwarder(kind, connection);
    }

    /// Insert a forwarder bound to `connection`. If the connection was
    /// dropped meanwhile, the forwarder is taken out again.
    fn attach_forwarder(self: &Arc<Self>, kind: &str, connection: Arc<ClientConnection>) {
        let client_id = connection.client_id();
        let forwarder: Arc<dyn EventHandler> = match self.forwarders.entry((client_id, kind.to_string())) {
            Entry::Occupied(_) => {
                debug!(client = %client_id, kind, "Forwarder already installed");
                return;
            }
            Entry::Vacant(slot) => {
                let forwarder: Arc<dyn EventHandler> = Arc::new(ForwardingHandler::new(
                    kind,
                    Arc::clone(&connection),
                    Arc::downgrade(self),
                ));
                self.registry.register(Arc::clone(&forwarder));
                slot.insert(Arc::clone(&forwarder));
                forwarder
            }
        };

        // A drop_connection that ran before the insert missed this forwarder.
        let live = self
            .connections
            .get(&client_id)
            .is_some_and(|current| Arc::ptr_eq(current.value(), &connection));
        if live && !connection.is_closed() {
            info!(client = %client_id, kind, "Forwarding installed");
        } else {
            self.retire_forwarder(client_id, kind, &forwarder);
            debug!(client = %client_id, kind, "Connection gone, forwarder withdrawn");
        }
    }

    /// Remove one forwarder from the table and the registry.
    fn retire_forwarder(&self, client_id: ManagerId, kind: &str, forwarder: &Arc<dyn EventHandler>) {
        self.forwarders.remove_if(&(client_id, kind.to_string()), |_, current| {
            same_handler(current, forwarder)
        });
        self.registry.unregister(forwarder);
    }

    /// Remove the forwarder for `(client_id, kind)` if it is `handler`.
    /// Called by a forwarder that found its connection closed.
    pub(crate) fn retire_closed_forwarder(&self, client_id: ManagerId, kind: &str, handler: *const ()) {
        let removed = self
            .forwarders
            .remove_if(&(client_id, kind.to_string()), |_, current| {
                std::ptr::eq(Arc::as_ptr(current) as *const (), handler)
            });
        if let Some((_, forwarder)) = removed {
            self.registry.unregister(&forwarder);
            debug!(client = %client_id, kind, "Forwarder for closed connection removed");
        }
    }

    /// Queue `event` on a client's connection, starting its writer on first
    /// use. A dead connection is dropped.
    pub(crate) fn deliver_to(self: &Arc<Self>, connection: &Arc<ClientConnection>, event: SharedEvent) -> bool {
        let delivered = connection.deliver(event, |write, queue| {
            if let Some(shutdown) = self.shutdown_receiver() {
                self.spawn_worker(transport::connection_writer(
                    Arc::downgrade(self),
                    Arc::clone(connection),
                    write,
                    queue,
                    self.settings(),
                    shutdown,
                ));
            }
        });
        if !delivered {
            self.drop_connection(connection);
        }
        delivered
    }

    // ------------------------------------------------------------------
    // Client side
    // ------------------------------------------------------------------

    /// Ask the server to forward `kind`, once per kind per start.
    fn subscribe_remote(self: &Arc<Self>, kind: &str) {
        if self.mode() != Some(Mode::Client) || !self.client.subscribe(kind) {
            return;
        }

        let request: SharedEvent = Arc::new(ForwardRequest::new(self.id, kind));
        if self.client.enqueue(request).is_err() {
            self.client.unsubscribe(kind);
            debug!(kind, "Not connected, forward request skipped");
            return;
        }
        debug!(kind, "Forward request sent");

        if let Some(read) = self.client.take_reader() {
            if let Some(shutdown) = self.shutdown_receiver() {
                self.spawn_worker(transport::client_reader(
                    Arc::downgrade(self),
                    Arc::clone(&self.codecs),
                    read,
                    self.settings(),
                    shutdown,
                ));
            }
        }
    }

    /// The writer is gone: sends fall back to local dispatch and a ticker
    /// takes over the timer.
    pub(crate) fn client_writer_stopped(self: &Arc<Self>) {
        self.client.disconnect();
        if self.mode() == Some(Mode::Client) {
            warn!(manager = %self.id, "Server connection lost, sends fall back to local dispatch");
            self.spawn_ticker();
        }
    }

    /// The reader failed: close the outbound queue so the writer shuts the
    /// connection down as well.
    pub(crate) fn client_reader_stopped(&self) {
        if self.mode() == Some(Mode::Client) {
            self.client.disconnect();
        }
    }

    fn register(self: &Arc<Self>, handler: Arc<dyn EventHandler>) {
        let remote = !handler.local_only();
        let kind = handler.kind().to_string();
        self.registry.register(handler);
        if remote {
            self.subscribe_remote(&kind);
        }
    }

    /// Handlers installed by the bus itself.
    fn internal_handler_count(&self) -> usize {
        self.forwarders.len() + usize::from(self.control_handler.lock().is_some())
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.get_mut().take() {
            let _ = tx.send(true);
        }
    }
}

/// Handle to one bus instance. Clones share the same bus.
#[derive(Clone)]
pub struct EventManager {
    shared: Arc<Shared>,
}

impl EventManager {
    /// A stopped bus with a fresh manager id.
    #[must_use]
    pub fn new(config: BusConfig) -> Self {
        Self {
            shared: Arc::new(Shared::new(config)),
        }
    }

    /// Process-wide default bus, configured from the environment on first use.
    pub fn global() -> &'static Self {
        static GLOBAL: OnceLock<EventManager> = OnceLock::new();
        GLOBAL.get_or_init(|| Self::new(BusConfig::from_env()))
    }

    #[must_use]
    pub fn manager_id(&self) -> ManagerId {
        self.shared.id
    }

    #[must_use]
    pub fn config(&self) -> &BusConfig {
        &self.shared.config
    }

    /// Current mode, `None` when stopped.
    #[must_use]
    pub fn mode(&self) -> Option<Mode> {
        self.shared.mode()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.mode().is_some()
    }

    /// Address the server is bound to.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.shared.local_addr.lock()
    }

    /// Start the bus.
    ///
    /// # Errors
    ///
    /// `AlreadyRunning` if started, `Bind` or `Connect` on network failure
    /// (unless a client start falls back to local), `Config` for an invalid
    /// configuration, `Stopping` while a `stop` is still in progress.
    pub async fn start(&self, mode: StartMode) -> Result<(), BusError> {
        self.shared.start(mode).await
    }

    /// Stop workers, close connections and shut the dispatch pool down.
    /// The bus can be started again afterwards.
    pub async fn stop(&self) {
        self.shared.stop().await;
    }

    /// Register a handler. In client mode a non-local kind is also
    /// subscribed on the server.
    pub fn register(&self, handler: Arc<dyn EventHandler>) {
        self.shared.register(handler);
    }

    /// Register a closure for events of type `E`.
    pub fn on<E, F>(&self, callback: F) -> Arc<dyn EventHandler>
    where
        E: EventType,
        F: Fn(Arc<E>) + Send + Sync + 'static,
    {
        let handler: Arc<dyn EventHandler> = Arc::new(TypedHandler::<E>::new(callback));
        self.register(Arc::clone(&handler));
        handler
    }

    /// Register a closure for `descriptor` and every descendant kind.
    pub fn on_kind<F>(&self, descriptor: &'static EventDescriptor, callback: F) -> Arc<dyn EventHandler>
    where
        F: Fn(SharedEvent) + Send + Sync + 'static,
    {
        let handler = FnHandler::new(descriptor, callback).into_handler();
        self.register(Arc::clone(&handler));
        handler
    }

    /// Remove every registration of `handler`. Idempotent; returns whether
    /// anything was removed.
    pub fn unregister(&self, handler: &Arc<dyn EventHandler>) -> bool {
        self.shared.registry.unregister(handler) > 0
    }

    /// Make `E` decodable from the wire. Returns `false` if already known.
    pub fn register_wire_type<E: WireEvent>(&self) -> bool {
        self.shared.codecs.register::<E>()
    }

    /// Stamp and route an event. Bootstraps a local bus if needed.
    pub fn send<E: Event>(&self, mut event: E) -> Arc<E> {
        self.shared.ensure_started();
        self.shared.stamp(&mut event);
        let event = Arc::new(event);
        self.shared.submit(Arc::clone(&event) as SharedEvent);
        event
    }

    /// Like [`send`](Self::send), but routing happens on the dispatch pool.
    /// The event is stamped before this returns.
    pub fn async_send<E: Event>(&self, mut event: E) -> Arc<E> {
        self.shared.ensure_started();
        self.shared.stamp(&mut event);
        let event = Arc::new(event);
        let shared_event: SharedEvent = Arc::clone(&event) as SharedEvent;

        match self.shared.pool.handle() {
            Some(handle) => {
                let shared = Arc::clone(&self.shared);
                handle.spawn_blocking(move || shared.submit(shared_event));
            }
            None => self.shared.submit(shared_event),
        }
        event
    }

    /// Dispatch an event as received, without stamping.
    pub fn handle(&self, event: SharedEvent) {
        self.shared.ensure_started();
        self.shared.handle(event);
    }

    /// Ask for `TimerEvent` at least every `period`. The smallest requested
    /// period wins.
    pub fn request_timer(&self, period: Duration) {
        self.shared.timer.request(period);
    }

    pub fn cancel_timer(&self) {
        self.shared.timer.cancel();
    }

    pub fn disable_logging_for(&self, kind: &str) {
        self.shared.logging.disable(kind);
    }

    pub fn enable_logging_for(&self, kind: &str) {
        self.shared.logging.enable(kind);
    }

    #[must_use]
    pub fn shall_be_logged(&self, event: &dyn Event) -> bool {
        self.shared.logging.shall_be_logged(event)
    }

    /// Connected clients (server mode).
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.shared.connections.len()
    }

    #[must_use]
    pub fn connected_clients(&self) -> Vec<ManagerId> {
        self.shared
            .connections
            .iter()
            .map(|entry| *entry.key())
            .collect()
    }

    /// Installed `(client, kind)` forwarders (server mode).
    #[must_use]
    pub fn forwarder_count(&self) -> usize {
        self.shared.forwarders.len()
    }

    /// Registered handlers, excluding the ones the bus installs itself.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.shared
            .registry
            .len()
            .saturating_sub(self.shared.internal_handler_count())
    }
}

impl fmt::Debug for EventManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventManager")
            .field("manager_id", &self.shared.id)
            .field("mode", &self.mode())
            .finish()
    }
}
