//! # Transport Workers
//!
//! Async tasks moving frames between sockets and the bus. Every loop selects
//! on the shutdown channel, so `stop` is observed promptly instead of at the
//! next read timeout.
//!
//! | Worker | Side | Count |
//! |--------|------|-------|
//! | `accept_loop` | server | one per bus |
//! | `serve_connection` | server | one reader per accepted socket |
//! | `connection_writer` | server | one per connection, opened lazily |
//! | `client_writer` | client | one, drains the outbound queue and drives the timer |
//! | `client_reader` | client | one, started on the first forward subscription |
//! | `ticker` | local / server | one, drives the timer |

use crate::codec::{encode_event, CodecRegistry, Frame, FrameReader, FrameWriter};
use crate::connection::ClientConnection;
use crate::event::SharedEvent;
use crate::manager::Shared;
use bus_telemetry::{BUS_EVENTS_FORWARDED, BUS_FRAMES_REJECTED};
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::time::{timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Transport parameters copied out of the bus configuration.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TransportSettings {
    pub(crate) socket_timeout: Duration,
    pub(crate) poll_interval: Duration,
    pub(crate) max_frame_len: usize,
}

pub(crate) async fn accept_loop(
    bus: Weak<Shared>,
    codecs: Arc<CodecRegistry>,
    listener: TcpListener,
    settings: TransportSettings,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                let Some(shared) = bus.upgrade() else { break };
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(peer = %peer, error = %e, "Could not disable Nagle");
                }
                debug!(peer = %peer, "Accepted connection");
                shared.spawn_worker(serve_connection(
                    Weak::clone(&bus),
                    Arc::clone(&codecs),
                    stream,
                    peer,
                    settings,
                    shutdown.clone(),
                ));
            }
            Err(e) => {
                warn!(error = %e, "Accept failed");
                tokio::time::sleep(settings.poll_interval).await;
            }
        }
    }
    debug!("Accept loop stopped");
}

/// Reader for one accepted socket. The first frame must be the handshake.
async fn serve_connection(
    bus: Weak<Shared>,
    codecs: Arc<CodecRegistry>,
    stream: TcpStream,
    peer: SocketAddr,
    settings: TransportSettings,
    mut shutdown: watch::Receiver<bool>,
) {
    let (read, write) = stream.into_split();
    let mut reader = FrameReader::new(read, settings.max_frame_len);

    let handshake = tokio::select! {
        _ = shutdown.changed() => return,
        handshake = timeout(settings.socket_timeout, reader.read_frame(&codecs)) => handshake,
    };
    let client_id = match handshake {
        Ok(Ok(Some(Frame::Handshake(id)))) => id,
        Ok(Ok(Some(Frame::Event(event)))) => {
            BUS_FRAMES_REJECTED.with_label_values(&["no_handshake"]).inc();
            warn!(peer = %peer, kind = event.kind_name(), "First frame was not a handshake");
            return;
        }
        Ok(Ok(None)) => {
            debug!(peer = %peer, "Peer closed before handshake");
            return;
        }
        Ok(Err(e)) => {
            BUS_FRAMES_REJECTED.with_label_values(&[e.reason()]).inc();
            warn!(peer = %peer, error = %e, "Invalid handshake");
            return;
        }
        Err(_) => {
            warn!(peer = %peer, "Handshake timed out");
            return;
        }
    };

    let connection = Arc::new(ClientConnection::new(client_id, peer, write));
    match bus.upgrade() {
        Some(shared) => shared.register_connection(Arc::clone(&connection)),
        None => return,
    }

    loop {
        let frame = tokio::select! {
            _ = shutdown.changed() => break,
            frame = reader.read_frame(&codecs) => frame,
        };

        match frame {
            Ok(Some(Frame::Event(event))) => match bus.upgrade() {
                Some(shared) => shared.handle(event),
                None => break,
            },
            Ok(Some(Frame::Handshake(_))) => {
                BUS_FRAMES_REJECTED.with_label_values(&["repeated_handshake"]).inc();
                warn!(client = %client_id, "Repeated handshake, closing connection");
                break;
            }
            Ok(None) => {
                info!(client = %client_id, peer = %peer, "Client disconnected");
                break;
            }
            Err(e) => {
                BUS_FRAMES_REJECTED.with_label_values(&[e.reason()]).inc();
                warn!(client = %client_id, error = %e, "Read failed, closing connection");
                break;
            }
        }
    }

    match bus.upgrade() {
        Some(shared) => shared.drop_connection(&connection),
        None => connection.close(),
    }
}

/// Writer for one server-side connection.
pub(crate) async fn connection_writer(
    bus: Weak<Shared>,
    connection: Arc<ClientConnection>,
    write: OwnedWriteHalf,
    mut queue: mpsc::UnboundedReceiver<SharedEvent>,
    settings: TransportSettings,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut writer = FrameWriter::new(write);
    let mut failed = false;

    loop {
        let next = tokio::select! {
            _ = shutdown.changed() => break,
            next = queue.recv() => next,
        };
        let Some(event) = next else { break };

        let frame = match encode_event(&*event) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(kind = event.kind_name(), error = %e, "Cannot encode event, skipping");
                continue;
            }
        };

        match timeout(settings.socket_timeout, writer.write_frame(&frame)).await {
            Ok(Ok(())) => BUS_EVENTS_FORWARDED.inc(),
            Ok(Err(e)) => {
                warn!(client = %connection.client_id(), error = %e, "Forwarding write failed");
                failed = true;
                break;
            }
            Err(_) => {
                warn!(client = %connection.client_id(), "Forwarding write timed out");
                failed = true;
                break;
            }
        }
    }

    if failed {
        match bus.upgrade() {
            Some(shared) => shared.drop_connection(&connection),
            None => connection.close(),
        }
    }
    let _ = writer.shutdown().await;
}

/// Drains the client's outbound queue; ticks the timer when idle.
pub(crate) async fn client_writer(
    bus: Weak<Shared>,
    mut writer: FrameWriter<OwnedWriteHalf>,
    mut queue: mpsc::UnboundedReceiver<SharedEvent>,
    settings: TransportSettings,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let next = tokio::select! {
            _ = shutdown.changed() => break,
            next = timeout(settings.poll_interval, queue.recv()) => next,
        };

        match next {
            Ok(Some(event)) => match encode_event(&*event) {
                Ok(frame) => match timeout(settings.socket_timeout, writer.write_frame(&frame)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        warn!(error = %e, "Write to server failed");
                        break;
                    }
                    Err(_) => {
                        warn!("Write to server timed out");
                        break;
                    }
                },
                Err(e) => {
                    warn!(kind = event.kind_name(), error = %e, "Cannot encode event, skipping");
                }
            },
            Ok(None) => break,
            Err(_idle) => {}
        }

        match bus.upgrade() {
            Some(shared) => shared.tick_timer(),
            None => break,
        }
    }

    if let Some(shared) = bus.upgrade() {
        shared.client_writer_stopped();
    }
    let _ = writer.shutdown().await;
    debug!("Client writer stopped");
}

/// Receives events forwarded by the server.
pub(crate) async fn client_reader(
    bus: Weak<Shared>,
    codecs: Arc<CodecRegistry>,
    read: OwnedReadHalf,
    settings: TransportSettings,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut reader = FrameReader::new(read, settings.max_frame_len);

    let failed = loop {
        let frame = tokio::select! {
            _ = shutdown.changed() => break false,
            frame = reader.read_frame(&codecs) => frame,
        };

        match frame {
            Ok(Some(Frame::Event(event))) => match bus.upgrade() {
                Some(shared) => shared.handle_inbound(event),
                None => break false,
            },
            Ok(Some(Frame::Handshake(id))) => {
                BUS_FRAMES_REJECTED.with_label_values(&["repeated_handshake"]).inc();
                warn!(peer = %id, "Unexpected handshake from server");
                break true;
            }
            Ok(None) => {
                info!("Server closed the connection");
                break true;
            }
            Err(e) => {
                BUS_FRAMES_REJECTED.with_label_values(&[e.reason()]).inc();
                warn!(error = %e, "Read from server failed");
                break true;
            }
        }
    };

    if failed {
        if let Some(shared) = bus.upgrade() {
            shared.client_reader_stopped();
        }
    }
    debug!("Client reader stopped");
}

/// Drives the timer in modes without a client writer.
pub(crate) async fn ticker(
    bus: Weak<Shared>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = interval.tick() => {}
        }
        match bus.upgrade() {
            Some(shared) => shared.tick_timer(),
            None => break,
        }
    }
}
