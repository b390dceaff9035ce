//! # Bus Configuration
//!
//! Endpoint, timeouts and logging suppression for one EventManager. All
//! values have defaults and can be overridden from the environment.

use crate::codec::DEFAULT_MAX_FRAME_LEN;
use crate::error::BusError;
use std::env;
use std::time::Duration;

/// Configuration for an [`EventManager`](crate::EventManager).
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Server host to bind (server mode) or connect to (client mode).
    pub host: String,
    /// Server port. `0` binds an ephemeral port in server mode.
    pub port: u16,
    /// Event kind names excluded from per-event logging.
    pub suppressed_logging: Vec<String>,
    /// Bound on a single socket write and on the handshake read.
    pub socket_timeout: Duration,
    /// Idle interval of client writers and of the timer ticker.
    pub poll_interval: Duration,
    /// Bound on establishing a client connection.
    pub connect_timeout: Duration,
    /// Worker threads of the dispatch pool runtime.
    pub dispatch_threads: usize,
    /// Largest frame accepted from a peer.
    pub max_frame_len: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7070,
            suppressed_logging: Vec::new(),
            socket_timeout: Duration::from_millis(1000),
            poll_interval: Duration::from_millis(100),
            connect_timeout: Duration::from_millis(2000),
            dispatch_threads: 2,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl BusConfig {
    /// Create configuration from environment variables.
    ///
    /// - `BUS_HOST` (default: 127.0.0.1)
    /// - `BUS_PORT` (default: 7070)
    /// - `BUS_SUPPRESS_LOGGING`: comma-separated kind names
    /// - `BUS_SOCKET_TIMEOUT_MS` (default: 1000)
    /// - `BUS_POLL_INTERVAL_MS` (default: 100)
    /// - `BUS_CONNECT_TIMEOUT_MS` (default: 2000)
    /// - `BUS_DISPATCH_THREADS` (default: 2)
    /// - `BUS_MAX_FRAME_BYTES` (default: 16 MiB)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            host: env::var("BUS_HOST").unwrap_or(defaults.host),
            port: parse_env("BUS_PORT").unwrap_or(defaults.port),
            suppressed_logging: env::var("BUS_SUPPRESS_LOGGING")
                .map(|v| parse_kind_list(&v))
                .unwrap_or_default(),
            socket_timeout: parse_env("BUS_SOCKET_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.socket_timeout),
            poll_interval: parse_env("BUS_POLL_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            connect_timeout: parse_env("BUS_CONNECT_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.connect_timeout),
            dispatch_threads: parse_env("BUS_DISPATCH_THREADS")
                .unwrap_or(defaults.dispatch_threads),
            max_frame_len: parse_env("BUS_MAX_FRAME_BYTES").unwrap_or(defaults.max_frame_len),
        }
    }

    /// `host:port` of the bus server.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<(), BusError> {
        if self.host.trim().is_empty() {
            return Err(BusError::Config("host must not be empty".to_string()));
        }
        if self.socket_timeout.is_zero() {
            return Err(BusError::Config("socket timeout must be positive".to_string()));
        }
        if self.poll_interval.is_zero() {
            return Err(BusError::Config("poll interval must be positive".to_string()));
        }
        if self.dispatch_threads == 0 {
            return Err(BusError::Config("dispatch pool needs at least one thread".to_string()));
        }
        if self.max_frame_len < 64 {
            return Err(BusError::Config(format!(
                "max frame length {} is too small",
                self.max_frame_len
            )));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Split a comma-separated list of kind names, dropping blanks.
#[must_use]
pub fn parse_kind_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}
