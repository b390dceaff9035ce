//! # Bus Telemetry
//!
//! Observability for control-bus processes.
//!
//! - **Logs**: `tracing-subscriber` with an `EnvFilter` and a pretty or JSON
//!   `fmt` layer.
//! - **Metrics**: Prometheus counters for bus traffic, exposed in text format
//!   through [`encode_metrics`].
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `BUS_SERVICE_NAME` | `control-bus` | Service name attached to startup logs |
//! | `BUS_LOG_LEVEL` / `RUST_LOG` | `info` | Log level filter |
//! | `BUS_JSON_LOGS` | `false` | Emit JSON lines instead of pretty output |
//! | `BUS_CONSOLE_OUTPUT` | `true` | Write logs to stdout at all |

#![allow(clippy::missing_const_for_fn)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod config;
mod logging;
mod metrics;

pub use config::TelemetryConfig;
pub use logging::init_logging;
pub use metrics::{
    encode_metrics, register_metrics, MetricsHandle, BUS_CONNECTIONS_ACTIVE,
    BUS_EVENTS_DISPATCHED, BUS_EVENTS_FORWARDED, BUS_EVENTS_SENT, BUS_FRAMES_REJECTED,
    BUS_HANDLER_PANICS,
};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize log subscriber: {0}")]
    LoggingInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),
}

/// Initialize logging and register bus metrics.
///
/// ```rust,ignore
/// let config = TelemetryConfig::from_env();
/// let _metrics = bus_telemetry::init_telemetry(&config)?;
/// ```
pub fn init_telemetry(config: &TelemetryConfig) -> Result<MetricsHandle, TelemetryError> {
    let metrics = register_metrics()?;
    init_logging(config)?;

    tracing::info!(
        service = %config.service_name,
        json_logs = config.json_logs,
        "Telemetry initialized"
    );

    Ok(metrics)
}
