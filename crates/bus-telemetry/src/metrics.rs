//! Prometheus metrics for the control bus.
//!
//! All metrics follow the naming convention: `bus_<metric>_<unit>`

use lazy_static::lazy_static;
use prometheus::{Counter, CounterVec, Encoder, Gauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    /// Events submitted through `send`, by kind
    pub static ref BUS_EVENTS_SENT: CounterVec = CounterVec::new(
        Opts::new("bus_events_sent_total", "Events submitted to the bus"),
        &["kind"]
    ).expect("metric creation failed");

    /// Handler invocations, by kind and path (inline or pooled)
    pub static ref BUS_EVENTS_DISPATCHED: CounterVec = CounterVec::new(
        Opts::new("bus_events_dispatched_total", "Handler invocations"),
        &["kind", "path"]
    ).expect("metric creation failed");

    /// Events written to a remote client connection
    pub static ref BUS_EVENTS_FORWARDED: Counter = Counter::new(
        "bus_events_forwarded_total",
        "Events forwarded to remote clients"
    ).expect("metric creation failed");

    /// Panics caught inside pooled handler invocations
    pub static ref BUS_HANDLER_PANICS: Counter = Counter::new(
        "bus_handler_panics_total",
        "Handler invocations that panicked"
    ).expect("metric creation failed");

    /// Frames dropped by the wire codec, by reason
    pub static ref BUS_FRAMES_REJECTED: CounterVec = CounterVec::new(
        Opts::new("bus_frames_rejected_total", "Frames rejected by the wire codec"),
        &["reason"]
    ).expect("metric creation failed");

    /// Currently registered client connections
    pub static ref BUS_CONNECTIONS_ACTIVE: Gauge = Gauge::new(
        "bus_connections_active",
        "Client connections held by a server bus"
    ).expect("metric creation failed");
}

/// Handle for the metrics registry
pub struct MetricsHandle {
    registry: Arc<Registry>,
}

impl MetricsHandle {
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

/// Register all bus metrics with the global registry.
///
/// Safe to call more than once.
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(BUS_EVENTS_SENT.clone()),
        Box::new(BUS_EVENTS_DISPATCHED.clone()),
        Box::new(BUS_EVENTS_FORWARDED.clone()),
        Box::new(BUS_HANDLER_PANICS.clone()),
        Box::new(BUS_FRAMES_REJECTED.clone()),
        Box::new(BUS_CONNECTIONS_ACTIVE.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }

    Ok(MetricsHandle {
        registry: Arc::new(REGISTRY.clone()),
    })
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_is_idempotent() {
        register_metrics().unwrap();
        register_metrics().unwrap();
    }

    #[test]
    fn test_encode_includes_bus_counters() {
        register_metrics().unwrap();
        BUS_EVENTS_FORWARDED.inc();
        BUS_EVENTS_SENT.with_label_values(&["Ping"]).inc();

        let text = encode_metrics().unwrap();
        assert!(text.contains("bus_events_forwarded_total"));
        assert!(text.contains("bus_events_sent_total{kind=\"Ping\"}"));
    }
}
