//! # Bus Node
//!
//! Standalone process hosting one control bus, typically the server that
//! monitoring, coordination and adaptation components connect to.
//!
//! ## Startup Sequence
//!
//! 1. Initialize telemetry (logs + metrics)
//! 2. Load and validate the bus configuration
//! 3. Start the bus in the mode named by `BUS_MODE`
//! 4. Log a heartbeat on every timer tick
//! 5. Stop gracefully on Ctrl+C

use std::time::Duration;

use anyhow::{bail, Context, Result};
use bus_telemetry::{encode_metrics, init_telemetry, TelemetryConfig};
use control_bus::{BusConfig, EventManager, StartMode, TimerEvent};
use tracing::{debug, info};

/// Interval between heartbeat log lines.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Parse `BUS_MODE` and `BUS_FALLBACK_TO_LOCAL`.
fn parse_start_mode(mode: Option<&str>, fallback: Option<&str>) -> Result<StartMode> {
    let fallback_to_local = match fallback.map(|v| v.trim().to_ascii_lowercase()) {
        None => true,
        Some(v) => matches!(v.as_str(), "1" | "true" | "yes" | "on"),
    };

    match mode.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
        None | Some("server") => Ok(StartMode::Server),
        Some("local") => Ok(StartMode::Local),
        Some("client") => Ok(StartMode::Client { fallback_to_local }),
        Some(other) => bail!("unknown BUS_MODE '{other}' (expected local, server or client)"),
    }
}

fn load_start_mode() -> Result<StartMode> {
    let mode = std::env::var("BUS_MODE").ok();
    let fallback = std::env::var("BUS_FALLBACK_TO_LOCAL").ok();
    parse_start_mode(mode.as_deref(), fallback.as_deref())
}

#[tokio::main]
async fn main() -> Result<()> {
    let telemetry = TelemetryConfig::from_env();
    let _metrics = init_telemetry(&telemetry).context("telemetry initialization failed")?;

    let config = BusConfig::from_env();
    config.validate().context("invalid bus configuration")?;
    let start_mode = load_start_mode()?;

    let bus = EventManager::new(config);
    info!("===========================================");
    info!("  Control Bus Node v{}", env!("CARGO_PKG_VERSION"));
    info!("  Manager: {}", bus.manager_id());
    info!("===========================================");

    bus.start(start_mode)
        .await
        .with_context(|| format!("failed to start bus ({start_mode:?})"))?;

    let heartbeat_bus = bus.clone();
    bus.on::<TimerEvent, _>(move |_| {
        info!(
            mode = ?heartbeat_bus.mode(),
            connections = heartbeat_bus.connection_count(),
            forwarders = heartbeat_bus.forwarder_count(),
            handlers = heartbeat_bus.handler_count(),
            "Heartbeat"
        );
    });
    bus.request_timer(HEARTBEAT_INTERVAL);

    info!(mode = ?bus.mode(), addr = ?bus.local_addr(), "Bus node is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    info!("Initiating graceful shutdown...");
    bus.cancel_timer();
    bus.stop().await;

    match encode_metrics() {
        Ok(text) => debug!(metrics = %text, "Final metrics"),
        Err(e) => debug!(error = %e, "Could not encode metrics"),
    }
    info!("Shutdown complete");
    Ok(())
}
