//! Metrics export for the console.
//!
//! The hub records through the `metrics` facade; this module describes those
//! metrics and optionally serves them in Prometheus format.

use anyhow::{Context, Result};
use grid_transport::local::names;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Describe the hub metrics.
pub fn init_metrics() {
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of messages published");
    metrics::describe_counter!(
        names::SUBSCRIPTIONS_TOTAL,
        "Total number of channel subscriptions"
    );
    metrics::describe_gauge!(names::CHANNELS_ACTIVE, "Current number of live channels");
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of delivery errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the exporter cannot be installed.
pub fn start_metrics_server(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}
