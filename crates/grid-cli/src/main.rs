//! # Grid console
//!
//! Interactive loopback console for Grid channel connections. It opens a
//! connection to one device channel over an in-process hub and reads
//! commands from stdin.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! grid
//!
//! # Run with a custom config
//! GRID_CONFIG=/path/to/grid.toml grid
//!
//! # Pick the device and log level from the environment
//! GRID_DEVICE=15 RUST_LOG=grid_core=debug grid
//! ```
//!
//! Type `help` at the prompt for the command list.

mod config;
mod console;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so they don't interleave with console output.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "grid=info,grid_core=debug,grid_transport=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = config::Config::load()?;

    tracing::info!("Starting Grid console for device {}", config.device);

    if config.metrics.enabled {
        metrics::init_metrics();
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            tracing::error!("Failed to start metrics server: {}", e);
        }
    }

    console::run(config).await?;

    Ok(())
}
