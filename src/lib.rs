//! mqtt-exporter library
//!
//! This crate subscribes to MQTT topics, turns incoming messages into
//! labeled gauges according to declarative rules, and exports them in
//! Prometheus format.

pub mod cli;
pub mod config;
pub mod error;
pub mod metrics;
pub mod registry;
pub mod server;
pub mod transformer;
pub mod transport;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the logging subsystem
///
/// `RUST_LOG` takes precedence over `level` when set.
///
/// # Errors
/// Returns an error if the logging system fails to initialize
pub fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}
