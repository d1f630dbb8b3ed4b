//! HTTP server module
//!
//! Wires the pipeline together at startup and serves the scrape endpoint.
//!
//! Startup order: compile rules and register gauges, connect to the
//! broker, subscribe, then start listening. Any failure before the
//! listener is bound aborts startup.

pub mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::{routing::get, Router};
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::Config;
use crate::error::AppResult;
use crate::metrics::ExporterMetrics;
use crate::registry::{CardinalityPolicy, GaugeRegistry};
use crate::transformer::{compile_topics, TransformEngine};
use crate::transport::MqttSubscriber;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    /// Pipeline holding the registry and self-metrics
    pub engine: TransformEngine,
}

impl AppState {
    /// Create handler state from a config and the engine built from it
    pub fn new(config: Config, engine: TransformEngine) -> Self {
        Self {
            config: Arc::new(config),
            engine,
        }
    }
}

/// Compile the configured rules into a ready-to-use engine
///
/// Each call creates a fresh registry, so this also serves as a dry
/// compilation for configuration checks.
///
/// # Errors
/// Returns an error if a rule fails to compile or a gauge cannot be
/// registered. No gauge is registered in that case.
pub fn build_engine(config: &Config) -> AppResult<TransformEngine> {
    let policy = CardinalityPolicy::from_limit(config.metrics.max_series_per_metric);
    let registry = Arc::new(GaugeRegistry::new(policy));

    let rules = compile_topics(&config.topics, &config.metrics.namespace, &registry)?;

    Ok(TransformEngine::new(
        Arc::new(rules),
        registry,
        Arc::new(ExporterMetrics::new()),
    ))
}

/// Build the router with the configured metrics path
pub fn build_router(state: AppState) -> Router {
    let metrics_path = state.config.server.path.clone();

    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route(&metrics_path, get(handlers::metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the exporter
///
/// # Errors
/// Returns an error if rules fail to compile, the broker cannot be
/// reached, or the server fails to start
pub async fn run(config: Config) -> Result<()> {
    let engine = build_engine(&config)?;
    info!(
        topics = engine.rules().len(),
        rules = engine.rules().rule_count(),
        "Rules compiled"
    );

    let filters: Vec<String> = engine.rules().filters().map(str::to_string).collect();
    let mut subscriber = MqttSubscriber::new(&config.mqtt, filters)?;
    subscriber.connect().await?;

    let mqtt_task = tokio::spawn(subscriber.run(engine.clone()));

    let addr = bind_address(&config.server.bind_address, config.server.port)?;
    let metrics_path = config.server.path.clone();
    let app = build_router(AppState::new(config, engine));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(address = %addr, metrics_path = %metrics_path, "Server listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    mqtt_task.abort();
    served?;

    info!("Server shutdown complete");
    Ok(())
}

/// Parse the configured bind address
///
/// "localhost" is accepted as an alias for the IPv4 loopback address.
fn bind_address(bind_address: &str, port: u16) -> Result<SocketAddr> {
    let ip: std::net::IpAddr = if bind_address == "localhost" {
        std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST)
    } else {
        bind_address.parse().map_err(|e| {
            anyhow::anyhow!(
                "Invalid bind_address '{}': {}. Use an IP address (e.g., '0.0.0.0', '127.0.0.1') or 'localhost'.",
                bind_address,
                e
            )
        })?
    };

    Ok(SocketAddr::from((ip, port)))
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        }
    }
}
