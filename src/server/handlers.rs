//! HTTP request handlers
//!
//! Contains handlers for all HTTP endpoints.

use std::time::Instant;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse},
    Json,
};
use serde::Serialize;
use tracing::{debug, instrument};

use super::AppState;
use crate::transformer::{MetricType, PrometheusFormatter, PrometheusMetric, CONTENT_TYPE};

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    /// Health status
    status: String,
    /// Application version
    version: String,
    /// Number of registered gauges
    metrics: usize,
}

/// Root endpoint - displays basic info
pub async fn root(State(state): State<AppState>) -> Html<String> {
    let html = format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>MQTT Exporter</title>
</head>
<body>
    <h1>MQTT Exporter</h1>
    <p>Version: {}</p>
    <ul>
        <li><a href="/health">Health Check</a></li>
        <li><a href="{}">Metrics</a></li>
    </ul>
</body>
</html>"#,
        env!("CARGO_PKG_VERSION"),
        state.config.server.path
    );
    Html(html)
}

/// Health check endpoint
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        metrics: state.engine.registry().len(),
    })
}

/// Metrics endpoint - renders current gauge values and self-metrics
#[instrument(skip(state), name = "metrics_handler")]
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let start = Instant::now();
    let registry = state.engine.registry();

    let mut samples = registry.to_prometheus_metrics();
    let gauge_samples = samples.len();

    samples.extend(state.engine.metrics().to_prometheus_metrics(registry));
    samples.push(
        PrometheusMetric::new("mqtt_exporter_info", 1.0)
            .with_type(MetricType::Gauge)
            .with_help("mqtt-exporter build information")
            .with_label("version", env!("CARGO_PKG_VERSION")),
    );

    let output = PrometheusFormatter::new().format(&samples);

    debug!(
        duration_ms = start.elapsed().as_millis() as u64,
        series = gauge_samples,
        "Metrics rendered"
    );

    (StatusCode::OK, [(header::CONTENT_TYPE, CONTENT_TYPE)], output)
}
