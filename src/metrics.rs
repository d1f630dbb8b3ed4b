//! Internal observability metrics for mqtt-exporter
//!
//! This module provides metrics about the exporter's own operation,
//! published next to the user-defined gauges.
//!
//! # Metrics
//!
//! - `mqtt_exporter_messages_received_total` - Counter of delivered messages
//! - `mqtt_exporter_rule_evaluations_total{metric="...",outcome="..."}` -
//!   Counter of rule evaluations by outcome
//! - `mqtt_exporter_series{metric="..."}` - Gauge of stored label combinations
//! - `mqtt_exporter_series_evicted_total{metric="..."}` - Counter of label
//!   combinations evicted by the series limit

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::registry::GaugeRegistry;
use crate::transformer::{MetricType, PrometheusFormatter, PrometheusMetric};

/// Every outcome label a rule evaluation can produce
pub const OUTCOMES: &[&str] = &[
    "applied",
    "no_match",
    "not_numeric",
    "render_error",
    "rejected",
];

/// Thread-safe counter using atomic operations
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    /// Create a new counter initialized to 0
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    /// Increment the counter by 1
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current value
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Per-rule outcome counters, indexed like `OUTCOMES`
#[derive(Debug, Default)]
pub struct RuleMetrics {
    outcomes: [Counter; 5],
}

impl RuleMetrics {
    fn counter(&self, outcome: &str) -> Option<&Counter> {
        OUTCOMES
            .iter()
            .position(|o| *o == outcome)
            .map(|i| &self.outcomes[i])
    }

    /// Count of evaluations with the given outcome
    pub fn get(&self, outcome: &str) -> u64 {
        self.counter(outcome).map(Counter::get).unwrap_or(0)
    }
}

/// Exporter self-metrics
///
/// Created once at startup and shared with the transformation pipeline and
/// the HTTP handlers.
#[derive(Debug, Default)]
pub struct ExporterMetrics {
    messages_received: Counter,
    /// Per-rule counters, keyed by fully qualified metric name
    rules: RwLock<HashMap<String, Arc<RuleMetrics>>>,
}

impl ExporterMetrics {
    /// Create an empty set of self-metrics
    pub fn new() -> Self {
        Self::default()
    }

    /// Create counters for a rule so that it shows up before its first message
    pub fn register_rule(&self, metric: &str) {
        self.rules
            .write()
            .entry(metric.to_string())
            .or_default();
    }

    /// Record a delivered message
    pub fn record_message(&self) {
        self.messages_received.inc();
    }

    /// Record the outcome of one rule evaluation
    pub fn record_outcome(&self, metric: &str, outcome: &str) {
        let existing = self.rules.read().get(metric).cloned();
        let rule = match existing {
            Some(rule) => rule,
            None => Arc::clone(self.rules.write().entry(metric.to_string()).or_default()),
        };

        match rule.counter(outcome) {
            Some(counter) => counter.inc(),
            None => tracing::warn!(metric = %metric, outcome = %outcome, "Unknown rule outcome"),
        }
    }

    /// Total delivered messages
    pub fn messages_received(&self) -> u64 {
        self.messages_received.get()
    }

    /// Evaluations of a rule with a given outcome
    pub fn outcome_count(&self, metric: &str, outcome: &str) -> u64 {
        self.rules
            .read()
            .get(metric)
            .map(|r| r.get(outcome))
            .unwrap_or(0)
    }

    /// Format all internal metrics as Prometheus metrics
    pub fn to_prometheus_metrics(&self, registry: &GaugeRegistry) -> Vec<PrometheusMetric> {
        let mut metrics = Vec::new();

        metrics.push(
            PrometheusMetric::new(
                "mqtt_exporter_messages_received_total",
                self.messages_received.get() as f64,
            )
            .with_type(MetricType::Counter)
            .with_help("Total number of MQTT messages received"),
        );

        {
            let rules = self.rules.read();
            let mut names: Vec<&String> = rules.keys().collect();
            names.sort();

            for name in names {
                let rule = &rules[name];
                for outcome in OUTCOMES {
                    metrics.push(
                        PrometheusMetric::new(
                            "mqtt_exporter_rule_evaluations_total",
                            rule.get(outcome) as f64,
                        )
                        .with_type(MetricType::Counter)
                        .with_help("Total number of rule evaluations by outcome")
                        .with_label("metric", name.as_str())
                        .with_label("outcome", *outcome),
                    );
                }
            }
        }

        for stats in registry.series_stats() {
            metrics.push(
                PrometheusMetric::new("mqtt_exporter_series", stats.series as f64)
                    .with_type(MetricType::Gauge)
                    .with_help("Number of label combinations stored per metric")
                    .with_label("metric", &stats.name),
            );
        }

        for stats in registry.series_stats() {
            metrics.push(
                PrometheusMetric::new("mqtt_exporter_series_evicted_total", stats.evicted as f64)
                    .with_type(MetricType::Counter)
                    .with_help("Number of label combinations evicted by the series limit")
                    .with_label("metric", &stats.name),
            );
        }

        metrics
    }

    /// Format internal metrics as Prometheus exposition format string
    pub fn format_prometheus(&self, registry: &GaugeRegistry) -> String {
        PrometheusFormatter::new().format(&self.to_prometheus_metrics(registry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MetricIdentity;

    #[test]
    fn test_counter_operations() {
        let counter = Counter::new();
        assert_eq!(counter.get(), 0);

        counter.inc();
        counter.inc();
        assert_eq!(counter.get(), 2);
    }

    #[test]
    fn test_record_outcome() {
        let metrics = ExporterMetrics::new();
        metrics.register_rule("mqtt_temp");

        metrics.record_outcome("mqtt_temp", "applied");
        metrics.record_outcome("mqtt_temp", "applied");
        metrics.record_outcome("mqtt_temp", "no_match");
        // Rules that were never registered get counters on first use
        metrics.record_outcome("mqtt_other", "rejected");

        assert_eq!(metrics.outcome_count("mqtt_temp", "applied"), 2);
        assert_eq!(metrics.outcome_count("mqtt_temp", "no_match"), 1);
        assert_eq!(metrics.outcome_count("mqtt_temp", "rejected"), 0);
        assert_eq!(metrics.outcome_count("mqtt_other", "rejected"), 1);
        assert_eq!(metrics.outcome_count("missing", "applied"), 0);
    }

    #[test]
    fn test_unknown_outcome_is_ignored() {
        let metrics = ExporterMetrics::new();
        metrics.record_outcome("mqtt_temp", "exploded");
        assert_eq!(metrics.outcome_count("mqtt_temp", "exploded"), 0);
    }

    #[test]
    fn test_format_prometheus() {
        let registry = GaugeRegistry::default();
        registry
            .register(MetricIdentity::new("mqtt", "temp", Vec::<String>::new()))
            .unwrap();

        let metrics = ExporterMetrics::new();
        metrics.register_rule("mqtt_temp");
        metrics.record_message();
        metrics.record_outcome("mqtt_temp", "applied");

        let output = metrics.format_prometheus(&registry);
        assert!(output.contains("# TYPE mqtt_exporter_messages_received_total counter"));
        assert!(output.contains("mqtt_exporter_messages_received_total 1"));
        assert!(output.contains(
            "mqtt_exporter_rule_evaluations_total{metric=\"mqtt_temp\",outcome=\"applied\"} 1"
        ));
        assert!(output.contains(
            "mqtt_exporter_rule_evaluations_total{metric=\"mqtt_temp\",outcome=\"no_match\"} 0"
        ));
        assert!(output.contains("mqtt_exporter_series{metric=\"mqtt_temp\"} 0"));
        assert!(output.contains("mqtt_exporter_series_evicted_total{metric=\"mqtt_temp\"} 0"));
    }
}
