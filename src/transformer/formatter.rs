//! Prometheus Exposition Format output
//!
//! This module handles formatting of gauges and self-metrics into the text
//! exposition format (version 0.0.4).
//!
//! # Format Specification
//!
//! ```text
//! # HELP <metric_name> <help_text>
//! # TYPE <metric_name> <type>
//! <metric_name>{<label1>="<value1>",<label2>="<value2>"} <value>
//! ```

use std::collections::{BTreeMap, HashMap};

/// Content type served on the metrics endpoint
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Prometheus metric type
///
/// The default type is `Untyped` when not specified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MetricType {
    /// A value that can go up and down
    Gauge,
    /// A monotonically increasing value
    Counter,
    #[default]
    Untyped,
}

impl MetricType {
    /// Returns the Prometheus type string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Gauge => "gauge",
            MetricType::Counter => "counter",
            MetricType::Untyped => "untyped",
        }
    }
}

impl std::fmt::Display for MetricType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single Prometheus sample ready for output
#[derive(Debug, Clone, PartialEq)]
pub struct PrometheusMetric {
    /// Metric name
    pub name: String,
    /// Metric type (gauge, counter, untyped)
    pub metric_type: MetricType,
    /// Help text
    pub help: Option<String>,
    /// Labels, kept sorted by name
    pub labels: BTreeMap<String, String>,
    /// Sample value
    pub value: f64,
}

impl PrometheusMetric {
    /// Create a new sample
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            metric_type: MetricType::Untyped,
            help: None,
            labels: BTreeMap::new(),
            value,
        }
    }

    /// Set the metric type
    pub fn with_type(mut self, metric_type: MetricType) -> Self {
        self.metric_type = metric_type;
        self
    }

    /// Set help text
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Add a label
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// Prometheus exposition format formatter
///
/// # Example
///
/// ```ignore
/// use mqtt_exporter::transformer::{MetricType, PrometheusFormatter, PrometheusMetric};
///
/// let metrics = vec![
///     PrometheusMetric::new("mqtt_temperature", 21.5)
///         .with_type(MetricType::Gauge)
///         .with_label("room", "kitchen"),
/// ];
///
/// let output = PrometheusFormatter::new().format(&metrics);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct PrometheusFormatter;

impl PrometheusFormatter {
    /// Create a new formatter
    pub fn new() -> Self {
        Self
    }

    /// Format samples into Prometheus exposition format
    ///
    /// - HELP and TYPE lines are emitted once per unique metric name
    /// - Samples with the same name are grouped under the first occurrence
    pub fn format(&self, metrics: &[PrometheusMetric]) -> String {
        if metrics.is_empty() {
            return String::new();
        }

        let mut output = String::with_capacity(metrics.len() * 64);

        for (name, group) in Self::group_by_name(metrics) {
            // HELP comes from the first sample that carries one
            if let Some(help) = group.iter().find_map(|m| m.help.as_deref()) {
                output.push_str(&format!("# HELP {} {}\n", name, Self::escape_help(help)));
            }
            output.push_str(&format!(
                "# TYPE {} {}\n",
                name,
                group[0].metric_type.as_str()
            ));

            for metric in group {
                output.push_str(&Self::format_metric_line(metric));
                output.push('\n');
            }
        }

        output
    }

    /// Group samples by name, preserving order of first occurrence
    fn group_by_name(metrics: &[PrometheusMetric]) -> Vec<(&str, Vec<&PrometheusMetric>)> {
        let mut index: HashMap<&str, usize> = HashMap::new();
        let mut groups: Vec<(&str, Vec<&PrometheusMetric>)> = Vec::new();

        for metric in metrics {
            match index.get(metric.name.as_str()) {
                Some(&i) => groups[i].1.push(metric),
                None => {
                    index.insert(metric.name.as_str(), groups.len());
                    groups.push((metric.name.as_str(), vec![metric]));
                }
            }
        }

        groups
    }

    fn format_metric_line(metric: &PrometheusMetric) -> String {
        let mut line = metric.name.clone();

        if !metric.labels.is_empty() {
            let pairs: Vec<String> = metric
                .labels
                .iter()
                .map(|(k, v)| format!("{}=\"{}\"", k, Self::escape_label_value(v)))
                .collect();

            line.push('{');
            line.push_str(&pairs.join(","));
            line.push('}');
        }

        line.push(' ');
        line.push_str(&Self::format_value(metric.value));
        line
    }

    /// Format a numeric value for Prometheus
    ///
    /// - NaN → "NaN"
    /// - +Inf → "+Inf"
    /// - -Inf → "-Inf"
    /// - Integers are formatted without decimal point
    fn format_value(value: f64) -> String {
        if value.is_nan() {
            "NaN".to_string()
        } else if value.is_infinite() {
            if value.is_sign_positive() {
                "+Inf".to_string()
            } else {
                "-Inf".to_string()
            }
        } else if value.fract() == 0.0 && value.abs() < 1e15 {
            format!("{}", value as i64)
        } else if value.abs() >= 1e15 || (value.abs() < 1e-3 && value != 0.0) {
            format!("{:e}", value)
        } else {
            format!("{}", value)
        }
    }

    /// Escapes backslash and newline characters.
    fn escape_help(help: &str) -> String {
        help.replace('\\', "\\\\").replace('\n', "\\n")
    }

    /// Escapes backslash, double-quote, and newline characters.
    fn escape_label_value(value: &str) -> String {
        let mut escaped = String::with_capacity(value.len());
        for c in value.chars() {
            match c {
                '\\' => escaped.push_str("\\\\"),
                '"' => escaped.push_str("\\\""),
                '\n' => escaped.push_str("\\n"),
                _ => escaped.push(c),
            }
        }
        escaped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_gauge_with_labels() {
        let metrics = vec![PrometheusMetric::new("mqtt_temperature", 21.5)
            .with_type(MetricType::Gauge)
            .with_help("Room temperature")
            .with_label("room", "kitchen")
            .with_label("floor", "1")];

        let output = PrometheusFormatter::new().format(&metrics);

        assert!(output.contains("# HELP mqtt_temperature Room temperature\n"));
        assert!(output.contains("# TYPE mqtt_temperature gauge\n"));
        // Labels are sorted alphabetically
        assert!(output.contains("mqtt_temperature{floor=\"1\",room=\"kitchen\"} 21.5\n"));
    }

    #[test]
    fn test_type_line_emitted_once_per_name() {
        let metrics = vec![
            PrometheusMetric::new("mqtt_humidity", 40.0)
                .with_type(MetricType::Gauge)
                .with_label("room", "a"),
            PrometheusMetric::new("mqtt_other", 1.0).with_type(MetricType::Gauge),
            PrometheusMetric::new("mqtt_humidity", 55.0)
                .with_type(MetricType::Gauge)
                .with_label("room", "b"),
        ];

        let output = PrometheusFormatter::new().format(&metrics);

        assert_eq!(output.matches("# TYPE mqtt_humidity").count(), 1);
        let a = output.find("mqtt_humidity{room=\"a\"} 40").unwrap();
        let b = output.find("mqtt_humidity{room=\"b\"} 55").unwrap();
        let other = output.find("mqtt_other 1").unwrap();
        // Samples are grouped under their first occurrence
        assert!(a < b);
        assert!(b < other);
    }

    #[test]
    fn test_untyped_without_help() {
        let metrics = vec![PrometheusMetric::new("plain", 3.0)];
        let output = PrometheusFormatter::new().format(&metrics);

        assert!(!output.contains("# HELP"));
        assert!(output.contains("# TYPE plain untyped\n"));
        assert!(output.contains("plain 3\n"));
    }

    #[test]
    fn test_format_value() {
        assert_eq!(PrometheusFormatter::format_value(f64::NAN), "NaN");
        assert_eq!(PrometheusFormatter::format_value(f64::INFINITY), "+Inf");
        assert_eq!(PrometheusFormatter::format_value(f64::NEG_INFINITY), "-Inf");
        assert_eq!(PrometheusFormatter::format_value(42.0), "42");
        assert_eq!(PrometheusFormatter::format_value(-100.0), "-100");
        assert_eq!(PrometheusFormatter::format_value(0.0), "0");
        assert_eq!(PrometheusFormatter::format_value(1013.25), "1013.25");
        assert!(PrometheusFormatter::format_value(1.5e-6).contains('e'));
    }

    #[test]
    fn test_escaping() {
        assert_eq!(
            PrometheusFormatter::escape_help("line1\nline2"),
            "line1\\nline2"
        );
        assert_eq!(
            PrometheusFormatter::escape_label_value("all\"\\\n"),
            "all\\\"\\\\\\n"
        );

        let metrics = vec![PrometheusMetric::new("m", 1.0).with_label("name", "say \"hi\"")];
        let output = PrometheusFormatter::new().format(&metrics);
        assert!(output.contains("m{name=\"say \\\"hi\\\"\"} 1"));
    }

    #[test]
    fn test_format_empty_metrics() {
        assert!(PrometheusFormatter::new().format(&[]).is_empty());
    }
}
