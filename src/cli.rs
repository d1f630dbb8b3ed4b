//! CLI argument parsing for mqtt-exporter
//!
//! This module provides the command-line interface using clap derive macros.
//!
//! # Options
//!
//! - `--config` / `-c`: Configuration file path (default: mqtt.yaml, env: MQTT_EXPORTER_CONFIG)
//! - `--port` / `-p`: Server port (overrides config file, env: MQTT_EXPORTER_PORT)
//! - `--bind-address`: Server bind address (env: MQTT_EXPORTER_BIND_ADDRESS)
//! - `--metrics-path`: Metrics endpoint path (env: MQTT_EXPORTER_METRICS_PATH)
//! - `--mqtt-broker`: MQTT broker URL (env: MQTT_EXPORTER_MQTT_BROKER)
//! - `--namespace`: Metric namespace (env: MQTT_EXPORTER_NAMESPACE)
//! - `--validate`: Validate configuration without starting server
//! - `--dry-run`: Compile the rules and show them
//! - `--log-level` / `-l`: Log level (trace/debug/info/warn/error, env: MQTT_EXPORTER_LOG_LEVEL)
//! - `--output-format`: Output format for validate/dry-run (text/json/yaml)
//!
//! # Precedence
//!
//! Configuration values are resolved in the following order (highest to lowest priority):
//! 1. CLI arguments
//! 2. Environment variables
//! 3. Configuration file
//! 4. Default values

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::config::Config;

/// mqtt-exporter - Prometheus exporter for MQTT messages
///
/// Subscribes to MQTT topics and turns incoming messages into
/// Prometheus gauges according to declarative rules.
///
/// Environment variables can be used for all configuration options.
/// CLI arguments take precedence over environment variables,
/// which take precedence over config file values.
#[derive(Parser, Debug)]
#[command(name = "mqtt-exporter")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        value_name = "FILE",
        default_value = "mqtt.yaml",
        env = "MQTT_EXPORTER_CONFIG"
    )]
    pub config: PathBuf,

    /// Server port (overrides config file)
    #[arg(short, long, value_name = "PORT", env = "MQTT_EXPORTER_PORT")]
    pub port: Option<u16>,

    /// Server bind address (overrides config file)
    /// Supported values: IP addresses (0.0.0.0, 127.0.0.1, ::1) or "localhost"
    #[arg(long, value_name = "ADDRESS", env = "MQTT_EXPORTER_BIND_ADDRESS")]
    pub bind_address: Option<String>,

    /// Metrics endpoint path (overrides config file)
    /// Must start with '/' and not conflict with '/' or '/health'
    #[arg(long, value_name = "PATH", env = "MQTT_EXPORTER_METRICS_PATH")]
    pub metrics_path: Option<String>,

    /// MQTT broker URL, e.g. tcp://localhost:1883 (overrides config file)
    #[arg(long, value_name = "URL", env = "MQTT_EXPORTER_MQTT_BROKER")]
    pub mqtt_broker: Option<String>,

    /// Metric namespace prepended to every rule name (overrides config file)
    #[arg(long, value_name = "NAMESPACE", env = "MQTT_EXPORTER_NAMESPACE")]
    pub namespace: Option<String>,

    /// Validate configuration without starting server
    #[arg(long)]
    pub validate: bool,

    /// Compile the rules and show them without connecting
    #[arg(long)]
    pub dry_run: bool,

    /// Log level
    #[arg(
        short,
        long,
        value_enum,
        default_value = "info",
        env = "MQTT_EXPORTER_LOG_LEVEL"
    )]
    pub log_level: LogLevel,

    /// Output format for --validate and --dry-run
    #[arg(long, value_enum, default_value = "text")]
    pub output_format: OutputFormat,
}

impl Cli {
    /// Apply command-line and environment overrides on top of a loaded config
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(ref bind_address) = self.bind_address {
            config.server.bind_address = bind_address.clone();
        }
        if let Some(ref path) = self.metrics_path {
            config.server.path = path.clone();
        }
        if let Some(ref broker) = self.mqtt_broker {
            config.mqtt.broker = broker.clone();
        }
        if let Some(ref namespace) = self.namespace {
            config.metrics.namespace = namespace.clone();
        }
    }
}

/// Log level options
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    /// Trace level - most verbose
    Trace,
    /// Debug level
    Debug,
    /// Info level - default
    Info,
    /// Warn level
    Warn,
    /// Error level - least verbose
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// Output format options for validate and dry-run modes
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output
    Json,
    /// YAML output
    Yaml,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Yaml => write!(f, "yaml"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_display() {
        assert_eq!(LogLevel::Trace.to_string(), "trace");
        assert_eq!(LogLevel::Info.to_string(), "info");
        assert_eq!(LogLevel::Error.to_string(), "error");
    }

    #[test]
    fn test_output_format_display() {
        assert_eq!(OutputFormat::Text.to_string(), "text");
        assert_eq!(OutputFormat::Json.to_string(), "json");
        assert_eq!(OutputFormat::Yaml.to_string(), "yaml");
    }

    #[test]
    fn test_cli_with_options() {
        let cli = Cli::try_parse_from([
            "mqtt-exporter",
            "-c",
            "custom.yaml",
            "-p",
            "8080",
            "--log-level",
            "debug",
            "--validate",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("custom.yaml"));
        assert_eq!(cli.port, Some(8080));
        assert_eq!(cli.log_level, LogLevel::Debug);
        assert!(cli.validate);
        assert!(!cli.dry_run);
    }

    #[test]
    fn test_cli_dry_run() {
        let cli =
            Cli::try_parse_from(["mqtt-exporter", "--dry-run", "--output-format", "json"]).unwrap();
        assert!(cli.dry_run);
        assert_eq!(cli.output_format, OutputFormat::Json);
    }

    #[test]
    fn test_apply_overrides() {
        let cli = Cli::try_parse_from([
            "mqtt-exporter",
            "--port",
            "9100",
            "--bind-address",
            "127.0.0.1",
            "--metrics-path",
            "/custom-metrics",
            "--mqtt-broker",
            "mqtt://broker:1884",
            "--namespace",
            "home",
        ])
        .unwrap();

        let mut config = Config::default();
        cli.apply_overrides(&mut config);

        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.bind_address, "127.0.0.1");
        assert_eq!(config.server.path, "/custom-metrics");
        assert_eq!(config.mqtt.broker, "mqtt://broker:1884");
        assert_eq!(config.metrics.namespace, "home");
    }

    #[test]
    fn test_apply_overrides_keeps_file_values() {
        let cli = Cli::try_parse_from(["mqtt-exporter"]).unwrap();

        let mut config = Config::default();
        config.server.port = 7000;
        config.metrics.namespace = "plant".to_string();
        cli.apply_overrides(&mut config);

        assert_eq!(config.server.port, 7000);
        assert_eq!(config.metrics.namespace, "plant");
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        assert!(Cli::try_parse_from(["mqtt-exporter", "--log-level", "loud"]).is_err());
    }
}
