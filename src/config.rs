//! Configuration management for mqtt-exporter
//!
//! Handles loading and validating configuration from YAML files.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::transformer::RuleSpec;

/// Broker URL schemes understood by the MQTT client
const SUPPORTED_SCHEMES: &[&str] = &["tcp", "mqtt"];

/// Smallest keep-alive interval accepted by the MQTT client
const MIN_KEEP_ALIVE_SECS: u64 = 5;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Error reading the configuration file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Error parsing the configuration file
    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// Configuration validation error
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// MQTT broker connection
    #[serde(default)]
    pub mqtt: MqttConfig,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Metric naming and storage
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Rules grouped by MQTT topic filter
    #[serde(default)]
    pub topics: BTreeMap<String, Vec<RuleSpec>>,
}

/// MQTT broker connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Broker URL (`tcp://host:port` or `mqtt://host:port`)
    #[serde(default = "default_broker")]
    pub broker: String,

    /// Client identifier presented to the broker
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Keep-alive interval in seconds
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Metrics endpoint path
    #[serde(default = "default_metrics_path")]
    pub path: String,

    /// Server bind address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

/// Metric naming and storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Prefix joined to every rule name with `_`
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Label combinations kept per metric before the least recently
    /// written one is evicted (0 = unbounded)
    #[serde(default)]
    pub max_series_per_metric: usize,
}

// Default value functions
fn default_broker() -> String {
    "tcp://localhost:1883".to_string()
}

fn default_client_id() -> String {
    "mqtt-exporter".to_string()
}

fn default_keep_alive() -> u64 {
    30
}

fn default_port() -> u16 {
    9999
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_namespace() -> String {
    "mqtt".to_string()
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker: default_broker(),
            client_id: default_client_id(),
            keep_alive_secs: default_keep_alive(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            path: default_metrics_path(),
            bind_address: default_bind_address(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            max_series_per_metric: 0,
        }
    }
}

impl MqttConfig {
    /// Split the broker URL into host and port
    ///
    /// The port defaults to 1883 when the URL does not carry one.
    pub fn broker_address(&self) -> Result<(String, u16), ConfigError> {
        let url = Url::parse(&self.broker).map_err(|e| {
            ConfigError::ValidationError(format!("Invalid MQTT broker URL '{}': {}", self.broker, e))
        })?;

        if !SUPPORTED_SCHEMES.contains(&url.scheme()) {
            return Err(ConfigError::ValidationError(format!(
                "Unsupported MQTT broker scheme '{}', expected one of: {}",
                url.scheme(),
                SUPPORTED_SCHEMES.join(", ")
            )));
        }

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| {
                ConfigError::ValidationError(format!(
                    "MQTT broker URL '{}' has no host",
                    self.broker
                ))
            })?;

        Ok((host.to_string(), url.port().unwrap_or(1883)))
    }
}

impl Config {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed, or validated
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&contents)
    }

    /// Parse and validate configuration from a YAML string
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// Rules are checked separately when they are compiled.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::ValidationError(
                "Server port must be greater than 0".to_string(),
            ));
        }

        if !self.server.path.starts_with('/') {
            return Err(ConfigError::ValidationError(
                "Metrics path must start with '/'".to_string(),
            ));
        }

        if self.server.path == "/" || self.server.path == "/health" {
            return Err(ConfigError::ValidationError(format!(
                "Metrics path '{}' collides with a built-in route",
                self.server.path
            )));
        }

        self.mqtt.broker_address()?;

        if self.mqtt.keep_alive_secs < MIN_KEEP_ALIVE_SECS {
            return Err(ConfigError::ValidationError(format!(
                "MQTT keep-alive must be at least {} seconds",
                MIN_KEEP_ALIVE_SECS
            )));
        }

        if self.mqtt.client_id.is_empty() {
            return Err(ConfigError::ValidationError(
                "MQTT client id must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 9999);
        assert_eq!(config.server.path, "/metrics");
        assert_eq!(config.mqtt.broker, "tcp://localhost:1883");
        assert_eq!(config.metrics.namespace, "mqtt");
        assert_eq!(config.metrics.max_series_per_metric, 0);
        assert!(config.topics.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
mqtt:
  broker: "mqtt://broker.local:1884"
  client_id: "exporter-1"
server:
  port: 9100
metrics:
  namespace: "home"
  max_series_per_metric: 100
topics:
  "sensors/+/temp":
    - name: temperature_celsius
      help: "Temperature"
      match: "sensors/(\\w+)/temp"
      value: "{{ .Payload }}"
      labels:
        room: "{{ index .Captures 0 }}"
  "power/meter":
    - name: power_watts
"#;
        let config = Config::from_yaml(yaml).unwrap();

        assert_eq!(
            config.mqtt.broker_address().unwrap(),
            ("broker.local".to_string(), 1884)
        );
        assert_eq!(config.mqtt.keep_alive_secs, 30);
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.path, "/metrics");
        assert_eq!(config.metrics.namespace, "home");
        assert_eq!(config.metrics.max_series_per_metric, 100);

        let rules = &config.topics["sensors/+/temp"];
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].pattern.as_deref(), Some("sensors/(\\w+)/temp"));
        assert_eq!(rules[0].labels["room"], "{{ index .Captures 0 }}");

        let plain = &config.topics["power/meter"][0];
        assert_eq!(plain.name, "power_watts");
        assert!(plain.value.is_none());
        assert!(plain.labels.is_empty());
    }

    #[test]
    fn test_broker_default_port() {
        let mqtt = MqttConfig {
            broker: "tcp://10.0.0.5".to_string(),
            ..MqttConfig::default()
        };
        assert_eq!(mqtt.broker_address().unwrap(), ("10.0.0.5".to_string(), 1883));
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.server.path = "metrics".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.server.path = "/health".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.mqtt.broker = "http://localhost:1883".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.mqtt.broker = "not a url".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.mqtt.keep_alive_secs = 2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_rule_field_type() {
        let yaml = r#"
topics:
  "a/b":
    - name: 42x
      labels: "not a map"
"#;
        assert!(matches!(
            Config::from_yaml(yaml),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_load_missing_file_is_an_error() {
        assert!(matches!(
            Config::load("/nonexistent/mqtt-exporter.yaml"),
            Err(ConfigError::ReadError(_))
        ));
    }
}
