//! Error types for mqtt-exporter
//!
//! Each module defines its own error enum next to the code that raises it.
//! This module gathers the startup failures into the application-level
//! `AppError`.

use thiserror::Error;

use crate::config::ConfigError;
use crate::transformer::RuleError;
use crate::transport::TransportError;

/// Application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// 설정 파일 에러
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// 규칙 컴파일 및 게이지 등록 에러
    #[error("Rule error: {0}")]
    Rule(#[from] RuleError),

    /// MQTT 연결 및 구독 에러
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistryError;

    #[test]
    fn test_from_conversions() {
        let err: AppError = ConfigError::ValidationError("bad port".to_string()).into();
        assert!(matches!(err, AppError::Config(_)));
        assert!(err.to_string().contains("bad port"));

        let err: AppError = RuleError::Registry(RegistryError::Duplicate {
            name: "mqtt_temp".to_string(),
        })
        .into();
        assert!(matches!(err, AppError::Rule(RuleError::Registry(_))));
        assert!(err.to_string().starts_with("Rule error"));
        assert!(err.to_string().contains("mqtt_temp"));

        let err: AppError = TransportError::Config(ConfigError::ValidationError(
            "no host".to_string(),
        ))
        .into();
        assert!(err.to_string().starts_with("Transport error"));
    }
}
