//! Error types for the entity cache

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for cache construction and CLI operations
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Key-value store errors
///
/// These never reach callers of `EntityCache`; they are logged and the
/// operation degrades to its no-cache equivalent.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Cache store unavailable: {0}")]
    Unavailable(String),

    #[error("Cache store timed out after {0:?}")]
    Timeout(Duration),

    #[error("Cache store command failed: {0}")]
    Command(String),
}

impl StoreError {
    /// Whether the connection that produced this error should be dropped
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Timeout(_))
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            StoreError::Unavailable("Request timed out".to_string())
        } else if err.is_connection_refusal() {
            StoreError::Unavailable("Connection refused".to_string())
        } else if err.is_connection_dropped() || err.is_io_error() {
            StoreError::Unavailable(err.to_string())
        } else if err.kind() == redis::ErrorKind::AuthenticationFailed {
            StoreError::Unavailable("Authentication failed".to_string())
        } else {
            StoreError::Command(err.to_string())
        }
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Unknown entity type: {0}")]
    UnknownEntity(String),
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_unavailable_message() {
        let err = StoreError::Unavailable("Connection refused".to_string());
        assert!(err.to_string().contains("Connection refused"));
        assert!(err.is_unavailable());
    }

    #[test]
    fn test_store_error_timeout() {
        let err = StoreError::Timeout(Duration::from_millis(250));
        let msg = err.to_string();
        assert!(msg.contains("timed out"));
        assert!(msg.contains("250"));
        assert!(err.is_unavailable());
    }

    #[test]
    fn test_store_error_command_keeps_connection() {
        let err = StoreError::Command("WRONGTYPE".to_string());
        assert!(err.to_string().contains("WRONGTYPE"));
        assert!(!err.is_unavailable());
    }

    #[test]
    fn test_store_error_from_redis_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err: StoreError = redis::RedisError::from(io).into();
        assert!(err.is_unavailable());
    }

    #[test]
    fn test_store_error_from_redis_response_error() {
        let redis_err = redis::RedisError::from((redis::ErrorKind::TypeError, "bad type"));
        let err: StoreError = redis_err.into();
        match err {
            StoreError::Command(msg) => assert!(msg.contains("bad type")),
            other => panic!("Expected StoreError::Command, got {:?}", other),
        }
    }

    #[test]
    fn test_config_error_not_found() {
        let err = ConfigError::NotFound(PathBuf::from("/etc/cep/config.yaml"));
        assert!(err.to_string().contains("/etc/cep/config.yaml"));
    }

    #[test]
    fn test_config_error_unknown_entity() {
        let err = ConfigError::UnknownEntity("widgets".to_string());
        assert!(err.to_string().contains("widgets"));
    }

    #[test]
    fn test_error_from_store_error() {
        let err: Error = StoreError::Unavailable("down".to_string()).into();
        match err {
            Error::Store(StoreError::Unavailable(_)) => (),
            _ => panic!("Expected Error::Store(StoreError::Unavailable)"),
        }
    }

    #[test]
    fn test_error_from_config_error() {
        let err: Error = ConfigError::Invalid("bad".to_string()).into();
        match err {
            Error::Config(ConfigError::Invalid(_)) => (),
            _ => panic!("Expected Error::Config(ConfigError::Invalid)"),
        }
    }

    #[test]
    fn test_config_error_from_yaml_error() {
        let yaml_str = "invalid: [yaml: content";
        let yaml_err = serde_yaml::from_str::<serde_yaml::Value>(yaml_str).unwrap_err();
        let config_err: ConfigError = yaml_err.into();

        match config_err {
            ConfigError::ParseError(_) => (),
            _ => panic!("Expected ConfigError::ParseError"),
        }
    }
}
