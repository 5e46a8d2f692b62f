//! Error types for FilterKeep Core

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Filter not found: {0}")]
    NotFound(String),

    #[error("Insufficient data: need at least {required} data points, found {actual}")]
    InsufficientData { required: usize, actual: usize },

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Initialization failed: {0}")]
    Initialization(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration not found: {0}")]
    ConfigNotFound(String),

    #[error("Import error: {0}")]
    Import(String),

    // Session lifecycle errors
    #[error("Teardown of session {session_key} failed: {reason}")]
    Teardown { session_key: String, reason: String },

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable, label-safe name of the error variant
    ///
    /// Used as the `error_kind` of failed operation metrics and as a
    /// Prometheus label value, so it must never change for a variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::InsufficientData { .. } => "insufficient_data",
            Error::UnsupportedFormat(_) => "unsupported_format",
            Error::Initialization(_) => "initialization",
            Error::InvalidConfig(_) => "invalid_config",
            Error::ConfigNotFound(_) => "config_not_found",
            Error::Import(_) => "import",
            Error::Teardown { .. } => "teardown",
            Error::Internal(_) => "internal",
            Error::Serialization(_) => "serialization",
            Error::Io(_) => "io",
        }
    }

    /// Whether the caller is expected to handle this as a normal outcome
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::NotFound(_) | Error::InsufficientData { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_labels() {
        assert_eq!(Error::NotFound("abc".to_string()).kind(), "not_found");
        assert_eq!(
            Error::InsufficientData {
                required: 2,
                actual: 1
            }
            .kind(),
            "insufficient_data"
        );
        assert_eq!(
            Error::UnsupportedFormat("xml".to_string()).kind(),
            "unsupported_format"
        );
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(Error::NotFound("abc".to_string()).is_recoverable());
        assert!(
            Error::InsufficientData {
                required: 2,
                actual: 0
            }
            .is_recoverable()
        );
        assert!(!Error::Initialization("boom".to_string()).is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let err = Error::InsufficientData {
            required: 2,
            actual: 1,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient data: need at least 2 data points, found 1"
        );

        let err = Error::Teardown {
            session_key: "s1".to_string(),
            reason: "hook failed".to_string(),
        };
        assert!(err.to_string().contains("s1"));
    }
}
