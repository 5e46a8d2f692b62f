//! Global tracing subscriber setup

use filterkeep_core::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error; may also be a full `EnvFilter` directive
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable text
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl LoggingConfig {
    /// Build the filter for this configuration
    pub fn env_filter(&self) -> Result<EnvFilter> {
        EnvFilter::try_new(self.level.to_lowercase())
            .map_err(|e| Error::InvalidConfig(format!("Invalid log level '{}': {}", self.level, e)))
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        self.env_filter().map(|_| ()).map_err(|e| e.to_string())
    }
}

/// Install the global subscriber
///
/// Fails if the level does not parse or a global subscriber is already set.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = config.env_filter()?;

    let installed = if config.json {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)
    } else {
        let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
        tracing::subscriber::set_global_default(subscriber)
    };

    installed.map_err(|e| Error::Initialization(format!("Failed to install logging: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_default_config() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "info");
        assert!(!config.json);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_directive_levels_are_accepted() {
        let config = LoggingConfig {
            level: "filterkeep_session=debug,warn".to_string(),
            json: true,
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_level_is_rejected() {
        let config = LoggingConfig {
            level: "filterkeep=verbose".to_string(),
            json: false,
        };
        assert!(matches!(config.env_filter(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    #[serial]
    fn test_second_install_fails() {
        let config = LoggingConfig::default();
        // Another test in this binary may already have installed one
        let _ = init_logging(&config);
        assert!(matches!(
            init_logging(&config),
            Err(Error::Initialization(_))
        ));
    }
}
