//! Session manager configuration

use filterkeep_core::{Error, Result};
use filterkeep_observability::{LoggingConfig, StatisticsConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error};

/// What an idle sweep does when tearing down a session fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepFailurePolicy {
    /// Log the failure and continue with the remaining sessions
    #[default]
    Isolate,
    /// Abort the sweep and surface the first failure
    Propagate,
}

/// Configuration for a [`SessionManager`](crate::SessionManager)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionManagerConfig {
    /// Sessions untouched for longer than this are evicted
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    /// Run the idle sweep every N milliseconds
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    #[serde(default)]
    pub sweep_failure_policy: SweepFailurePolicy,

    /// Initial configuration of every session's statistics collector
    #[serde(default)]
    pub statistics: StatisticsConfig,

    /// Start each collector's background tasks when its session is created
    #[serde(default = "default_true")]
    pub start_collectors: bool,

    /// Mirror operations, alerts and session lifecycle into Prometheus
    #[serde(default = "default_true")]
    pub prometheus_enabled: bool,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: default_idle_timeout_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
            sweep_failure_policy: SweepFailurePolicy::default(),
            statistics: StatisticsConfig::default(),
            start_collectors: true,
            prometheus_enabled: true,
        }
    }
}

fn default_idle_timeout_ms() -> u64 {
    3_600_000 // One hour
}

fn default_sweep_interval_ms() -> u64 {
    300_000 // Every five minutes
}

fn default_true() -> bool {
    true
}

impl SessionManagerConfig {
    pub fn idle_timeout(&self) -> chrono::TimeDelta {
        chrono::TimeDelta::milliseconds(self.idle_timeout_ms.min(i64::MAX as u64) as i64)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.idle_timeout_ms == 0 {
            return Err("idle_timeout_ms must be greater than 0".to_string());
        }
        if self.sweep_interval_ms == 0 {
            return Err("sweep_interval_ms must be greater than 0".to_string());
        }
        self.statistics
            .validate()
            .map_err(|e| format!("statistics: {}", e))
    }
}

/// Top-level configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterKeepConfig {
    #[serde(default)]
    pub sessions: SessionManagerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl FilterKeepConfig {
    /// Load from a YAML or TOML file, chosen by extension
    ///
    /// A leading `~` is expanded to the home directory. Files without a
    /// `.toml` extension are read as YAML.
    ///
    /// # Errors
    /// - `Error::ConfigNotFound` if the file does not exist
    /// - `Error::InvalidConfig` if it does not parse or fails validation
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = expand_home(path.as_ref())?;
        if !path.exists() {
            return Err(Error::ConfigNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(&path).map_err(|e| {
            error!("Failed to read config file: {}", e);
            Error::Io(e)
        })?;

        let config = if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            Self::from_toml(&contents)?
        } else {
            Self::from_yaml(&contents)?
        };

        debug!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(contents).map_err(|e| {
            error!("Failed to parse YAML config: {}", e);
            Error::InvalidConfig(format!("Invalid YAML: {}", e))
        })?;
        config.validate().map_err(Error::InvalidConfig)?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents).map_err(|e| {
            error!("Failed to parse TOML config: {}", e);
            Error::InvalidConfig(format!("Invalid TOML: {}", e))
        })?;
        config.validate().map_err(Error::InvalidConfig)?;
        Ok(config)
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        self.sessions.validate()?;
        self.logging.validate()
    }
}

fn expand_home(path: &Path) -> Result<PathBuf> {
    match path.strip_prefix("~") {
        Ok(rest) => Ok(dirs::home_dir()
            .ok_or_else(|| {
                Error::InvalidConfig("Could not determine home directory".to_string())
            })?
            .join(rest)),
        Err(_) => Ok(path.to_path_buf()),
    }
}
