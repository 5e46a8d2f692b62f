//! Statistics collector configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a [`StatisticsCollector`](crate::collector::StatisticsCollector)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsConfig {
    /// Take a historical snapshot every N milliseconds
    #[serde(default = "default_collection_interval_ms")]
    pub collection_interval_ms: u64,

    /// Run retention cleanup every N milliseconds
    #[serde(default = "default_cleanup_interval_ms")]
    pub cleanup_interval_ms: u64,

    /// Maximum age of operation records and historical points, in seconds
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    /// Maximum number of historical points kept
    #[serde(default = "default_max_history_points")]
    pub max_history_points: usize,

    /// Maximum number of operation records kept
    #[serde(default = "default_max_operations")]
    pub max_operations: usize,

    /// Maximum number of alerts kept
    #[serde(default = "default_max_alerts")]
    pub max_alerts: usize,

    /// Raw latency samples are truncated once they exceed this count
    #[serde(default = "default_latency_sample_limit")]
    pub latency_sample_limit: usize,

    /// Number of most recent latency samples kept after truncation
    #[serde(default = "default_latency_sample_keep")]
    pub latency_sample_keep: usize,

    /// Alert thresholds
    #[serde(default)]
    pub alerts: AlertThresholds,
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self {
            collection_interval_ms: default_collection_interval_ms(),
            cleanup_interval_ms: default_cleanup_interval_ms(),
            retention_secs: default_retention_secs(),
            max_history_points: default_max_history_points(),
            max_operations: default_max_operations(),
            max_alerts: default_max_alerts(),
            latency_sample_limit: default_latency_sample_limit(),
            latency_sample_keep: default_latency_sample_keep(),
            alerts: AlertThresholds::default(),
        }
    }
}

fn default_collection_interval_ms() -> u64 {
    60_000 // One snapshot per minute
}

fn default_cleanup_interval_ms() -> u64 {
    3_600_000 // Hourly
}

fn default_retention_secs() -> u64 {
    7 * 24 * 3600 // One week
}

fn default_max_history_points() -> usize {
    10_080 // One week of minute snapshots
}

fn default_max_operations() -> usize {
    10_000
}

fn default_max_alerts() -> usize {
    100
}

fn default_latency_sample_limit() -> usize {
    10_000
}

fn default_latency_sample_keep() -> usize {
    5_000
}

impl StatisticsConfig {
    /// Historical collection period
    pub fn collection_interval(&self) -> Duration {
        Duration::from_millis(self.collection_interval_ms)
    }

    /// Retention cleanup period
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    /// Retention age
    pub fn retention(&self) -> chrono::TimeDelta {
        chrono::TimeDelta::seconds(self.retention_secs.min(i64::MAX as u64) as i64)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.collection_interval_ms == 0 {
            return Err("collection_interval_ms must be greater than 0".to_string());
        }
        if self.cleanup_interval_ms == 0 {
            return Err("cleanup_interval_ms must be greater than 0".to_string());
        }
        if self.retention_secs == 0 {
            return Err("retention_secs must be at least 1".to_string());
        }
        if self.max_history_points == 0 {
            return Err("max_history_points must be greater than 0".to_string());
        }
        if self.max_operations == 0 {
            return Err("max_operations must be greater than 0".to_string());
        }
        if self.latency_sample_keep > self.latency_sample_limit {
            return Err("latency_sample_keep must not exceed latency_sample_limit".to_string());
        }
        self.alerts.validate()
    }

    /// Merge a partial update into this configuration
    pub fn merge(&mut self, update: StatisticsConfigUpdate) {
        if let Some(v) = update.collection_interval_ms {
            self.collection_interval_ms = v;
        }
        if let Some(v) = update.cleanup_interval_ms {
            self.cleanup_interval_ms = v;
        }
        if let Some(v) = update.retention_secs {
            self.retention_secs = v;
        }
        if let Some(v) = update.max_history_points {
            self.max_history_points = v;
        }
        if let Some(v) = update.max_alerts {
            self.max_alerts = v;
        }
        if let Some(alerts) = update.alerts {
            self.alerts = alerts;
        }
    }
}

/// Partial configuration accepted by `StatisticsCollector::configure`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatisticsConfigUpdate {
    #[serde(default)]
    pub collection_interval_ms: Option<u64>,
    #[serde(default)]
    pub cleanup_interval_ms: Option<u64>,
    #[serde(default)]
    pub retention_secs: Option<u64>,
    #[serde(default)]
    pub max_history_points: Option<usize>,
    #[serde(default)]
    pub max_alerts: Option<usize>,
    #[serde(default)]
    pub alerts: Option<AlertThresholds>,
}

/// Thresholds that raise performance alerts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertThresholds {
    /// An operation at or above this latency raises a warning
    #[serde(default = "default_latency_warning_ms")]
    pub latency_warning_ms: f64,

    /// An operation at or above this latency raises a critical alert
    #[serde(default = "default_latency_critical_ms")]
    pub latency_critical_ms: f64,

    /// Rolling error rate (0.0-1.0) above which a warning is raised
    #[serde(default = "default_error_rate_warning")]
    pub error_rate_warning: f64,

    /// Rolling error rate (0.0-1.0) above which a critical alert is raised
    #[serde(default = "default_error_rate_critical")]
    pub error_rate_critical: f64,

    /// Width of the rolling error-rate window in seconds
    #[serde(default = "default_error_rate_window_secs")]
    pub error_rate_window_secs: u64,

    /// Minimum operations in the window before the error rate is judged
    #[serde(default = "default_error_rate_min_samples")]
    pub error_rate_min_samples: usize,

    /// Memory growth between two snapshots (percent) that raises a warning
    #[serde(default = "default_memory_growth_percent")]
    pub memory_growth_percent: f64,

    /// Fragmentation ratio (0.0-1.0) that raises a warning
    #[serde(default = "default_fragmentation_ratio")]
    pub fragmentation_ratio: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            latency_warning_ms: default_latency_warning_ms(),
            latency_critical_ms: default_latency_critical_ms(),
            error_rate_warning: default_error_rate_warning(),
            error_rate_critical: default_error_rate_critical(),
            error_rate_window_secs: default_error_rate_window_secs(),
            error_rate_min_samples: default_error_rate_min_samples(),
            memory_growth_percent: default_memory_growth_percent(),
            fragmentation_ratio: default_fragmentation_ratio(),
        }
    }
}

fn default_latency_warning_ms() -> f64 {
    5_000.0
}

fn default_latency_critical_ms() -> f64 {
    10_000.0
}

fn default_error_rate_warning() -> f64 {
    0.2
}

fn default_error_rate_critical() -> f64 {
    0.5
}

fn default_error_rate_window_secs() -> u64 {
    60
}

fn default_error_rate_min_samples() -> usize {
    1
}

fn default_memory_growth_percent() -> f64 {
    50.0
}

fn default_fragmentation_ratio() -> f64 {
    0.3
}

impl AlertThresholds {
    /// Validate threshold ordering and ranges
    pub fn validate(&self) -> Result<(), String> {
        if self.latency_warning_ms <= 0.0 {
            return Err("latency_warning_ms must be greater than 0".to_string());
        }
        if self.latency_critical_ms < self.latency_warning_ms {
            return Err("latency_critical_ms must not be below latency_warning_ms".to_string());
        }
        if !(0.0..=1.0).contains(&self.error_rate_warning) {
            return Err("error_rate_warning must be between 0.0 and 1.0".to_string());
        }
        if !(0.0..=1.0).contains(&self.error_rate_critical) {
            return Err("error_rate_critical must be between 0.0 and 1.0".to_string());
        }
        if self.error_rate_critical < self.error_rate_warning {
            return Err("error_rate_critical must not be below error_rate_warning".to_string());
        }
        if self.error_rate_window_secs == 0 {
            return Err("error_rate_window_secs must be greater than 0".to_string());
        }
        if !(0.0..=1.0).contains(&self.fragmentation_ratio) {
            return Err("fragmentation_ratio must be between 0.0 and 1.0".to_string());
        }
        Ok(())
    }
}
