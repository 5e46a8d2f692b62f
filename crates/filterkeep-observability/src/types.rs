//! Statistics data types
//!
//! Snapshots, historical points, alerts, aggregation and trend results
//! produced by the statistics collector.

use chrono::{DateTime, TimeDelta, Utc};
use filterkeep_core::{Error, OperationKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::percentile::LatencyPercentiles;

/// One periodic snapshot of aggregate store state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalMetrics {
    pub timestamp: DateTime<Utc>,
    /// Live record count at snapshot time
    pub filter_count: usize,
    /// Operations completed since the previous snapshot
    pub operation_count: u64,
    /// Failed operations since the previous snapshot
    pub error_count: u64,
    /// Mean latency of those operations in milliseconds
    pub average_latency_ms: f64,
    #[serde(default)]
    pub memory_usage_bytes: Option<u64>,
    #[serde(default)]
    pub storage_size_bytes: Option<u64>,
    /// Sessions alive in the owning manager
    pub active_sessions: usize,
}

impl HistoricalMetrics {
    /// Empty point at `timestamp`
    pub fn at(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            filter_count: 0,
            operation_count: 0,
            error_count: 0,
            average_latency_ms: 0.0,
            memory_usage_bytes: None,
            storage_size_bytes: None,
            active_sessions: 0,
        }
    }

    /// Value of a trend metric at this point, if recorded
    pub fn value(&self, metric: TrendMetric) -> Option<f64> {
        let value = match metric {
            TrendMetric::FilterCount => Some(self.filter_count as f64),
            TrendMetric::OperationCount => Some(self.operation_count as f64),
            TrendMetric::ErrorCount => Some(self.error_count as f64),
            TrendMetric::AverageLatency => Some(self.average_latency_ms),
            TrendMetric::MemoryUsage => self.memory_usage_bytes.map(|v| v as f64),
            TrendMetric::StorageSize => self.storage_size_bytes.map(|v| v as f64),
            TrendMetric::ActiveSessions => Some(self.active_sessions as f64),
        };
        value.filter(|v| v.is_finite())
    }

    /// Overwrite one field from a trend-metric value
    pub fn set(&mut self, metric: TrendMetric, value: f64) {
        let count = value.max(0.0).round();
        match metric {
            TrendMetric::FilterCount => self.filter_count = count as usize,
            TrendMetric::OperationCount => self.operation_count = count as u64,
            TrendMetric::ErrorCount => self.error_count = count as u64,
            TrendMetric::AverageLatency => self.average_latency_ms = value,
            TrendMetric::MemoryUsage => self.memory_usage_bytes = Some(count as u64),
            TrendMetric::StorageSize => self.storage_size_bytes = Some(count as u64),
            TrendMetric::ActiveSessions => self.active_sessions = count as usize,
        }
    }
}

/// Alert category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    HighLatency,
    ErrorSpike,
    MemoryGrowth,
    Fragmentation,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::HighLatency => "high_latency",
            AlertKind::ErrorSpike => "error_spike",
            AlertKind::MemoryGrowth => "memory_growth",
            AlertKind::Fragmentation => "fragmentation",
        }
    }
}

/// Alert severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Critical => "critical",
        }
    }
}

/// A threshold crossing; immutable once created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceAlert {
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub threshold: f64,
    pub observed: f64,
    pub timestamp: DateTime<Utc>,
    pub session_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
}

/// Derived health state of a collector
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthState {
    pub is_healthy: bool,
    pub consecutive_failures: u32,
    #[serde(default)]
    pub last_failure_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_recovery_at: Option<DateTime<Utc>>,
}

/// Live statistics for one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsSnapshot {
    pub session_key: String,
    pub timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub filter_count: usize,
    pub total_operations: u64,
    pub successful_operations: u64,
    pub failed_operations: u64,
    pub total_duration_ms: f64,
    pub average_duration_ms: f64,
    pub min_duration_ms: f64,
    pub max_duration_ms: f64,
    pub latency: LatencyPercentiles,
    /// Fraction of successful operations (1.0 when there are none)
    pub success_rate: f64,
    /// Fraction of failed operations
    pub error_rate: f64,
    /// Operations per hour since the collector started
    pub throughput_per_hour: f64,
    pub operations_by_kind: BTreeMap<OperationKind, u64>,
    pub errors_by_kind: BTreeMap<String, u64>,
    #[serde(default)]
    pub memory_usage_bytes: Option<u64>,
    #[serde(default)]
    pub storage_size_bytes: Option<u64>,
    #[serde(default)]
    pub compression_ratio: Option<f64>,
    #[serde(default)]
    pub fragmentation_ratio: Option<f64>,
    pub health: HealthState,
    pub history: Vec<HistoricalMetrics>,
}

/// Look-back window for aggregated statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationPeriod {
    Hour,
    Day,
    Week,
    Month,
}

impl AggregationPeriod {
    /// Window length; a month is 30 days
    pub fn duration(&self) -> TimeDelta {
        match self {
            AggregationPeriod::Hour => TimeDelta::hours(1),
            AggregationPeriod::Day => TimeDelta::days(1),
            AggregationPeriod::Week => TimeDelta::weeks(1),
            AggregationPeriod::Month => TimeDelta::days(30),
        }
    }

    pub fn hours(&self) -> f64 {
        self.duration().num_seconds() as f64 / 3600.0
    }
}

impl FromStr for AggregationPeriod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s.to_lowercase().as_str() {
            "hour" => Ok(AggregationPeriod::Hour),
            "day" => Ok(AggregationPeriod::Day),
            "week" => Ok(AggregationPeriod::Week),
            "month" => Ok(AggregationPeriod::Month),
            other => Err(Error::InvalidConfig(format!(
                "Invalid aggregation period '{}'. Use hour, day, week or month",
                other
            ))),
        }
    }
}

/// Statistics recomputed over a look-back window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedStats {
    pub period: AggregationPeriod,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub operation_count: u64,
    pub error_count: u64,
    pub error_rate: f64,
    pub average_latency_ms: f64,
    pub peak_latency_ms: f64,
    /// Operations per hour across the window
    pub throughput_per_hour: f64,
    /// Percent change of memory usage per hour (first to last point in window)
    pub memory_growth_rate: f64,
    /// Percent change of storage size per hour (first to last point in window)
    pub storage_growth_rate: f64,
    pub history_points: usize,
}

/// Historical series that can be trend-analyzed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendMetric {
    FilterCount,
    OperationCount,
    ErrorCount,
    AverageLatency,
    MemoryUsage,
    StorageSize,
    ActiveSessions,
}

impl TrendMetric {
    pub const ALL: [TrendMetric; 7] = [
        TrendMetric::FilterCount,
        TrendMetric::OperationCount,
        TrendMetric::ErrorCount,
        TrendMetric::AverageLatency,
        TrendMetric::MemoryUsage,
        TrendMetric::StorageSize,
        TrendMetric::ActiveSessions,
    ];

    /// Look up a metric by its field name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_str() == name)
    }

    pub fn unit(&self) -> &'static str {
        match self {
            TrendMetric::AverageLatency => "ms",
            TrendMetric::MemoryUsage | TrendMetric::StorageSize => "bytes",
            _ => "count",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrendMetric::FilterCount => "filter_count",
            TrendMetric::OperationCount => "operation_count",
            TrendMetric::ErrorCount => "error_count",
            TrendMetric::AverageLatency => "average_latency_ms",
            TrendMetric::MemoryUsage => "memory_usage_bytes",
            TrendMetric::StorageSize => "storage_size_bytes",
            TrendMetric::ActiveSessions => "active_sessions",
        }
    }
}

impl fmt::Display for TrendMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a fitted trend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
    Volatile,
}

/// Repetition period checked for seasonality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeasonalPeriod {
    /// 24 points
    Daily,
    /// 168 points
    Weekly,
}

impl SeasonalPeriod {
    pub fn points(&self) -> usize {
        match self {
            SeasonalPeriod::Daily => 24,
            SeasonalPeriod::Weekly => 168,
        }
    }
}

/// Detected repeating pattern
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Seasonality {
    pub period: SeasonalPeriod,
    /// Mean correlation between consecutive windows (0.0-1.0)
    pub strength: f64,
}

/// One-step-ahead forecast
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub next_value: f64,
    /// 0.0-1.0
    pub confidence: f64,
}

/// Result of `analyze_trend`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendAnalysis {
    pub metric: TrendMetric,
    pub period_hours: u32,
    pub data_points: usize,
    pub direction: TrendDirection,
    pub slope: f64,
    pub intercept: f64,
    /// Coefficient of variation of the detrended series
    pub volatility: f64,
    #[serde(default)]
    pub seasonality: Option<Seasonality>,
    pub prediction: Prediction,
}
