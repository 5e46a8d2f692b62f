//! FilterKeep Observability
//!
//! This crate provides the statistics side of filter storage:
//! - Per-session statistics collection (snapshots, aggregates, trends)
//! - Performance alerting
//! - JSON/CSV export and history import
//! - Metrics collection (Prometheus)
//! - Structured logging setup

pub mod alerts;
pub mod collector;
pub mod config;
pub mod export;
pub mod logging;
pub mod metrics;
pub mod percentile;
pub mod task;
pub mod trend;
pub mod types;

pub use collector::{CleanupReport, CollectorContext, OperationObserver, StatisticsCollector};
pub use config::{AlertThresholds, StatisticsConfig, StatisticsConfigUpdate};
pub use export::{ExportDocument, ExportFormat};
pub use logging::{LoggingConfig, init_logging};
pub use metrics::StorageMetrics;
pub use percentile::LatencyPercentiles;
pub use task::{PeriodicTask, spawn_periodic};
pub use types::{
    AggregatedStats, AggregationPeriod, AlertKind, AlertSeverity, HealthState, HistoricalMetrics,
    PerformanceAlert, Prediction, SeasonalPeriod, Seasonality, StatisticsSnapshot,
    TrendAnalysis, TrendDirection, TrendMetric,
};
