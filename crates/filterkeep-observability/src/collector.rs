//! Per-session statistics collector
//!
//! Receives one [`OperationMetrics`] record per store operation, keeps a
//! bounded operation log, raw latency samples, a historical series and an
//! alert log, and derives snapshots, windowed aggregates and trends from them.
//!
//! Two background tasks run while the collector is initialized: historical
//! collection every `collection_interval_ms` and retention cleanup every
//! `cleanup_interval_ms`. Both hold the state lock for one bounded step only.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use filterkeep_core::{
    Error, OperationKind, OperationMetrics, OperationRecorder, Result, StorageFootprint,
};
use filterkeep_storage::FairMutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::alerts::{
    AlertLog, evaluate_error_rate, evaluate_fragmentation, evaluate_latency,
    evaluate_memory_growth,
};
use crate::config::{StatisticsConfig, StatisticsConfigUpdate};
use crate::export::{ExportDocument, ExportFormat, parse_history};
use crate::metrics::StorageMetrics;
use crate::percentile::LatencyPercentiles;
use crate::task::{PeriodicTask, spawn_periodic};
use crate::trend;
use crate::types::{
    AggregatedStats, AggregationPeriod, AlertSeverity, HealthState, HistoricalMetrics,
    PerformanceAlert, StatisticsSnapshot, TrendAnalysis, TrendMetric,
};

/// Listener notified after each recorded operation and raised alert
///
/// Called outside the collector's lock. Implementations must not block.
pub trait OperationObserver: Send + Sync {
    fn on_operation(&self, _metrics: &OperationMetrics) {}

    fn on_alert(&self, _alert: &PerformanceAlert) {}
}

/// Resources shared between every collector of one session manager
#[derive(Debug, Clone, Default)]
pub struct CollectorContext {
    /// Mirror operations and alerts into Prometheus
    pub metrics: Option<StorageMetrics>,
    /// Live session count written into historical points
    pub active_sessions: Option<Arc<AtomicUsize>>,
}

/// What a retention cleanup pass removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub history_removed: usize,
    pub operations_removed: usize,
    pub alerts_removed: usize,
    pub latencies_removed: usize,
}

impl CleanupReport {
    pub fn total(&self) -> usize {
        self.history_removed + self.operations_removed + self.alerts_removed + self.latencies_removed
    }
}

#[derive(Debug)]
struct CollectorState {
    config: StatisticsConfig,
    /// Session creation time; stamped by the first storage report if unset
    created_at: Option<DateTime<Utc>>,
    started_at: DateTime<Utc>,
    operations: VecDeque<OperationMetrics>,
    /// Completion time and duration of recent operations, oldest first
    latencies: VecDeque<(DateTime<Utc>, f64)>,
    history: VecDeque<HistoricalMetrics>,
    alerts: AlertLog,
    health: HealthState,
    filter_count: usize,
    footprint: StorageFootprint,
}

impl CollectorState {
    fn new(config: StatisticsConfig) -> Self {
        let alerts = AlertLog::new(config.max_alerts);
        Self {
            config,
            created_at: None,
            started_at: Utc::now(),
            operations: VecDeque::new(),
            latencies: VecDeque::new(),
            history: VecDeque::new(),
            alerts,
            health: HealthState {
                is_healthy: true,
                ..Default::default()
            },
            filter_count: 0,
            footprint: StorageFootprint::default(),
        }
    }

    fn clear(&mut self) {
        self.operations.clear();
        self.latencies.clear();
        self.history.clear();
        self.alerts.clear();
        self.health = HealthState {
            is_healthy: true,
            ..Default::default()
        };
        self.filter_count = 0;
        self.footprint = StorageFootprint::default();
        self.created_at = None;
        self.started_at = Utc::now();
    }

    fn update_health(&mut self, success: bool, now: DateTime<Utc>) {
        let health = &mut self.health;
        if success {
            if health.consecutive_failures > 0 {
                health.consecutive_failures -= 1;
                if health.consecutive_failures == 0 {
                    health.last_recovery_at = Some(now);
                }
            }
        } else {
            health.consecutive_failures = health.consecutive_failures.saturating_add(1);
            health.last_failure_at = Some(now);
        }
        health.is_healthy = health.consecutive_failures == 0;
    }

    fn push_operation(&mut self, metrics: OperationMetrics) {
        self.latencies
            .push_back((metrics.completed_at(), metrics.duration()));
        self.operations.push_back(metrics);
        let excess = self.operations.len().saturating_sub(self.config.max_operations);
        self.operations.drain(..excess);
        let excess = self.latencies.len().saturating_sub(self.config.max_operations);
        self.latencies.drain(..excess);
    }

    fn push_history(&mut self, point: HistoricalMetrics) {
        self.history.push_back(point);
        let excess = self.history.len().saturating_sub(self.config.max_history_points);
        self.history.drain(..excess);
    }

    fn snapshot(&self, session_key: &str, now: DateTime<Utc>) -> StatisticsSnapshot {
        let total = self.operations.len() as u64;
        let mut successful = 0u64;
        let mut total_duration_ms = 0.0;
        let mut min_duration_ms = f64::INFINITY;
        let mut max_duration_ms: f64 = 0.0;
        let mut operations_by_kind: BTreeMap<OperationKind, u64> = BTreeMap::new();
        let mut errors_by_kind: BTreeMap<String, u64> = BTreeMap::new();

        for op in &self.operations {
            let duration = op.duration();
            total_duration_ms += duration;
            min_duration_ms = min_duration_ms.min(duration);
            max_duration_ms = max_duration_ms.max(duration);
            *operations_by_kind.entry(op.kind).or_default() += 1;
            if op.success {
                successful += 1;
            } else {
                let kind = op.error_kind.clone().unwrap_or_else(|| "unknown".to_string());
                *errors_by_kind.entry(kind).or_default() += 1;
            }
        }
        let failed = total - successful;

        let (average_duration_ms, success_rate, error_rate) = if total == 0 {
            min_duration_ms = 0.0;
            (0.0, 1.0, 0.0)
        } else {
            let n = total as f64;
            (total_duration_ms / n, successful as f64 / n, failed as f64 / n)
        };

        let samples: Vec<f64> = self.latencies.iter().map(|(_, ms)| *ms).collect();

        let created_at = self.created_at.unwrap_or(self.started_at);
        let elapsed_hours = ((now - created_at).num_milliseconds() as f64 / 3_600_000.0)
            .max(1.0 / 3600.0);

        StatisticsSnapshot {
            session_key: session_key.to_string(),
            timestamp: now,
            created_at,
            filter_count: self.filter_count,
            total_operations: total,
            successful_operations: successful,
            failed_operations: failed,
            total_duration_ms,
            average_duration_ms,
            min_duration_ms,
            max_duration_ms,
            latency: LatencyPercentiles::from_samples(&samples),
            success_rate,
            error_rate,
            throughput_per_hour: total as f64 / elapsed_hours,
            operations_by_kind,
            errors_by_kind,
            memory_usage_bytes: self.footprint.memory_bytes,
            storage_size_bytes: self.footprint.storage_bytes,
            compression_ratio: self.footprint.compression_ratio,
            fragmentation_ratio: self.footprint.fragmentation_ratio,
            health: self.health.clone(),
            history: self.history.iter().cloned().collect(),
        }
    }
}

#[derive(Debug, Default)]
struct CollectorTasks {
    collection: Option<PeriodicTask>,
    cleanup: Option<PeriodicTask>,
}

struct CollectorInner {
    session_key: String,
    state: FairMutex<CollectorState>,
    tasks: FairMutex<CollectorTasks>,
    initialized: AtomicBool,
    context: CollectorContext,
    observers: RwLock<Vec<Arc<dyn OperationObserver>>>,
}

/// Statistics collector for one session
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct StatisticsCollector {
    inner: Arc<CollectorInner>,
}

impl std::fmt::Debug for StatisticsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatisticsCollector")
            .field("session_key", &self.inner.session_key)
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

impl StatisticsCollector {
    pub fn new(session_key: impl Into<String>, config: StatisticsConfig) -> Self {
        Self::with_context(session_key, config, CollectorContext::default())
    }

    pub fn with_context(
        session_key: impl Into<String>,
        config: StatisticsConfig,
        context: CollectorContext,
    ) -> Self {
        Self {
            inner: Arc::new(CollectorInner {
                session_key: session_key.into(),
                state: FairMutex::new(CollectorState::new(config)),
                tasks: FairMutex::new(CollectorTasks::default()),
                initialized: AtomicBool::new(false),
                context,
                observers: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn session_key(&self) -> &str {
        &self.inner.session_key
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::Acquire)
    }

    /// Whether two handles share the same collector
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Current configuration
    pub async fn config(&self) -> StatisticsConfig {
        self.inner.state.acquire().await.config.clone()
    }

    /// Validate the configuration and start the background tasks
    ///
    /// Calling this on an initialized collector is a no-op.
    pub async fn initialize(&self) -> Result<()> {
        let mut tasks = self.inner.tasks.acquire().await;
        if self.is_initialized() {
            return Ok(());
        }

        let config = self.config().await;
        if let Err(reason) = config.validate() {
            error!(
                session_key = %self.inner.session_key,
                "Failed to initialize statistics collector: {}", reason
            );
            return Err(Error::Initialization(reason));
        }

        tasks.collection = Some(spawn_collection_task(&self.inner, &config));
        tasks.cleanup = Some(spawn_cleanup_task(&self.inner, &config));
        self.inner.initialized.store(true, Ordering::Release);

        info!(
            session_key = %self.inner.session_key,
            collection_interval_ms = config.collection_interval_ms,
            cleanup_interval_ms = config.cleanup_interval_ms,
            "Statistics collector initialized"
        );
        Ok(())
    }

    /// Register an observer
    pub async fn subscribe(&self, observer: Arc<dyn OperationObserver>) {
        self.inner.observers.write().await.push(observer);
    }

    /// Record one operation attempt and evaluate alert rules against it
    pub async fn record_operation(&self, mut metrics: OperationMetrics) {
        let now = Utc::now();
        metrics.stamp_completion(now);

        let mut raised = Vec::new();
        {
            let mut state = self.inner.state.acquire().await;
            state.update_health(metrics.success, now);

            let thresholds = state.config.alerts.clone();
            if let Some(alert) = evaluate_latency(&metrics, &thresholds, now) {
                raised.push(alert);
            }

            state.push_operation(metrics.clone());

            if !metrics.success {
                // Completion order is not arrival order; the evaluator windows by timestamp
                if let Some(alert) = evaluate_error_rate(
                    &state.operations,
                    &thresholds,
                    &self.inner.session_key,
                    now,
                ) {
                    raised.push(alert);
                }
            }

            for alert in &raised {
                state.alerts.push(alert.clone());
            }
        }

        debug!(
            session_key = %self.inner.session_key,
            operation = %metrics.kind,
            success = metrics.success,
            duration_ms = metrics.duration(),
            "Recorded operation"
        );

        if let Some(m) = &self.inner.context.metrics {
            m.record_operation(metrics.kind.as_str(), metrics.success, metrics.duration() / 1000.0);
        }

        let observers = self.inner.observers.read().await;
        for observer in observers.iter() {
            observer.on_operation(&metrics);
        }
        drop(observers);

        self.announce(&raised).await;
    }

    /// Log, mirror and broadcast newly raised alerts
    async fn announce(&self, alerts: &[PerformanceAlert]) {
        if alerts.is_empty() {
            return;
        }
        let observers = self.inner.observers.read().await;
        for alert in alerts {
            warn!(
                session_key = %alert.session_key,
                kind = alert.kind.as_str(),
                severity = alert.severity.as_str(),
                threshold = alert.threshold,
                observed = alert.observed,
                "Performance alert raised"
            );
            if let Some(m) = &self.inner.context.metrics {
                m.record_alert(alert.kind.as_str(), alert.severity.as_str());
            }
            for observer in observers.iter() {
                observer.on_alert(alert);
            }
        }
    }

    /// Report the live record count and storage footprint
    ///
    /// Absent footprint figures keep their previous value.
    pub async fn update_storage_stats(&self, filter_count: usize, footprint: StorageFootprint) {
        let mut state = self.inner.state.acquire().await;
        state.filter_count = filter_count;
        if footprint.memory_bytes.is_some() {
            state.footprint.memory_bytes = footprint.memory_bytes;
        }
        if footprint.storage_bytes.is_some() {
            state.footprint.storage_bytes = footprint.storage_bytes;
        }
        if footprint.compression_ratio.is_some() {
            state.footprint.compression_ratio = footprint.compression_ratio;
        }
        if footprint.fragmentation_ratio.is_some() {
            state.footprint.fragmentation_ratio = footprint.fragmentation_ratio;
        }
        if state.created_at.is_none() {
            state.created_at = Some(Utc::now());
        }
    }

    /// Current statistics
    pub async fn get_snapshot(&self) -> StatisticsSnapshot {
        let state = self.inner.state.acquire().await;
        state.snapshot(&self.inner.session_key, Utc::now())
    }

    /// Statistics over the trailing `period`
    pub async fn get_aggregated_stats(&self, period: AggregationPeriod) -> AggregatedStats {
        let now = Utc::now();
        let window_start = now - period.duration();
        let state = self.inner.state.acquire().await;

        let mut operation_count = 0u64;
        let mut error_count = 0u64;
        let mut total_latency = 0.0;
        let mut peak_latency_ms: f64 = 0.0;
        for op in state
            .operations
            .iter()
            .filter(|op| op.completed_at() >= window_start)
        {
            operation_count += 1;
            error_count += u64::from(!op.success);
            total_latency += op.duration();
            peak_latency_ms = peak_latency_ms.max(op.duration());
        }

        let points: Vec<&HistoricalMetrics> = state
            .history
            .iter()
            .filter(|p| p.timestamp >= window_start)
            .collect();

        let (error_rate, average_latency_ms) = if operation_count == 0 {
            (0.0, 0.0)
        } else {
            (
                error_count as f64 / operation_count as f64,
                total_latency / operation_count as f64,
            )
        };

        AggregatedStats {
            period,
            window_start,
            window_end: now,
            operation_count,
            error_count,
            error_rate,
            average_latency_ms,
            peak_latency_ms,
            throughput_per_hour: operation_count as f64 / period.hours(),
            memory_growth_rate: growth_rate_per_hour(&points, TrendMetric::MemoryUsage),
            storage_growth_rate: growth_rate_per_hour(&points, TrendMetric::StorageSize),
            history_points: points.len(),
        }
    }

    /// Trend of `metric` over the last `period_hours` of history
    pub async fn analyze_trend(&self, metric: TrendMetric, period_hours: u32) -> Result<TrendAnalysis> {
        let window_start = Utc::now() - TimeDelta::hours(i64::from(period_hours));
        let values: Vec<f64> = {
            let state = self.inner.state.acquire().await;
            state
                .history
                .iter()
                .filter(|p| p.timestamp >= window_start)
                .filter_map(|p| p.value(metric))
                .collect()
        };
        trend::analyze(metric, period_hours, &values)
    }

    /// Alerts, newest first
    pub async fn get_alerts(&self, severity: Option<AlertSeverity>) -> Vec<PerformanceAlert> {
        self.inner.state.acquire().await.alerts.newest_first(severity)
    }

    /// Merge a partial configuration
    ///
    /// A changed collection interval restarts the collection task. Retention
    /// changes take effect at the next cleanup.
    pub async fn configure(&self, update: StatisticsConfigUpdate) -> Result<()> {
        let (interval_changed, config) = {
            let mut state = self.inner.state.acquire().await;
            let mut config = state.config.clone();
            config.merge(update);
            config.validate().map_err(Error::InvalidConfig)?;

            let interval_changed = config.collection_interval_ms != state.config.collection_interval_ms;
            state.alerts.set_capacity(config.max_alerts);
            state.config = config.clone();
            (interval_changed, config)
        };

        info!(
            session_key = %self.inner.session_key,
            collection_interval_ms = config.collection_interval_ms,
            retention_secs = config.retention_secs,
            "Statistics configuration updated"
        );

        if interval_changed && self.is_initialized() {
            let mut tasks = self.inner.tasks.acquire().await;
            if let Some(task) = tasks.collection.take() {
                task.shutdown().await;
            }
            tasks.collection = Some(spawn_collection_task(&self.inner, &config));
        }
        Ok(())
    }

    /// Take one historical snapshot and evaluate storage alert rules
    pub async fn collect_historical_point(&self) -> HistoricalMetrics {
        let now = Utc::now();
        let active_sessions = self
            .inner
            .context
            .active_sessions
            .as_ref()
            .map_or(0, |count| count.load(Ordering::Acquire));

        let mut raised = Vec::new();
        let point = {
            let mut state = self.inner.state.acquire().await;
            let since = state
                .history
                .back()
                .map(|p| p.timestamp)
                .unwrap_or(state.started_at);

            let mut point = HistoricalMetrics::at(now);
            let mut total_latency = 0.0;
            for op in state.operations.iter().filter(|op| op.completed_at() > since) {
                point.operation_count += 1;
                point.error_count += u64::from(!op.success);
                total_latency += op.duration();
            }
            if point.operation_count > 0 {
                point.average_latency_ms = total_latency / point.operation_count as f64;
            }
            point.filter_count = state.filter_count;
            point.memory_usage_bytes = state.footprint.memory_bytes;
            point.storage_size_bytes = state.footprint.storage_bytes;
            point.active_sessions = active_sessions;

            let thresholds = &state.config.alerts;
            let previous_memory = state.history.back().and_then(|p| p.memory_usage_bytes);
            raised.extend(evaluate_memory_growth(
                previous_memory,
                point.memory_usage_bytes,
                thresholds,
                &self.inner.session_key,
                now,
            ));
            raised.extend(evaluate_fragmentation(
                state.footprint.fragmentation_ratio,
                thresholds,
                &self.inner.session_key,
                now,
            ));

            for alert in &raised {
                state.alerts.push(alert.clone());
            }
            state.push_history(point.clone());
            point
        };

        debug!(
            session_key = %self.inner.session_key,
            operations = point.operation_count,
            filters = point.filter_count,
            "Collected historical point"
        );
        self.announce(&raised).await;
        point
    }

    /// Prune data older than retention and cap alerts and latency samples
    pub async fn cleanup(&self) -> CleanupReport {
        let mut state = self.inner.state.acquire().await;
        let cutoff = Utc::now() - state.config.retention();
        let mut report = CleanupReport::default();

        let before = state.history.len();
        state.history.retain(|p| p.timestamp >= cutoff);
        report.history_removed = before - state.history.len();

        let before = state.operations.len();
        state.operations.retain(|op| op.completed_at() >= cutoff);
        report.operations_removed = before - state.operations.len();

        report.alerts_removed = state.alerts.truncate();

        let before = state.latencies.len();
        state.latencies.retain(|(completed_at, _)| *completed_at >= cutoff);
        if state.latencies.len() > state.config.latency_sample_limit {
            let excess = state.latencies.len() - state.config.latency_sample_keep;
            state.latencies.drain(..excess);
        }
        report.latencies_removed = before - state.latencies.len();

        if report.total() > 0 {
            debug!(
                session_key = %self.inner.session_key,
                history_removed = report.history_removed,
                operations_removed = report.operations_removed,
                alerts_removed = report.alerts_removed,
                latencies_removed = report.latencies_removed,
                "Statistics cleanup"
            );
        }
        report
    }

    /// Export the current statistics as `json` or `csv`
    pub async fn export_data(&self, format: &str) -> Result<String> {
        let format: ExportFormat = format.parse()?;
        let document = {
            let state = self.inner.state.acquire().await;
            let now = Utc::now();
            ExportDocument {
                exported_at: now,
                snapshot: state.snapshot(&self.inner.session_key, now),
                alerts: state.alerts.newest_first(None),
            }
        };
        document.render(format)
    }

    /// Restore historical points from a previous export
    ///
    /// Points whose timestamp already exists are replaced. Returns the number
    /// of points read from the payload.
    pub async fn import_data(&self, format: &str, payload: &str) -> Result<usize> {
        let format: ExportFormat = format.parse()?;
        let imported = parse_history(format, payload)?;
        let count = imported.len();

        let mut state = self.inner.state.acquire().await;
        let mut merged: BTreeMap<DateTime<Utc>, HistoricalMetrics> = state
            .history
            .drain(..)
            .map(|p| (p.timestamp, p))
            .collect();
        merged.extend(imported.into_iter().map(|p| (p.timestamp, p)));
        state.history = merged.into_values().collect();
        let excess = state.history.len().saturating_sub(state.config.max_history_points);
        state.history.drain(..excess);

        info!(
            session_key = %self.inner.session_key,
            format = %format,
            points = count,
            "Imported historical statistics"
        );
        Ok(count)
    }

    /// Drop all recorded data, keeping configuration and background tasks
    pub async fn reset(&self) {
        self.inner.state.acquire().await.clear();
        debug!(session_key = %self.inner.session_key, "Statistics reset");
    }

    /// Stop background tasks, drop all data and mark uninitialized
    pub async fn close(&self) {
        {
            let mut tasks = self.inner.tasks.acquire().await;
            if let Some(task) = tasks.collection.take() {
                task.shutdown().await;
            }
            if let Some(task) = tasks.cleanup.take() {
                task.shutdown().await;
            }
            self.inner.initialized.store(false, Ordering::Release);
        }
        self.reset().await;
        info!(session_key = %self.inner.session_key, "Statistics collector closed");
    }
}

#[async_trait]
impl OperationRecorder for StatisticsCollector {
    async fn record_operation(&self, metrics: OperationMetrics) {
        StatisticsCollector::record_operation(self, metrics).await;
    }

    async fn update_storage_stats(&self, filter_count: usize, footprint: StorageFootprint) {
        StatisticsCollector::update_storage_stats(self, filter_count, footprint).await;
    }
}

/// Percent change per hour between the first and last recorded values
fn growth_rate_per_hour(points: &[&HistoricalMetrics], metric: TrendMetric) -> f64 {
    let mut values = points.iter().filter_map(|p| p.value(metric).map(|v| (p.timestamp, v)));
    let Some((first_at, first)) = values.next() else {
        return 0.0;
    };
    let Some((last_at, last)) = values.last() else {
        return 0.0;
    };
    let hours = (last_at - first_at).num_milliseconds() as f64 / 3_600_000.0;
    if first == 0.0 || hours <= 0.0 {
        return 0.0;
    }
    (last - first) / first * 100.0 / hours
}

fn spawn_collection_task(inner: &Arc<CollectorInner>, config: &StatisticsConfig) -> PeriodicTask {
    let weak = Arc::downgrade(inner);
    spawn_periodic("statistics-collection", config.collection_interval(), move || {
        let weak: Weak<CollectorInner> = weak.clone();
        async move {
            if let Some(inner) = weak.upgrade() {
                StatisticsCollector { inner }.collect_historical_point().await;
            }
        }
    })
}

fn spawn_cleanup_task(inner: &Arc<CollectorInner>, config: &StatisticsConfig) -> PeriodicTask {
    let weak = Arc::downgrade(inner);
    spawn_periodic("statistics-cleanup", config.cleanup_interval(), move || {
        let weak: Weak<CollectorInner> = weak.clone();
        async move {
            if let Some(inner) = weak.upgrade() {
                StatisticsCollector { inner }.cleanup().await;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AlertThresholds;
    use crate::types::{AlertKind, TrendDirection};
    use std::sync::Mutex;
    use std::time::Duration;

    fn op(kind: OperationKind, duration_ms: f64, success: bool) -> OperationMetrics {
        let mut metrics = OperationMetrics::new(kind, "s1");
        metrics.duration_ms = Some(duration_ms);
        metrics.success = success;
        if !success {
            metrics.error_kind = Some("not_found".to_string());
        }
        metrics
    }

    #[tokio::test]
    async fn test_empty_snapshot() {
        let collector = StatisticsCollector::new("s1", StatisticsConfig::default());
        let snapshot = collector.get_snapshot().await;

        assert_eq!(snapshot.total_operations, 0);
        assert_eq!(snapshot.success_rate, 1.0);
        assert_eq!(snapshot.error_rate, 0.0);
        assert_eq!(snapshot.min_duration_ms, 0.0);
        assert_eq!(snapshot.latency, LatencyPercentiles::default());
        assert!(snapshot.health.is_healthy);
    }

    #[tokio::test]
    async fn test_percentiles_and_single_latency_warning() {
        let collector = StatisticsCollector::new("s1", StatisticsConfig::default());
        for ms in [100.0, 200.0, 300.0, 400.0, 5000.0] {
            collector.record_operation(op(OperationKind::Read, ms, true)).await;
        }

        let snapshot = collector.get_snapshot().await;
        assert_eq!(snapshot.total_operations, 5);
        assert_eq!(snapshot.latency.p95, 5000.0);
        assert_eq!(snapshot.latency.p50, 300.0);
        assert_eq!(snapshot.min_duration_ms, 100.0);
        assert_eq!(snapshot.max_duration_ms, 5000.0);
        assert_eq!(snapshot.average_duration_ms, 1200.0);

        let alerts = collector.get_alerts(None).await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::HighLatency);
        assert_eq!(alerts[0].severity, AlertSeverity::Warning);
    }

    #[tokio::test]
    async fn test_breakdowns_and_rates() {
        let collector = StatisticsCollector::new("s1", StatisticsConfig::default());
        collector.record_operation(op(OperationKind::Create, 1.0, true)).await;
        collector.record_operation(op(OperationKind::Create, 1.0, true)).await;
        collector.record_operation(op(OperationKind::Update, 1.0, false)).await;
        collector.record_operation(op(OperationKind::Query, 1.0, true)).await;

        let snapshot = collector.get_snapshot().await;
        assert_eq!(snapshot.operations_by_kind[&OperationKind::Create], 2);
        assert_eq!(snapshot.operations_by_kind[&OperationKind::Update], 1);
        assert_eq!(snapshot.errors_by_kind["not_found"], 1);
        assert_eq!(snapshot.success_rate, 0.75);
        assert_eq!(snapshot.error_rate, 0.25);
        assert!(snapshot.throughput_per_hour > 0.0);
    }

    #[tokio::test]
    async fn test_error_spike_alert() {
        let collector = StatisticsCollector::new("s1", StatisticsConfig::default());
        collector.record_operation(op(OperationKind::Read, 1.0, true)).await;
        collector.record_operation(op(OperationKind::Read, 1.0, false)).await;

        // 1 of 2 failed within the window: 50% is a warning, not above critical
        let alerts = collector.get_alerts(None).await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::ErrorSpike);
        assert_eq!(alerts[0].severity, AlertSeverity::Warning);

        collector.record_operation(op(OperationKind::Read, 1.0, false)).await;
        let critical = collector.get_alerts(Some(AlertSeverity::Critical)).await;
        assert_eq!(critical.len(), 1);
        assert!((critical[0].observed - 2.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_health_transitions() {
        let collector = StatisticsCollector::new("s1", StatisticsConfig::default());
        collector.record_operation(op(OperationKind::Read, 1.0, false)).await;
        collector.record_operation(op(OperationKind::Read, 1.0, false)).await;

        let health = collector.get_snapshot().await.health;
        assert!(!health.is_healthy);
        assert_eq!(health.consecutive_failures, 2);
        assert!(health.last_failure_at.is_some());

        collector.record_operation(op(OperationKind::Read, 1.0, true)).await;
        assert!(!collector.get_snapshot().await.health.is_healthy);

        collector.record_operation(op(OperationKind::Read, 1.0, true)).await;
        let health = collector.get_snapshot().await.health;
        assert!(health.is_healthy);
        assert!(health.last_recovery_at.is_some());
    }

    #[tokio::test]
    async fn test_missing_timing_is_stamped() {
        let collector = StatisticsCollector::new("s1", StatisticsConfig::default());
        let mut metrics = OperationMetrics::new(OperationKind::Delete, "s1");
        metrics.success = true;
        metrics.start_time = Utc::now() - TimeDelta::milliseconds(20);
        collector.record_operation(metrics).await;

        let snapshot = collector.get_snapshot().await;
        assert!(snapshot.max_duration_ms >= 20.0);
    }

    #[tokio::test]
    async fn test_storage_stats_stamp_creation_once() {
        let collector = StatisticsCollector::new("s1", StatisticsConfig::default());
        collector.update_storage_stats(3, StorageFootprint::memory(300)).await;
        let first = collector.get_snapshot().await.created_at;

        collector
            .update_storage_stats(
                4,
                StorageFootprint {
                    storage_bytes: Some(1000),
                    ..Default::default()
                },
            )
            .await;
        let snapshot = collector.get_snapshot().await;
        assert_eq!(snapshot.created_at, first);
        assert_eq!(snapshot.filter_count, 4);
        assert_eq!(snapshot.memory_usage_bytes, Some(300));
        assert_eq!(snapshot.storage_size_bytes, Some(1000));
    }

    #[tokio::test]
    async fn test_historical_point_counts_interval_only() {
        let collector = StatisticsCollector::new("s1", StatisticsConfig::default());
        collector.record_operation(op(OperationKind::Read, 10.0, true)).await;
        collector.record_operation(op(OperationKind::Read, 30.0, false)).await;
        collector.update_storage_stats(2, StorageFootprint::memory(100)).await;

        let first = collector.collect_historical_point().await;
        assert_eq!(first.operation_count, 2);
        assert_eq!(first.error_count, 1);
        assert_eq!(first.average_latency_ms, 20.0);
        assert_eq!(first.filter_count, 2);

        let second = collector.collect_historical_point().await;
        assert_eq!(second.operation_count, 0);
        assert_eq!(collector.get_snapshot().await.history.len(), 2);
    }

    #[tokio::test]
    async fn test_memory_growth_alert_at_collection() {
        let collector = StatisticsCollector::new("s1", StatisticsConfig::default());
        collector.update_storage_stats(1, StorageFootprint::memory(1000)).await;
        collector.collect_historical_point().await;
        collector.update_storage_stats(5, StorageFootprint::memory(2000)).await;
        collector.collect_historical_point().await;

        let alerts = collector.get_alerts(None).await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::MemoryGrowth);
    }

    #[tokio::test]
    async fn test_history_is_capped() {
        let config = StatisticsConfig {
            max_history_points: 3,
            ..Default::default()
        };
        let collector = StatisticsCollector::new("s1", config);
        for _ in 0..5 {
            collector.collect_historical_point().await;
        }
        assert_eq!(collector.get_snapshot().await.history.len(), 3);
    }

    #[tokio::test]
    async fn test_trend_needs_two_points() {
        let collector = StatisticsCollector::new("s1", StatisticsConfig::default());
        collector.collect_historical_point().await;

        let err = collector.analyze_trend(TrendMetric::FilterCount, 24).await.unwrap_err();
        assert!(matches!(err, Error::InsufficientData { actual: 1, .. }));
    }

    #[tokio::test]
    async fn test_trend_on_increasing_filter_count() {
        let collector = StatisticsCollector::new("s1", StatisticsConfig::default());
        for count in 1..=30 {
            collector.update_storage_stats(count, StorageFootprint::default()).await;
            collector.collect_historical_point().await;
        }

        let analysis = collector.analyze_trend(TrendMetric::FilterCount, 24).await.unwrap();
        assert_eq!(analysis.data_points, 30);
        assert_eq!(analysis.direction, TrendDirection::Increasing);
        assert!(analysis.slope > 0.0);
    }

    #[tokio::test]
    async fn test_aggregated_stats() {
        let collector = StatisticsCollector::new("s1", StatisticsConfig::default());
        collector.record_operation(op(OperationKind::Read, 10.0, true)).await;
        collector.record_operation(op(OperationKind::Read, 50.0, false)).await;

        let stats = collector.get_aggregated_stats(AggregationPeriod::Hour).await;
        assert_eq!(stats.operation_count, 2);
        assert_eq!(stats.error_count, 1);
        assert_eq!(stats.error_rate, 0.5);
        assert_eq!(stats.average_latency_ms, 30.0);
        assert_eq!(stats.peak_latency_ms, 50.0);
        assert_eq!(stats.throughput_per_hour, 2.0);
        assert_eq!(stats.memory_growth_rate, 0.0);
    }

    #[test]
    fn test_growth_rate_per_hour() {
        let now = Utc::now();
        let mut first = HistoricalMetrics::at(now - TimeDelta::hours(2));
        first.memory_usage_bytes = Some(1000);
        let mut last = HistoricalMetrics::at(now);
        last.memory_usage_bytes = Some(1500);

        let rate = growth_rate_per_hour(&[&first, &last], TrendMetric::MemoryUsage);
        assert!((rate - 25.0).abs() < 1e-6);
        assert_eq!(growth_rate_per_hour(&[&first], TrendMetric::MemoryUsage), 0.0);
    }

    #[tokio::test]
    async fn test_cleanup_respects_retention() {
        let collector = StatisticsCollector::new("s1", StatisticsConfig::default());

        let mut old = op(OperationKind::Read, 1.0, true);
        old.start_time = Utc::now() - TimeDelta::days(8);
        old.end_time = Some(old.start_time);
        collector.record_operation(old).await;
        collector.record_operation(op(OperationKind::Read, 1.0, true)).await;

        let report = collector.cleanup().await;
        assert_eq!(report.operations_removed, 1);
        assert_eq!(collector.get_snapshot().await.total_operations, 1);

        // Nothing newer than retention is ever removed
        assert_eq!(collector.cleanup().await, CleanupReport::default());
    }

    #[tokio::test]
    async fn test_cleanup_prunes_expired_latency_samples() {
        let collector = StatisticsCollector::new("s1", StatisticsConfig::default());

        let mut slow = op(OperationKind::Query, 9_000.0, true);
        slow.start_time = Utc::now() - TimeDelta::days(8);
        slow.end_time = Some(slow.start_time);
        collector.record_operation(slow).await;
        collector.record_operation(op(OperationKind::Query, 10.0, true)).await;

        let report = collector.cleanup().await;
        assert_eq!(report.operations_removed, 1);
        assert_eq!(report.latencies_removed, 1);

        let snapshot = collector.get_snapshot().await;
        assert_eq!(snapshot.total_operations, 1);
        assert_eq!(snapshot.max_duration_ms, 10.0);
        assert_eq!(snapshot.latency.p50, 10.0);
        assert!(snapshot.latency.p99 <= snapshot.max_duration_ms);
    }

    #[tokio::test]
    async fn test_latency_samples_follow_operation_cap() {
        let config = StatisticsConfig {
            max_operations: 3,
            latency_sample_limit: 3,
            latency_sample_keep: 3,
            ..Default::default()
        };
        let collector = StatisticsCollector::new("s1", config);
        collector.record_operation(op(OperationKind::Read, 4_000.0, true)).await;
        for _ in 0..3 {
            collector.record_operation(op(OperationKind::Read, 20.0, true)).await;
        }

        let snapshot = collector.get_snapshot().await;
        assert_eq!(snapshot.total_operations, 3);
        assert_eq!(snapshot.latency.p99, 20.0);
    }

    #[tokio::test]
    async fn test_error_spike_window_ignores_arrival_order() {
        let config = StatisticsConfig {
            alerts: AlertThresholds {
                error_rate_min_samples: 2,
                ..Default::default()
            },
            ..Default::default()
        };
        let collector = StatisticsCollector::new("s1", config);

        collector.record_operation(op(OperationKind::Update, 1.0, false)).await;
        // Reported late: completed before the window opened
        let mut late = op(OperationKind::Read, 1.0, true);
        late.start_time = Utc::now() - TimeDelta::minutes(5);
        late.end_time = Some(late.start_time);
        collector.record_operation(late).await;
        collector.record_operation(op(OperationKind::Update, 1.0, false)).await;

        let alerts = collector.get_alerts(None).await;
        assert!(alerts.iter().any(|a| a.kind == AlertKind::ErrorSpike));
    }

    #[tokio::test]
    async fn test_reset_restarts_throughput_clock() {
        let collector = StatisticsCollector::new("s1", StatisticsConfig::default());
        collector
            .update_storage_stats(1, StorageFootprint::memory(64))
            .await;
        let first = collector.get_snapshot().await.created_at;

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        collector.reset().await;
        let snapshot = collector.get_snapshot().await;
        assert!(snapshot.created_at > first);
        assert_eq!(snapshot.total_operations, 0);
    }

    #[tokio::test]
    async fn test_cleanup_caps_alerts_and_latencies() {
        let config = StatisticsConfig {
            max_alerts: 2,
            latency_sample_limit: 10,
            latency_sample_keep: 4,
            ..Default::default()
        };
        let collector = StatisticsCollector::new("s1", config);
        for _ in 0..12 {
            collector.record_operation(op(OperationKind::Read, 6_000.0, true)).await;
        }

        assert_eq!(collector.get_alerts(None).await.len(), 2);
        let report = collector.cleanup().await;
        assert_eq!(report.latencies_removed, 8);
    }

    #[tokio::test]
    async fn test_export_formats() {
        let collector = StatisticsCollector::new("s1", StatisticsConfig::default());
        collector.record_operation(op(OperationKind::Create, 5.0, true)).await;

        let json = collector.export_data("json").await.unwrap();
        assert!(json.contains("\"snapshot\""));

        let csv = collector.export_data("csv").await.unwrap();
        assert!(csv.starts_with("metric,value,unit,timestamp\n"));

        let err = collector.export_data("xml").await.unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(_)));
    }

    #[tokio::test]
    async fn test_import_restores_history() {
        let source = StatisticsCollector::new("s1", StatisticsConfig::default());
        source.update_storage_stats(7, StorageFootprint::memory(700)).await;
        source.collect_historical_point().await;
        let csv = source.export_data("csv").await.unwrap();

        let target = StatisticsCollector::new("s2", StatisticsConfig::default());
        assert_eq!(target.import_data("csv", &csv).await.unwrap(), 1);

        let history = target.get_snapshot().await.history;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].filter_count, 7);
        assert_eq!(history[0].memory_usage_bytes, Some(700));
    }

    #[tokio::test]
    async fn test_configure_rejects_invalid_update() {
        let collector = StatisticsCollector::new("s1", StatisticsConfig::default());
        let err = collector
            .configure(StatisticsConfigUpdate {
                collection_interval_ms: Some(0),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
        assert_eq!(collector.config().await.collection_interval_ms, 60_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_collection_and_restart() {
        let config = StatisticsConfig {
            collection_interval_ms: 1_000,
            ..Default::default()
        };
        let collector = StatisticsCollector::new("s1", config);
        collector.initialize().await.unwrap();
        assert!(collector.is_initialized());

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        assert_eq!(collector.get_snapshot().await.history.len(), 3);

        collector
            .configure(StatisticsConfigUpdate {
                collection_interval_ms: Some(10_000),
                ..Default::default()
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5_000)).await;
        assert_eq!(collector.get_snapshot().await.history.len(), 3);

        collector.close().await;
        assert!(!collector.is_initialized());
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(collector.get_snapshot().await.history.is_empty());
    }

    #[tokio::test]
    async fn test_initialize_rejects_invalid_config() {
        let config = StatisticsConfig {
            max_operations: 0,
            ..Default::default()
        };
        let collector = StatisticsCollector::new("s1", config);
        assert!(matches!(
            collector.initialize().await,
            Err(Error::Initialization(_))
        ));
        assert!(!collector.is_initialized());
    }

    #[tokio::test]
    async fn test_observers_and_metrics_mirroring() {
        #[derive(Default)]
        struct Capture {
            operations: Mutex<Vec<OperationKind>>,
            alerts: Mutex<Vec<AlertKind>>,
        }

        impl OperationObserver for Capture {
            fn on_operation(&self, metrics: &OperationMetrics) {
                self.operations.lock().unwrap().push(metrics.kind);
            }

            fn on_alert(&self, alert: &PerformanceAlert) {
                self.alerts.lock().unwrap().push(alert.kind);
            }
        }

        let metrics = StorageMetrics::new().unwrap();
        let collector = StatisticsCollector::with_context(
            "s1",
            StatisticsConfig::default(),
            CollectorContext {
                metrics: Some(metrics.clone()),
                active_sessions: Some(Arc::new(AtomicUsize::new(4))),
            },
        );
        let capture = Arc::new(Capture::default());
        collector.subscribe(capture.clone()).await;

        collector.record_operation(op(OperationKind::Create, 6_000.0, true)).await;

        assert_eq!(*capture.operations.lock().unwrap(), vec![OperationKind::Create]);
        assert_eq!(*capture.alerts.lock().unwrap(), vec![AlertKind::HighLatency]);
        assert_eq!(
            metrics
                .operations_total
                .with_label_values(&["create", "success"])
                .get(),
            1.0
        );
        assert_eq!(
            metrics
                .alerts_total
                .with_label_values(&["high_latency", "warning"])
                .get(),
            1.0
        );
        assert_eq!(collector.collect_historical_point().await.active_sessions, 4);
    }

    #[tokio::test]
    async fn test_reset_keeps_config() {
        let config = StatisticsConfig {
            max_alerts: 7,
            ..Default::default()
        };
        let collector = StatisticsCollector::new("s1", config);
        collector.record_operation(op(OperationKind::Read, 6_000.0, true)).await;
        collector.reset().await;

        let snapshot = collector.get_snapshot().await;
        assert_eq!(snapshot.total_operations, 0);
        assert!(collector.get_alerts(None).await.is_empty());
        assert_eq!(collector.config().await.max_alerts, 7);
    }
}
