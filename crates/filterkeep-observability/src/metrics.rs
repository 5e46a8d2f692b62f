//! Metrics collection with Prometheus
//!
//! Manager-wide metrics shared by every session's statistics collector:
//! - Operation counts by kind and outcome
//! - Operation latency histogram
//! - Alert counts by kind and severity
//! - Session lifecycle (active gauge, created and evicted counters)

use prometheus::{
    CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, IntCounter, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

/// Prometheus metrics for filter storage
#[derive(Clone)]
pub struct StorageMetrics {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Store operations by kind and outcome
    pub operations_total: CounterVec,
    /// Store operation duration
    pub operation_duration_seconds: HistogramVec,
    /// Alerts raised by kind and severity
    pub alerts_total: CounterVec,
    /// Sessions currently alive
    pub active_sessions: Gauge,
    /// Sessions created
    pub sessions_created_total: IntCounter,
    /// Sessions removed by the idle sweep
    pub sessions_evicted_total: IntCounter,
    /// Teardown failures seen by the idle sweep
    pub sweep_failures_total: IntCounter,
}

impl StorageMetrics {
    /// Create a new metrics collector with its own registry
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let operations_total = CounterVec::new(
            Opts::new(
                "filterkeep_operations_total",
                "Total number of filter store operations",
            ),
            &["operation", "outcome"],
        )?;

        let operation_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "filterkeep_operation_duration_seconds",
                "Filter store operation duration in seconds",
            )
            .buckets(vec![
                0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0,
            ]),
            &["operation"],
        )?;

        let alerts_total = CounterVec::new(
            Opts::new(
                "filterkeep_alerts_total",
                "Total number of performance alerts raised",
            ),
            &["kind", "severity"],
        )?;

        let active_sessions = Gauge::with_opts(Opts::new(
            "filterkeep_active_sessions",
            "Number of live filter sessions",
        ))?;

        let sessions_created_total = IntCounter::with_opts(Opts::new(
            "filterkeep_sessions_created_total",
            "Total number of filter sessions created",
        ))?;

        let sessions_evicted_total = IntCounter::with_opts(Opts::new(
            "filterkeep_sessions_evicted_total",
            "Total number of idle filter sessions evicted",
        ))?;

        let sweep_failures_total = IntCounter::with_opts(Opts::new(
            "filterkeep_sweep_failures_total",
            "Total number of session teardown failures during idle sweeps",
        ))?;

        registry.register(Box::new(operations_total.clone()))?;
        registry.register(Box::new(operation_duration_seconds.clone()))?;
        registry.register(Box::new(alerts_total.clone()))?;
        registry.register(Box::new(active_sessions.clone()))?;
        registry.register(Box::new(sessions_created_total.clone()))?;
        registry.register(Box::new(sessions_evicted_total.clone()))?;
        registry.register(Box::new(sweep_failures_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            operations_total,
            operation_duration_seconds,
            alerts_total,
            active_sessions,
            sessions_created_total,
            sessions_evicted_total,
            sweep_failures_total,
        })
    }

    /// Get the Prometheus registry for exporting metrics
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record a completed store operation
    pub fn record_operation(&self, operation: &str, success: bool, duration_secs: f64) {
        let outcome = if success { "success" } else { "failure" };
        self.operations_total
            .with_label_values(&[operation, outcome])
            .inc();
        self.operation_duration_seconds
            .with_label_values(&[operation])
            .observe(duration_secs);
    }

    /// Record a raised alert
    pub fn record_alert(&self, kind: &str, severity: &str) {
        self.alerts_total.with_label_values(&[kind, severity]).inc();
    }

    /// Record a newly created session
    pub fn record_session_created(&self, active: usize) {
        self.sessions_created_total.inc();
        self.active_sessions.set(active as f64);
    }

    /// Record a session torn down, by eviction or explicit removal
    pub fn record_session_removed(&self, active: usize, evicted: bool) {
        if evicted {
            self.sessions_evicted_total.inc();
        }
        self.active_sessions.set(active as f64);
    }

    pub fn record_sweep_failure(&self) {
        self.sweep_failures_total.inc();
    }

    /// Encode every registered metric in the Prometheus text format
    pub fn encode_text(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl std::fmt::Debug for StorageMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageMetrics")
            .field("active_sessions", &self.active_sessions.get())
            .field("sessions_created_total", &self.sessions_created_total.get())
            .field("sessions_evicted_total", &self.sessions_evicted_total.get())
            .finish_non_exhaustive()
    }
}
