//! Alert rules and the bounded alert log

use chrono::{DateTime, TimeDelta, Utc};
use filterkeep_core::OperationMetrics;
use std::collections::VecDeque;

use crate::config::AlertThresholds;
use crate::types::{AlertKind, AlertSeverity, PerformanceAlert};

/// Latency rule: at most one alert per operation, at the highest severity reached
pub fn evaluate_latency(
    operation: &OperationMetrics,
    thresholds: &AlertThresholds,
    now: DateTime<Utc>,
) -> Option<PerformanceAlert> {
    let observed = operation.duration_ms?;

    let (severity, threshold) = if observed >= thresholds.latency_critical_ms {
        (AlertSeverity::Critical, thresholds.latency_critical_ms)
    } else if observed >= thresholds.latency_warning_ms {
        (AlertSeverity::Warning, thresholds.latency_warning_ms)
    } else {
        return None;
    };

    Some(PerformanceAlert {
        kind: AlertKind::HighLatency,
        severity,
        threshold,
        observed,
        timestamp: now,
        session_key: operation.session_key.clone(),
        recommendation: Some(format!(
            "{} took {:.0}ms; check filter volume and lock contention",
            operation.kind, observed
        )),
    })
}

/// Rolling error-rate rule over operations completed within the window
///
/// `recent` must include the operation being evaluated.
pub fn evaluate_error_rate<'a>(
    recent: impl IntoIterator<Item = &'a OperationMetrics>,
    thresholds: &AlertThresholds,
    session_key: &str,
    now: DateTime<Utc>,
) -> Option<PerformanceAlert> {
    let window_start =
        now - TimeDelta::seconds(thresholds.error_rate_window_secs.min(i64::MAX as u64) as i64);

    let (total, failed) = recent
        .into_iter()
        .filter(|op| op.completed_at() >= window_start)
        .fold((0usize, 0usize), |(total, failed), op| {
            (total + 1, failed + usize::from(!op.success))
        });

    if total == 0 || total < thresholds.error_rate_min_samples {
        return None;
    }
    let rate = failed as f64 / total as f64;

    let (severity, threshold) = if rate > thresholds.error_rate_critical {
        (AlertSeverity::Critical, thresholds.error_rate_critical)
    } else if rate > thresholds.error_rate_warning {
        (AlertSeverity::Warning, thresholds.error_rate_warning)
    } else {
        return None;
    };

    Some(PerformanceAlert {
        kind: AlertKind::ErrorSpike,
        severity,
        threshold,
        observed: rate,
        timestamp: now,
        session_key: session_key.to_string(),
        recommendation: Some(format!(
            "{} of {} operations failed in the last {}s",
            failed, total, thresholds.error_rate_window_secs
        )),
    })
}

/// Memory growth between two consecutive snapshots, in percent
pub fn evaluate_memory_growth(
    previous: Option<u64>,
    current: Option<u64>,
    thresholds: &AlertThresholds,
    session_key: &str,
    now: DateTime<Utc>,
) -> Option<PerformanceAlert> {
    let (previous, current) = (previous?, current?);
    if previous == 0 {
        return None;
    }
    let growth = (current as f64 - previous as f64) / previous as f64 * 100.0;
    if growth < thresholds.memory_growth_percent {
        return None;
    }

    Some(PerformanceAlert {
        kind: AlertKind::MemoryGrowth,
        severity: AlertSeverity::Warning,
        threshold: thresholds.memory_growth_percent,
        observed: growth,
        timestamp: now,
        session_key: session_key.to_string(),
        recommendation: Some(format!(
            "memory grew from {} to {} bytes since the last snapshot",
            previous, current
        )),
    })
}

/// Fragmentation ratio rule
pub fn evaluate_fragmentation(
    ratio: Option<f64>,
    thresholds: &AlertThresholds,
    session_key: &str,
    now: DateTime<Utc>,
) -> Option<PerformanceAlert> {
    let ratio = ratio.filter(|r| r.is_finite())?;
    if ratio < thresholds.fragmentation_ratio {
        return None;
    }

    Some(PerformanceAlert {
        kind: AlertKind::Fragmentation,
        severity: AlertSeverity::Info,
        threshold: thresholds.fragmentation_ratio,
        observed: ratio,
        timestamp: now,
        session_key: session_key.to_string(),
        recommendation: Some("clear unused filters to compact the store".to_string()),
    })
}

/// Alerts in insertion order, capped at `capacity`
#[derive(Debug, Clone)]
pub struct AlertLog {
    alerts: VecDeque<PerformanceAlert>,
    capacity: usize,
}

impl AlertLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            alerts: VecDeque::new(),
            capacity,
        }
    }

    /// Append an alert, dropping the oldest beyond capacity
    pub fn push(&mut self, alert: PerformanceAlert) {
        self.alerts.push_back(alert);
        self.truncate();
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        self.truncate();
    }

    /// Drop the oldest alerts beyond capacity; returns how many were removed
    pub fn truncate(&mut self) -> usize {
        let excess = self.alerts.len().saturating_sub(self.capacity);
        self.alerts.drain(..excess);
        excess
    }

    /// Newest first, optionally filtered by severity
    pub fn newest_first(&self, severity: Option<AlertSeverity>) -> Vec<PerformanceAlert> {
        self.alerts
            .iter()
            .rev()
            .filter(|a| severity.is_none_or(|s| a.severity == s))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    pub fn clear(&mut self) {
        self.alerts.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filterkeep_core::{Error, OperationKind};
    use std::time::Instant;

    fn op_with_duration(ms: f64) -> OperationMetrics {
        let mut op = OperationMetrics::new(OperationKind::Read, "s1");
        op.duration_ms = Some(ms);
        op.end_time = Some(op.start_time);
        op
    }

    #[test]
    fn test_latency_boundaries() {
        let thresholds = AlertThresholds::default();
        let now = Utc::now();

        assert!(evaluate_latency(&op_with_duration(4_999.0), &thresholds, now).is_none());

        let warning = evaluate_latency(&op_with_duration(5_000.0), &thresholds, now).unwrap();
        assert_eq!(warning.kind, AlertKind::HighLatency);
        assert_eq!(warning.severity, AlertSeverity::Warning);
        assert_eq!(warning.threshold, 5_000.0);

        let critical = evaluate_latency(&op_with_duration(12_000.0), &thresholds, now).unwrap();
        assert_eq!(critical.severity, AlertSeverity::Critical);
        assert_eq!(critical.observed, 12_000.0);
    }

    #[test]
    fn test_error_rate_window() {
        let thresholds = AlertThresholds::default();
        let now = Utc::now();

        let ok = OperationMetrics::new(OperationKind::Create, "s1").succeeded(Instant::now(), 1);
        let failed = OperationMetrics::new(OperationKind::Update, "s1")
            .failed(Instant::now(), &Error::NotFound("x".into()));

        // 1 of 4 failed: 25% is a warning
        let ops = vec![ok.clone(), ok.clone(), ok.clone(), failed.clone()];
        let alert = evaluate_error_rate(&ops, &thresholds, "s1", now).unwrap();
        assert_eq!(alert.severity, AlertSeverity::Warning);
        assert_eq!(alert.observed, 0.25);

        // 1 of 5 failed: exactly 20% is not above the threshold
        let ops = vec![ok.clone(), ok.clone(), ok.clone(), ok.clone(), failed.clone()];
        assert!(evaluate_error_rate(&ops, &thresholds, "s1", now).is_none());

        // Operations older than the window are ignored
        let mut stale = failed.clone();
        stale.end_time = Some(now - TimeDelta::seconds(120));
        let ops = vec![stale, ok.clone(), ok];
        assert!(evaluate_error_rate(&ops, &thresholds, "s1", now).is_none());
    }

    #[test]
    fn test_memory_growth_and_fragmentation() {
        let thresholds = AlertThresholds::default();
        let now = Utc::now();

        assert!(evaluate_memory_growth(Some(1000), Some(1400), &thresholds, "s1", now).is_none());
        let alert = evaluate_memory_growth(Some(1000), Some(1600), &thresholds, "s1", now).unwrap();
        assert_eq!(alert.kind, AlertKind::MemoryGrowth);
        assert!((alert.observed - 60.0).abs() < 1e-9);
        assert!(evaluate_memory_growth(None, Some(1600), &thresholds, "s1", now).is_none());

        assert!(evaluate_fragmentation(Some(0.1), &thresholds, "s1", now).is_none());
        assert!(evaluate_fragmentation(Some(0.5), &thresholds, "s1", now).is_some());
    }

    #[test]
    fn test_alert_log_cap_and_order() {
        let thresholds = AlertThresholds::default();
        let mut log = AlertLog::new(3);
        for ms in [5_000.0, 11_000.0, 6_000.0, 7_000.0] {
            let alert = evaluate_latency(&op_with_duration(ms), &thresholds, Utc::now()).unwrap();
            log.push(alert);
        }

        assert_eq!(log.len(), 3);
        let all = log.newest_first(None);
        assert_eq!(all[0].observed, 7_000.0);
        assert_eq!(all[2].observed, 11_000.0);

        let critical = log.newest_first(Some(AlertSeverity::Critical));
        assert_eq!(critical.len(), 1);
    }
}
