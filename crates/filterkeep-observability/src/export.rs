//! Statistics export and history import
//!
//! JSON export is the full nested document. CSV export flattens the snapshot
//! into `metric,value,unit,timestamp` rows, with one `history.<field>` row per
//! recorded value of each historical point. Import restores historical points
//! only; CSV rows are mapped through the closed [`TrendMetric`] field set.

use chrono::{DateTime, Utc};
use filterkeep_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

use crate::types::{HistoricalMetrics, PerformanceAlert, StatisticsSnapshot, TrendMetric};

pub const CSV_HEADER: &str = "metric,value,unit,timestamp";

const HISTORY_PREFIX: &str = "history.";

/// Summary rows written ahead of the history rows
const SUMMARY_METRICS: &[&str] = &[
    "filter_count",
    "total_operations",
    "successful_operations",
    "failed_operations",
    "success_rate",
    "error_rate",
    "average_duration_ms",
    "min_duration_ms",
    "max_duration_ms",
    "p50_ms",
    "p95_ms",
    "p99_ms",
    "throughput_per_hour",
    "memory_usage_bytes",
    "storage_size_bytes",
    "consecutive_failures",
    "alert_count",
];

/// Supported export formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Csv,
}

impl FromStr for ExportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(Error::UnsupportedFormat(other.to_string())),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Json => f.write_str("json"),
            ExportFormat::Csv => f.write_str("csv"),
        }
    }
}

/// Everything a collector exports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportDocument {
    pub exported_at: DateTime<Utc>,
    pub snapshot: StatisticsSnapshot,
    pub alerts: Vec<PerformanceAlert>,
}

impl ExportDocument {
    pub fn render(&self, format: ExportFormat) -> Result<String> {
        match format {
            ExportFormat::Json => Ok(serde_json::to_string_pretty(self)?),
            ExportFormat::Csv => Ok(self.to_csv()),
        }
    }

    fn summary_rows(&self) -> Vec<(&'static str, f64, &'static str)> {
        let s = &self.snapshot;
        let mut rows = vec![
            ("filter_count", s.filter_count as f64, "count"),
            ("total_operations", s.total_operations as f64, "count"),
            ("successful_operations", s.successful_operations as f64, "count"),
            ("failed_operations", s.failed_operations as f64, "count"),
            ("success_rate", s.success_rate, "ratio"),
            ("error_rate", s.error_rate, "ratio"),
            ("average_duration_ms", s.average_duration_ms, "ms"),
            ("min_duration_ms", s.min_duration_ms, "ms"),
            ("max_duration_ms", s.max_duration_ms, "ms"),
            ("p50_ms", s.latency.p50, "ms"),
            ("p95_ms", s.latency.p95, "ms"),
            ("p99_ms", s.latency.p99, "ms"),
            ("throughput_per_hour", s.throughput_per_hour, "ops/hour"),
        ];
        if let Some(bytes) = s.memory_usage_bytes {
            rows.push(("memory_usage_bytes", bytes as f64, "bytes"));
        }
        if let Some(bytes) = s.storage_size_bytes {
            rows.push(("storage_size_bytes", bytes as f64, "bytes"));
        }
        rows.push((
            "consecutive_failures",
            s.health.consecutive_failures as f64,
            "count",
        ));
        rows.push(("alert_count", self.alerts.len() as f64, "count"));
        rows
    }

    /// Flatten into `metric,value,unit,timestamp` rows
    pub fn to_csv(&self) -> String {
        let mut out = String::from(CSV_HEADER);
        out.push('\n');

        let stamp = self.snapshot.timestamp.to_rfc3339();
        for (metric, value, unit) in self.summary_rows() {
            out.push_str(&format!("{},{},{},{}\n", metric, value, unit, stamp));
        }

        for point in &self.snapshot.history {
            let stamp = point.timestamp.to_rfc3339();
            for metric in TrendMetric::ALL {
                if let Some(value) = point.value(metric) {
                    out.push_str(&format!(
                        "{}{},{},{},{}\n",
                        HISTORY_PREFIX,
                        metric.as_str(),
                        value,
                        metric.unit(),
                        stamp
                    ));
                }
            }
        }
        out
    }
}

/// Parse historical points out of an exported payload, oldest first
pub fn parse_history(format: ExportFormat, payload: &str) -> Result<Vec<HistoricalMetrics>> {
    match format {
        ExportFormat::Json => parse_json_history(payload),
        ExportFormat::Csv => parse_csv_history(payload),
    }
}

fn parse_json_history(payload: &str) -> Result<Vec<HistoricalMetrics>> {
    let document: serde_json::Value = serde_json::from_str(payload)
        .map_err(|e| Error::Import(format!("invalid JSON: {}", e)))?;

    let history = document
        .pointer("/snapshot/history")
        .or_else(|| document.get("history"))
        .ok_or_else(|| Error::Import("no history found in JSON payload".to_string()))?;

    let mut points: Vec<HistoricalMetrics> = serde_json::from_value(history.clone())
        .map_err(|e| Error::Import(format!("invalid history entry: {}", e)))?;
    points.sort_by_key(|p| p.timestamp);
    Ok(points)
}

fn parse_csv_history(payload: &str) -> Result<Vec<HistoricalMetrics>> {
    let mut points: BTreeMap<DateTime<Utc>, HistoricalMetrics> = BTreeMap::new();

    for (index, line) in payload.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line == CSV_HEADER {
            continue;
        }
        let line_no = index + 1;

        let columns: Vec<&str> = line.split(',').map(str::trim).collect();
        let &[metric, value, _unit, timestamp] = columns.as_slice() else {
            return Err(Error::Import(format!(
                "line {}: expected 4 columns, found {}",
                line_no,
                columns.len()
            )));
        };

        let Some(field) = metric.strip_prefix(HISTORY_PREFIX) else {
            if !SUMMARY_METRICS.contains(&metric) {
                warn!(metric = %metric, line = line_no, "Skipping unknown CSV metric");
            }
            continue;
        };
        let Some(field) = TrendMetric::from_name(field) else {
            warn!(metric = %metric, line = line_no, "Skipping unknown CSV history field");
            continue;
        };

        let value: f64 = value
            .parse()
            .map_err(|_| Error::Import(format!("line {}: invalid value '{}'", line_no, value)))?;
        let timestamp = DateTime::parse_from_rfc3339(timestamp)
            .map_err(|e| Error::Import(format!("line {}: invalid timestamp: {}", line_no, e)))?
            .with_timezone(&Utc);

        points
            .entry(timestamp)
            .or_insert_with(|| HistoricalMetrics::at(timestamp))
            .set(field, value);
    }

    Ok(points.into_values().collect())
}
