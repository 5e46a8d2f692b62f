//! Per-operation metrics and the recorder seam
//!
//! Every store operation attempt, successful or not, produces exactly one
//! [`OperationMetrics`] record that is handed to an [`OperationRecorder`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

use crate::Error;

/// Kind of store operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Read,
    Update,
    Delete,
    BatchCreate,
    Query,
    Clear,
}

impl OperationKind {
    /// All kinds, in declaration order
    pub const ALL: [OperationKind; 7] = [
        OperationKind::Create,
        OperationKind::Read,
        OperationKind::Update,
        OperationKind::Delete,
        OperationKind::BatchCreate,
        OperationKind::Query,
        OperationKind::Clear,
    ];

    /// Label-safe name
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Read => "read",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
            OperationKind::BatchCreate => "batch_create",
            OperationKind::Query => "query",
            OperationKind::Clear => "clear",
        }
    }

    /// Whether the operation changes stored records
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            OperationKind::Create
                | OperationKind::Update
                | OperationKind::Delete
                | OperationKind::BatchCreate
                | OperationKind::Clear
        )
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metrics for one store operation attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationMetrics {
    /// What was attempted
    pub kind: OperationKind,

    /// When the attempt started
    pub start_time: DateTime<Utc>,

    /// When the attempt finished (stamped by the collector if unset)
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,

    /// Wall-clock duration in milliseconds (derived by the collector if unset)
    #[serde(default)]
    pub duration_ms: Option<f64>,

    /// Number of records touched or returned
    #[serde(default)]
    pub item_count: usize,

    /// Whether the attempt succeeded
    pub success: bool,

    /// Error kind label for failed attempts (see [`Error::kind`])
    #[serde(default)]
    pub error_kind: Option<String>,

    /// Session that owns the store
    pub session_key: String,

    /// Project scope of the operation, if any
    #[serde(default)]
    pub project_id: Option<i64>,

    /// Free-form metadata
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl OperationMetrics {
    /// Create an unfinished record starting now
    pub fn new(kind: OperationKind, session_key: impl Into<String>) -> Self {
        Self {
            kind,
            start_time: Utc::now(),
            end_time: None,
            duration_ms: None,
            item_count: 0,
            success: false,
            error_kind: None,
            session_key: session_key.into(),
            project_id: None,
            metadata: HashMap::new(),
        }
    }

    /// Set the project scope
    pub fn with_project(mut self, project_id: Option<i64>) -> Self {
        self.project_id = project_id;
        self
    }

    /// Attach a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Mark as succeeded, timing it against a monotonic start instant
    pub fn succeeded(mut self, started: Instant, item_count: usize) -> Self {
        self.finish(started);
        self.success = true;
        self.item_count = item_count;
        self
    }

    /// Mark as failed with the given error
    pub fn failed(mut self, started: Instant, error: &Error) -> Self {
        self.finish(started);
        self.success = false;
        self.error_kind = Some(error.kind().to_string());
        self
    }

    fn finish(&mut self, started: Instant) {
        self.end_time = Some(Utc::now());
        self.duration_ms = Some(started.elapsed().as_secs_f64() * 1000.0);
    }

    /// Fill in end time and duration if the producer left them unset
    pub fn stamp_completion(&mut self, now: DateTime<Utc>) {
        let end = *self.end_time.get_or_insert(now);
        if self.duration_ms.is_none() {
            let elapsed = (end - self.start_time).num_microseconds().unwrap_or(0);
            self.duration_ms = Some(elapsed.max(0) as f64 / 1000.0);
        }
    }

    /// Duration in milliseconds, zero when not yet stamped
    pub fn duration(&self) -> f64 {
        self.duration_ms.unwrap_or(0.0)
    }

    /// Completion time, falling back to the start time when not yet stamped
    pub fn completed_at(&self) -> DateTime<Utc> {
        self.end_time.unwrap_or(self.start_time)
    }
}

/// Storage size figures reported alongside the live record count
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageFootprint {
    /// Estimated in-memory size in bytes
    #[serde(default)]
    pub memory_bytes: Option<u64>,

    /// Serialized/storage size in bytes
    #[serde(default)]
    pub storage_bytes: Option<u64>,

    /// Compression ratio (compressed / raw)
    #[serde(default)]
    pub compression_ratio: Option<f64>,

    /// Fragmentation ratio (0.0 - 1.0)
    #[serde(default)]
    pub fragmentation_ratio: Option<f64>,
}

impl StorageFootprint {
    /// Footprint carrying only a memory estimate
    pub fn memory(bytes: u64) -> Self {
        Self {
            memory_bytes: Some(bytes),
            ..Default::default()
        }
    }
}

/// Receiver of store operation events
///
/// Implemented by the statistics collector; stores hold it as a trait object so
/// they can run without statistics attached.
#[async_trait]
pub trait OperationRecorder: Send + Sync {
    /// Record one completed operation attempt
    async fn record_operation(&self, metrics: OperationMetrics);

    /// Report the live record count and storage footprint
    async fn update_storage_stats(&self, filter_count: usize, footprint: StorageFootprint);
}
