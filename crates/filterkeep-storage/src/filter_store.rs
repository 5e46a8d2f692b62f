//! Session-scoped in-memory filter store
//!
//! One [`FilterStore`] holds the saved filters of exactly one session. All state
//! lives behind a [`FairMutex`]; every public operation acquires it, does its
//! work, releases it, and only then reports an [`OperationMetrics`] record to
//! the attached [`OperationRecorder`]. Mutations push the new record count and
//! footprint before releasing, so the recorder sees them in mutation order.
//!
//! Nothing here is persisted. Dropping the store drops the filters.

use chrono::{DateTime, TimeDelta, Utc};
use filterkeep_core::{
    Error, FilterPatch, NewFilter, OperationKind, OperationMetrics, OperationRecorder, Result,
    SavedFilter, StorageFootprint,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;
use uuid::Uuid;

use crate::lock::{FairMutex, LockStats};

/// Point-in-time statistics for one store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    /// Session the store belongs to
    pub session_key: String,
    /// Number of stored filters
    pub filter_count: usize,
    /// When the store was created
    pub created_at: DateTime<Utc>,
    /// Last time any operation touched the store
    pub last_accessed_at: DateTime<Utc>,
    /// Estimated memory footprint of the stored values in bytes
    pub memory_usage_bytes: u64,
}

#[derive(Debug, Default)]
struct StoreState {
    filters: HashMap<String, SavedFilter>,
    last_stamp: Option<DateTime<Utc>>,
}

impl StoreState {
    /// Next mutation timestamp, strictly later than any issued before
    fn next_stamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let stamp = match self.last_stamp {
            Some(last) if now <= last => last + TimeDelta::microseconds(1),
            _ => now,
        };
        self.last_stamp = Some(stamp);
        stamp
    }

    fn next_id(&self) -> String {
        loop {
            let id = Uuid::new_v4().to_string();
            if !self.filters.contains_key(&id) {
                return id;
            }
        }
    }

    fn insert_new(&mut self, fields: NewFilter) -> SavedFilter {
        let id = self.next_id();
        let now = self.next_stamp();
        let filter = SavedFilter::from_new(id.clone(), fields, now);
        self.filters.insert(id, filter.clone());
        filter
    }

    /// Filters matching `predicate`, most recently updated first
    fn sorted_by_recency<F>(&self, predicate: F) -> Vec<SavedFilter>
    where
        F: Fn(&SavedFilter) -> bool,
    {
        let mut filters: Vec<SavedFilter> = self
            .filters
            .values()
            .filter(|f| predicate(f))
            .cloned()
            .collect();
        filters.sort_by(|a, b| b.updated.cmp(&a.updated));
        filters
    }

    fn memory_usage(&self) -> u64 {
        self.filters.values().map(SavedFilter::estimated_size).sum()
    }

    fn footprint(&self) -> (usize, StorageFootprint) {
        (
            self.filters.len(),
            StorageFootprint::memory(self.memory_usage()),
        )
    }
}

/// In-memory saved-filter store for one session
pub struct FilterStore {
    session_key: String,
    state: FairMutex<StoreState>,
    created_at: DateTime<Utc>,
    last_accessed_ms: AtomicI64,
    recorder: Option<Arc<dyn OperationRecorder>>,
}

impl std::fmt::Debug for FilterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterStore")
            .field("session_key", &self.session_key)
            .field("created_at", &self.created_at)
            .field("has_recorder", &self.recorder.is_some())
            .finish()
    }
}

impl FilterStore {
    /// Create an empty store with no statistics attached
    pub fn new(session_key: impl Into<String>) -> Self {
        let created_at = Utc::now();
        Self {
            session_key: session_key.into(),
            state: FairMutex::new(StoreState::default()),
            created_at,
            last_accessed_ms: AtomicI64::new(created_at.timestamp_millis()),
            recorder: None,
        }
    }

    /// Create an empty store reporting to `recorder`
    pub fn with_recorder(session_key: impl Into<String>, recorder: Arc<dyn OperationRecorder>) -> Self {
        let mut store = Self::new(session_key);
        store.recorder = Some(recorder);
        store
    }

    /// Session this store belongs to
    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    /// When the store was created
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Mark the store as accessed now
    pub fn touch(&self) {
        self.last_accessed_ms
            .fetch_max(Utc::now().timestamp_millis(), Ordering::AcqRel);
    }

    /// Last time the store was accessed
    pub fn last_accessed_at(&self) -> DateTime<Utc> {
        let ms = self.last_accessed_ms.load(Ordering::Acquire);
        DateTime::from_timestamp_millis(ms).unwrap_or(self.created_at)
    }

    /// Whether the store has gone untouched for longer than `timeout`
    pub fn is_idle(&self, now: DateTime<Utc>, timeout: TimeDelta) -> bool {
        now - self.last_accessed_at() > timeout
    }

    /// Lock acquisition counters
    pub fn lock_stats(&self) -> LockStats {
        self.state.stats()
    }

    /// Create a filter, assigning a fresh id and stamping both timestamps
    pub async fn create(&self, fields: NewFilter) -> Result<SavedFilter> {
        let started = Instant::now();
        let metrics =
            OperationMetrics::new(OperationKind::Create, &self.session_key).with_project(fields.project_id);
        self.touch();

        let mut state = self.state.acquire().await;
        let filter = state.insert_new(fields);
        self.report_footprint(&state).await;
        state.release();

        tracing::debug!(
            session_key = %self.session_key,
            filter_id = %filter.id,
            "Created saved filter"
        );
        self.report(metrics.succeeded(started, 1)).await;
        Ok(filter)
    }

    /// Create several filters in one critical section
    pub async fn create_many(&self, batch: Vec<NewFilter>) -> Result<Vec<SavedFilter>> {
        let started = Instant::now();
        let metrics = OperationMetrics::new(OperationKind::BatchCreate, &self.session_key)
            .with_metadata("requested", batch.len().to_string());
        self.touch();

        let mut state = self.state.acquire().await;
        let created: Vec<SavedFilter> = batch
            .into_iter()
            .map(|fields| state.insert_new(fields))
            .collect();
        self.report_footprint(&state).await;
        state.release();

        tracing::debug!(
            session_key = %self.session_key,
            created = created.len(),
            "Created saved filters in batch"
        );
        self.report(metrics.succeeded(started, created.len())).await;
        Ok(created)
    }

    /// Fetch a filter by id; `None` when absent
    pub async fn get(&self, id: &str) -> Result<Option<SavedFilter>> {
        let started = Instant::now();
        let metrics = OperationMetrics::new(OperationKind::Read, &self.session_key);
        self.touch();

        let state = self.state.acquire().await;
        let filter = state.filters.get(id).cloned();
        state.release();

        let found = usize::from(filter.is_some());
        self.report(metrics.succeeded(started, found)).await;
        Ok(filter)
    }

    /// Merge `patch` into an existing filter and bump `updated`
    ///
    /// # Errors
    /// - `Error::NotFound` if no filter has this id; nothing is modified
    pub async fn update(&self, id: &str, patch: FilterPatch) -> Result<SavedFilter> {
        let started = Instant::now();
        let metrics = OperationMetrics::new(OperationKind::Update, &self.session_key);
        self.touch();

        let mut state = self.state.acquire().await;
        let Some(mut filter) = state.filters.remove(id) else {
            state.release();
            let err = Error::NotFound(id.to_string());
            self.report(metrics.failed(started, &err)).await;
            return Err(err);
        };
        let now = state.next_stamp();
        filter.apply(patch, now);
        state.filters.insert(filter.id.clone(), filter.clone());
        let updated = filter;
        self.report_footprint(&state).await;
        state.release();

        tracing::debug!(session_key = %self.session_key, filter_id = %id, "Updated saved filter");
        let metrics = metrics.with_project(updated.project_id);
        self.report(metrics.succeeded(started, 1)).await;
        Ok(updated)
    }

    /// Remove a filter
    ///
    /// # Errors
    /// - `Error::NotFound` if no filter has this id
    pub async fn delete(&self, id: &str) -> Result<()> {
        let started = Instant::now();
        let metrics = OperationMetrics::new(OperationKind::Delete, &self.session_key);
        self.touch();

        let mut state = self.state.acquire().await;
        let removed = state.filters.remove(id);
        if removed.is_some() {
            self.report_footprint(&state).await;
        }
        state.release();

        match removed {
            Some(filter) => {
                tracing::debug!(session_key = %self.session_key, filter_id = %id, "Deleted saved filter");
                let metrics = metrics.with_project(filter.project_id);
                self.report(metrics.succeeded(started, 1)).await;
                Ok(())
            }
            None => {
                let err = Error::NotFound(id.to_string());
                self.report(metrics.failed(started, &err)).await;
                Err(err)
            }
        }
    }

    /// All filters, most recently updated first
    pub async fn list(&self) -> Result<Vec<SavedFilter>> {
        let started = Instant::now();
        let metrics =
            OperationMetrics::new(OperationKind::Query, &self.session_key).with_metadata("query", "list");
        self.touch();

        let state = self.state.acquire().await;
        let filters = state.sorted_by_recency(|_| true);
        state.release();

        self.report(metrics.succeeded(started, filters.len())).await;
        Ok(filters)
    }

    /// Most recently updated filter with exactly this name
    ///
    /// When several filters share a name, which one is returned follows
    /// recency only and is not otherwise guaranteed.
    pub async fn find_by_name(&self, name: &str) -> Result<Option<SavedFilter>> {
        let started = Instant::now();
        let metrics = OperationMetrics::new(OperationKind::Query, &self.session_key)
            .with_metadata("query", "find_by_name");
        self.touch();

        let state = self.state.acquire().await;
        let found = state
            .sorted_by_recency(|f| f.name == name)
            .into_iter()
            .next();
        state.release();

        self.report(metrics.succeeded(started, usize::from(found.is_some())))
            .await;
        Ok(found)
    }

    /// Filters scoped to `project_id` plus every global filter, most recent first
    pub async fn get_by_project(&self, project_id: i64) -> Result<Vec<SavedFilter>> {
        let started = Instant::now();
        let metrics = OperationMetrics::new(OperationKind::Query, &self.session_key)
            .with_project(Some(project_id))
            .with_metadata("query", "get_by_project");
        self.touch();

        let state = self.state.acquire().await;
        let filters = state.sorted_by_recency(|f| f.visible_in_project(project_id));
        state.release();

        self.report(metrics.succeeded(started, filters.len())).await;
        Ok(filters)
    }

    /// Remove every filter; returns how many were removed
    pub async fn clear(&self) -> Result<usize> {
        let started = Instant::now();
        let metrics = OperationMetrics::new(OperationKind::Clear, &self.session_key);
        self.touch();

        let mut state = self.state.acquire().await;
        let removed = state.filters.len();
        state.filters.clear();
        self.report_footprint(&state).await;
        state.release();

        if removed > 0 {
            tracing::debug!(session_key = %self.session_key, removed, "Cleared saved filters");
        }
        self.report(metrics.succeeded(started, removed)).await;
        Ok(removed)
    }

    /// Record count, timestamps, and memory estimate
    ///
    /// Counts as an access, so polling stats keeps the session alive.
    pub async fn get_stats(&self) -> StoreStats {
        self.touch();
        let state = self.state.acquire().await;
        let filter_count = state.filters.len();
        let memory_usage_bytes = state.memory_usage();
        state.release();

        StoreStats {
            session_key: self.session_key.clone(),
            filter_count,
            created_at: self.created_at,
            last_accessed_at: self.last_accessed_at(),
            memory_usage_bytes,
        }
    }

    async fn report(&self, metrics: OperationMetrics) {
        if let Some(recorder) = &self.recorder {
            recorder.record_operation(metrics).await;
        }
    }

    /// Push the live count and footprint to the recorder
    ///
    /// Called with the state lock held so reports arrive in mutation order.
    /// The recorder must never call back into this store.
    async fn report_footprint(&self, state: &StoreState) {
        if let Some(recorder) = &self.recorder {
            let (count, footprint) = state.footprint();
            recorder.update_storage_stats(count, footprint).await;
        }
    }
}
