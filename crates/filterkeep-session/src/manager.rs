//! Session manager
//!
//! Maps each session key to exactly one filter store and statistics collector
//! pair. Pairs are created lazily on first access and torn down explicitly,
//! by `clear_all`, or by the idle sweep.
//!
//! Uses DashMap so sessions never contend with each other. The entry API keeps
//! creation at most once per key, and the sweep's `remove_if` re-checks
//! idleness under the same shard lock that `get_storage` touches under, so a
//! session accessed while a sweep is running is never evicted.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use filterkeep_core::{Error, Result, SessionInfo, SessionKey};
use filterkeep_observability::{
    CollectorContext, PeriodicTask, StatisticsCollector, StatisticsSnapshot, StorageMetrics,
};
use filterkeep_storage::{FairMutex, FilterStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::config::{SessionManagerConfig, SweepFailurePolicy};
use crate::hooks::{SessionTeardownHook, TeardownReason};
use crate::sweep::{SweepFailure, SweepReport, spawn_sweep_task};

/// A live session: its identity, store and collector
#[derive(Debug)]
struct SessionEntry {
    info: SessionInfo,
    store: Arc<FilterStore>,
    collector: StatisticsCollector,
}

/// Totals across every live session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManagerStats {
    pub session_count: usize,
    pub total_filters: usize,
    pub total_memory_bytes: u64,
    pub total_operations: u64,
    #[serde(default)]
    pub oldest_session: Option<SessionKey>,
    #[serde(default)]
    pub oldest_session_created_at: Option<DateTime<Utc>>,
}

/// Owner of every live session
pub struct SessionManager {
    config: SessionManagerConfig,
    sessions: DashMap<SessionKey, Arc<SessionEntry>>,
    active_sessions: Arc<AtomicUsize>,
    metrics: Option<StorageMetrics>,
    hooks: RwLock<Vec<Arc<dyn SessionTeardownHook>>>,
    sweeper: FairMutex<Option<PeriodicTask>>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("sessions", &self.sessions.len())
            .field("idle_timeout_ms", &self.config.idle_timeout_ms)
            .field("sweep_failure_policy", &self.config.sweep_failure_policy)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Create a manager; call [`start`](Self::start) to begin idle sweeps
    ///
    /// # Errors
    /// - `Error::InvalidConfig` if the configuration does not validate
    /// - `Error::Initialization` if the Prometheus registry cannot be built
    pub fn new(config: SessionManagerConfig) -> Result<Self> {
        config.validate().map_err(Error::InvalidConfig)?;

        let metrics = if config.prometheus_enabled {
            Some(StorageMetrics::new().map_err(|e| {
                error!("Failed to create storage metrics: {}", e);
                Error::Initialization(format!("metrics registry: {}", e))
            })?)
        } else {
            None
        };

        Ok(Self {
            config,
            sessions: DashMap::new(),
            active_sessions: Arc::new(AtomicUsize::new(0)),
            metrics,
            hooks: RwLock::new(Vec::new()),
            sweeper: FairMutex::new(None),
        })
    }

    pub fn config(&self) -> &SessionManagerConfig {
        &self.config
    }

    /// Prometheus metrics, when enabled
    pub fn metrics(&self) -> Option<&StorageMetrics> {
        self.metrics.as_ref()
    }

    /// Prometheus text exposition of manager-wide metrics, when enabled
    pub fn encode_metrics(&self) -> Result<Option<String>> {
        self.metrics
            .as_ref()
            .map(|m| {
                m.encode_text()
                    .map_err(|e| Error::Internal(format!("metrics encoding: {}", e)))
            })
            .transpose()
    }

    /// Number of live sessions
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn contains(&self, session_key: &str) -> bool {
        self.sessions.contains_key(session_key)
    }

    /// Register a hook run on every teardown
    pub async fn add_teardown_hook(&self, hook: Arc<dyn SessionTeardownHook>) {
        self.hooks.write().await.push(hook);
    }

    /// Start the periodic idle sweep; a no-op if already running
    pub async fn start(self: &Arc<Self>) {
        let mut sweeper = self.sweeper.acquire().await;
        if sweeper.is_some() {
            return;
        }
        *sweeper = Some(spawn_sweep_task(self, self.config.sweep_interval()));
        info!(
            idle_timeout_ms = self.config.idle_timeout_ms,
            sweep_interval_ms = self.config.sweep_interval_ms,
            "Session manager started"
        );
    }

    /// Stop the idle sweep and tear down every session
    pub async fn shutdown(&self) -> Result<usize> {
        if let Some(task) = self.sweeper.acquire().await.take() {
            task.shutdown().await;
        }
        let cleared = self.clear_all().await;
        info!("Session manager shut down");
        cleared
    }

    /// Store for `session_key`, creating the session on first access
    ///
    /// `user_id` and `endpoint` are recorded only when the session is created.
    /// The store's access time is refreshed before the handle is returned.
    pub async fn get_storage(
        &self,
        session_key: &str,
        user_id: Option<&str>,
        endpoint: Option<&str>,
    ) -> Result<Arc<FilterStore>> {
        let (entry, created) = match self.sessions.entry(session_key.to_string()) {
            Entry::Occupied(occupied) => {
                let entry = Arc::clone(occupied.get());
                entry.store.touch();
                (entry, false)
            }
            Entry::Vacant(vacant) => {
                let entry = Arc::new(self.build_entry(session_key, user_id, endpoint));
                vacant.insert(Arc::clone(&entry));
                (entry, true)
            }
        };

        if created {
            let active = self.active_sessions.fetch_add(1, Ordering::AcqRel) + 1;
            if let Some(m) = &self.metrics {
                m.record_session_created(active);
            }
            info!(session_key = %session_key, active_sessions = active, "Created filter session");

            if self.config.start_collectors
                && let Err(e) = entry.collector.initialize().await
            {
                error!(session_key = %session_key, "Failed to start statistics collector: {}", e);
                self.discard_unstarted(&entry);
                return Err(e);
            }
        }

        Ok(Arc::clone(&entry.store))
    }

    /// Forget a just-created session whose collector failed to start
    fn discard_unstarted(&self, entry: &Arc<SessionEntry>) {
        let removed = self
            .sessions
            .remove_if(&entry.info.key, |_, current| Arc::ptr_eq(current, entry));
        if removed.is_none() {
            return;
        }
        let active = self
            .active_sessions
            .fetch_sub(1, Ordering::AcqRel)
            .saturating_sub(1);
        if let Some(m) = &self.metrics {
            m.record_session_removed(active, false);
        }
    }

    fn build_entry(
        &self,
        session_key: &str,
        user_id: Option<&str>,
        endpoint: Option<&str>,
    ) -> SessionEntry {
        let info = SessionInfo::new(session_key)
            .with_user_id(user_id.map(str::to_string))
            .with_endpoint(endpoint.map(str::to_string));

        let collector = StatisticsCollector::with_context(
            session_key,
            self.config.statistics.clone(),
            CollectorContext {
                metrics: self.metrics.clone(),
                active_sessions: Some(Arc::clone(&self.active_sessions)),
            },
        );
        let store = FilterStore::with_recorder(session_key, Arc::new(collector.clone()));

        SessionEntry {
            info,
            store: Arc::new(store),
            collector,
        }
    }

    /// Statistics collector for a live session
    pub fn get_statistics(&self, session_key: &str) -> Option<StatisticsCollector> {
        self.sessions
            .get(session_key)
            .map(|entry| entry.collector.clone())
    }

    /// Identity of a live session
    pub fn session_info(&self, session_key: &str) -> Option<SessionInfo> {
        self.sessions.get(session_key).map(|entry| entry.info.clone())
    }

    /// Tear down and forget a session
    ///
    /// Returns `false` for an unknown key.
    pub async fn remove_storage(&self, session_key: &str) -> Result<bool> {
        let Some((_, entry)) = self.sessions.remove(session_key) else {
            return Ok(false);
        };
        self.teardown(entry, TeardownReason::Removed).await?;
        Ok(true)
    }

    /// One statistics snapshot per live session
    pub async fn get_all_stats(&self) -> Vec<StatisticsSnapshot> {
        let mut snapshots = Vec::with_capacity(self.sessions.len());
        for entry in self.live_entries() {
            snapshots.push(entry.collector.get_snapshot().await);
        }
        snapshots
    }

    /// Totals across every live session
    pub async fn get_manager_stats(&self) -> ManagerStats {
        let mut stats = ManagerStats::default();
        for entry in self.live_entries() {
            let store_stats = entry.store.get_stats().await;
            let snapshot = entry.collector.get_snapshot().await;

            stats.session_count += 1;
            stats.total_filters += store_stats.filter_count;
            stats.total_memory_bytes += store_stats.memory_usage_bytes;
            stats.total_operations += snapshot.total_operations;

            if stats
                .oldest_session_created_at
                .is_none_or(|oldest| entry.info.created_at < oldest)
            {
                stats.oldest_session = Some(entry.info.key.clone());
                stats.oldest_session_created_at = Some(entry.info.created_at);
            }
        }
        stats
    }

    /// Tear down every session
    ///
    /// Every session is removed even if some teardowns fail; the first failure
    /// is returned afterwards. On success returns how many were removed.
    pub async fn clear_all(&self) -> Result<usize> {
        let keys: Vec<SessionKey> = self.sessions.iter().map(|e| e.key().clone()).collect();
        let mut cleared = 0;
        let mut first_error = None;

        for key in keys {
            let Some((_, entry)) = self.sessions.remove(&key) else {
                continue;
            };
            cleared += 1;
            if let Err(e) = self.teardown(entry, TeardownReason::Cleared).await {
                warn!(session_key = %key, "Session teardown failed: {}", e);
                first_error.get_or_insert(e);
            }
        }

        if cleared > 0 {
            info!(cleared, "Cleared filter sessions");
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(cleared),
        }
    }

    /// Evict every session idle longer than the configured timeout
    ///
    /// With `SweepFailurePolicy::Propagate` the first teardown failure aborts
    /// the sweep; sessions not yet visited stay alive.
    pub async fn sweep_idle(&self) -> Result<SweepReport> {
        let timeout = self.config.idle_timeout();
        let now = Utc::now();
        let mut report = SweepReport {
            examined: self.sessions.len(),
            ..Default::default()
        };

        let candidates: Vec<SessionKey> = self
            .sessions
            .iter()
            .filter(|e| e.store.is_idle(now, timeout))
            .map(|e| e.key().clone())
            .collect();

        for key in candidates {
            let removed = self
                .sessions
                .remove_if(&key, |_, entry| entry.store.is_idle(Utc::now(), timeout));
            let Some((_, entry)) = removed else {
                report.reprieved += 1;
                continue;
            };
            report.evicted.push(key.clone());

            let Err(e) = self.teardown(entry, TeardownReason::Evicted).await else {
                continue;
            };
            if let Some(m) = &self.metrics {
                m.record_sweep_failure();
            }
            match self.config.sweep_failure_policy {
                SweepFailurePolicy::Isolate => {
                    warn!(session_key = %key, "Idle session teardown failed: {}", e);
                    report.failures.push(SweepFailure {
                        session_key: key,
                        reason: e.to_string(),
                    });
                }
                SweepFailurePolicy::Propagate => return Err(e),
            }
        }

        if report.evicted_count() > 0 {
            info!(
                evicted = report.evicted_count(),
                failures = report.failures.len(),
                remaining = self.sessions.len(),
                "Evicted idle filter sessions"
            );
        } else {
            debug!(examined = report.examined, "Idle sweep found nothing to evict");
        }
        Ok(report)
    }

    /// Snapshot of the live entries, so no map guard is held across awaits
    fn live_entries(&self) -> Vec<Arc<SessionEntry>> {
        self.sessions.iter().map(|e| Arc::clone(e.value())).collect()
    }

    /// Clear the store, close the collector, then run hooks
    async fn teardown(&self, entry: Arc<SessionEntry>, reason: TeardownReason) -> Result<()> {
        let key = entry.info.key.clone();
        let removed = entry.store.clear().await?;
        entry.collector.close().await;

        let active = self
            .active_sessions
            .fetch_sub(1, Ordering::AcqRel)
            .saturating_sub(1);
        if let Some(m) = &self.metrics {
            m.record_session_removed(active, reason == TeardownReason::Evicted);
        }
        debug!(
            session_key = %key,
            reason = %reason,
            filters_removed = removed,
            "Tore down filter session"
        );

        let hooks: Vec<Arc<dyn SessionTeardownHook>> = self.hooks.read().await.clone();
        let mut first_error = None;
        for hook in hooks {
            if let Err(e) = hook.on_teardown(&entry.info, reason).await {
                first_error.get_or_insert(Error::Teardown {
                    session_key: key.clone(),
                    reason: e.to_string(),
                });
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use filterkeep_core::NewFilter;
    use std::sync::Mutex;
    use std::time::Duration;

    fn test_config() -> SessionManagerConfig {
        SessionManagerConfig {
            idle_timeout_ms: 50,
            start_collectors: false,
            ..Default::default()
        }
    }

    #[derive(Default)]
    struct RecordingHook {
        seen: Mutex<Vec<(String, TeardownReason)>>,
        fail: bool,
    }

    #[async_trait]
    impl SessionTeardownHook for RecordingHook {
        async fn on_teardown(&self, session: &SessionInfo, reason: TeardownReason) -> Result<()> {
            self.seen.lock().unwrap().push((session.key.clone(), reason));
            if self.fail {
                return Err(Error::Internal("hook failed".to_string()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_get_storage_returns_same_store() {
        let manager = SessionManager::new(test_config()).unwrap();
        let a = manager.get_storage("s1", None, None).await.unwrap();
        let b = manager.get_storage("s1", None, None).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(manager.session_count(), 1);
    }

    #[tokio::test]
    async fn test_first_association_wins() {
        let manager = SessionManager::new(test_config()).unwrap();
        manager
            .get_storage("s1", Some("alice"), Some("https://tasks.example"))
            .await
            .unwrap();
        manager.get_storage("s1", Some("bob"), None).await.unwrap();

        let info = manager.session_info("s1").unwrap();
        assert_eq!(info.user_id.as_deref(), Some("alice"));
        assert_eq!(info.endpoint.as_deref(), Some("https://tasks.example"));
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let manager = SessionManager::new(test_config()).unwrap();
        let s1 = manager.get_storage("s1", None, None).await.unwrap();
        let s2 = manager.get_storage("s2", None, None).await.unwrap();

        s1.create(NewFilter::new("mine", "owner=me")).await.unwrap();
        assert_eq!(s1.list().await.unwrap().len(), 1);
        assert!(s2.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_storage() {
        let manager = SessionManager::new(test_config()).unwrap();
        let hook = Arc::new(RecordingHook::default());
        manager.add_teardown_hook(hook.clone()).await;

        let store = manager.get_storage("s1", None, None).await.unwrap();
        store.create(NewFilter::new("a", "x=1")).await.unwrap();

        assert!(manager.remove_storage("s1").await.unwrap());
        assert!(!manager.contains("s1"));
        assert!(manager.get_statistics("s1").is_none());
        assert!(store.list().await.unwrap().is_empty());
        assert_eq!(
            *hook.seen.lock().unwrap(),
            vec![("s1".to_string(), TeardownReason::Removed)]
        );

        // Unknown key is a no-op
        assert!(!manager.remove_storage("s1").await.unwrap());

        // A later access builds a fresh pair
        let fresh = manager.get_storage("s1", None, None).await.unwrap();
        assert!(!Arc::ptr_eq(&store, &fresh));
    }

    #[tokio::test]
    async fn test_stats_across_sessions() {
        let manager = SessionManager::new(test_config()).unwrap();
        let s1 = manager.get_storage("s1", None, None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let s2 = manager.get_storage("s2", None, None).await.unwrap();
        s1.create(NewFilter::new("a", "x=1")).await.unwrap();
        s2.create(NewFilter::new("b", "x=2")).await.unwrap();
        s2.create(NewFilter::new("c", "x=3")).await.unwrap();

        let all = manager.get_all_stats().await;
        assert_eq!(all.len(), 2);

        let stats = manager.get_manager_stats().await;
        assert_eq!(stats.session_count, 2);
        assert_eq!(stats.total_filters, 3);
        assert_eq!(stats.total_operations, 3);
        assert!(stats.total_memory_bytes > 0);
        assert_eq!(stats.oldest_session.as_deref(), Some("s1"));
    }

    #[tokio::test]
    async fn test_clear_all() {
        let manager = SessionManager::new(test_config()).unwrap();
        manager.get_storage("s1", None, None).await.unwrap();
        manager.get_storage("s2", None, None).await.unwrap();

        assert_eq!(manager.clear_all().await.unwrap(), 2);
        assert_eq!(manager.session_count(), 0);
        assert!(manager.get_all_stats().await.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_evicts_idle_and_keeps_touched() {
        let manager = SessionManager::new(test_config()).unwrap();
        manager.get_storage("idle", None, None).await.unwrap();
        manager.get_storage("busy", None, None).await.unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;
        manager.get_storage("busy", None, None).await.unwrap();

        let report = manager.sweep_idle().await.unwrap();
        assert_eq!(report.examined, 2);
        assert_eq!(report.evicted, vec!["idle".to_string()]);
        assert!(!manager.contains("idle"));
        assert!(manager.contains("busy"));
    }

    #[tokio::test]
    async fn test_sweep_isolates_failures() {
        let manager = SessionManager::new(test_config()).unwrap();
        manager
            .add_teardown_hook(Arc::new(RecordingHook {
                fail: true,
                ..Default::default()
            }))
            .await;
        manager.get_storage("a", None, None).await.unwrap();
        manager.get_storage("b", None, None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;

        let report = manager.sweep_idle().await.unwrap();
        assert_eq!(report.evicted_count(), 2);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(manager.session_count(), 0);
    }

    #[tokio::test]
    async fn test_sweep_propagates_first_failure() {
        let config = SessionManagerConfig {
            sweep_failure_policy: SweepFailurePolicy::Propagate,
            ..test_config()
        };
        let manager = SessionManager::new(config).unwrap();
        manager
            .add_teardown_hook(Arc::new(RecordingHook {
                fail: true,
                ..Default::default()
            }))
            .await;
        manager.get_storage("a", None, None).await.unwrap();
        manager.get_storage("b", None, None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;

        let err = manager.sweep_idle().await.unwrap_err();
        assert!(matches!(err, Error::Teardown { .. }));
        assert_eq!(manager.session_count(), 1);
    }

    #[tokio::test]
    async fn test_metrics_track_sessions() {
        let manager = SessionManager::new(test_config()).unwrap();
        manager.get_storage("s1", None, None).await.unwrap();
        manager.get_storage("s2", None, None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        manager.sweep_idle().await.unwrap();

        let metrics = manager.metrics().unwrap();
        assert_eq!(metrics.sessions_created_total.get(), 2);
        assert_eq!(metrics.sessions_evicted_total.get(), 2);
        assert_eq!(metrics.active_sessions.get(), 0.0);

        let text = manager.encode_metrics().unwrap().unwrap();
        assert!(text.contains("filterkeep_sessions_evicted_total 2"));
    }

    #[tokio::test]
    async fn test_discarded_session_releases_gauge() {
        let manager = SessionManager::new(test_config()).unwrap();
        manager.get_storage("s1", None, None).await.unwrap();
        manager.get_storage("s2", None, None).await.unwrap();
        let metrics = manager.metrics().unwrap();
        assert_eq!(metrics.active_sessions.get(), 2.0);

        let entry = manager.sessions.get("s1").map(|e| Arc::clone(e.value())).unwrap();
        manager.discard_unstarted(&entry);
        assert!(!manager.contains("s1"));
        assert_eq!(metrics.active_sessions.get(), 1.0);
        assert_eq!(metrics.sessions_evicted_total.get(), 0);

        // A stale handle cannot discard the replacement session
        manager.get_storage("s1", None, None).await.unwrap();
        manager.discard_unstarted(&entry);
        assert!(manager.contains("s1"));
        assert_eq!(metrics.active_sessions.get(), 2.0);
    }

    #[tokio::test]
    async fn test_prometheus_disabled() {
        let config = SessionManagerConfig {
            prometheus_enabled: false,
            ..test_config()
        };
        let manager = SessionManager::new(config).unwrap();
        assert!(manager.metrics().is_none());
        assert_eq!(manager.encode_metrics().unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let config = SessionManagerConfig {
            idle_timeout_ms: 0,
            ..Default::default()
        };
        assert!(matches!(
            SessionManager::new(config),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_collectors_start_with_session() {
        let config = SessionManagerConfig {
            start_collectors: true,
            ..test_config()
        };
        let manager = SessionManager::new(config).unwrap();
        manager.get_storage("s1", None, None).await.unwrap();

        let collector = manager.get_statistics("s1").unwrap();
        assert!(collector.is_initialized());

        manager.remove_storage("s1").await.unwrap();
        assert!(!collector.is_initialized());
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sweep() {
        let config = SessionManagerConfig {
            idle_timeout_ms: 1_000,
            sweep_interval_ms: 60_000,
            ..test_config()
        };
        let manager = Arc::new(SessionManager::new(config).unwrap());
        manager.start().await;
        manager.get_storage("s1", None, None).await.unwrap();

        // Idleness is judged on wall-clock time, which paused tokio time does not advance
        std::thread::sleep(Duration::from_millis(1_100));
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(!manager.contains("s1"));

        manager.shutdown().await.unwrap();
    }
}
