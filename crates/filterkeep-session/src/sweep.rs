//! Idle-session sweep
//!
//! The sweep runs on its own periodic task and evicts sessions whose store has
//! gone untouched for longer than the idle timeout.

use filterkeep_observability::{PeriodicTask, spawn_periodic};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::manager::SessionManager;

/// One teardown failure tolerated by an isolating sweep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepFailure {
    pub session_key: String,
    pub reason: String,
}

/// Outcome of one sweep pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Sessions alive when the sweep started
    pub examined: usize,
    /// Sessions removed, including those whose teardown failed
    pub evicted: Vec<String>,
    /// Idle candidates accessed again before they could be removed
    pub reprieved: usize,
    pub failures: Vec<SweepFailure>,
}

impl SweepReport {
    pub fn evicted_count(&self) -> usize {
        self.evicted.len()
    }
}

/// Start sweeping `manager` every `interval`
pub(crate) fn spawn_sweep_task(manager: &Arc<SessionManager>, interval: Duration) -> PeriodicTask {
    let weak: Weak<SessionManager> = Arc::downgrade(manager);
    spawn_periodic("session-sweep", interval, move || {
        let weak = weak.clone();
        async move {
            let Some(manager) = weak.upgrade() else {
                return;
            };
            if let Err(e) = manager.sweep_idle().await {
                tracing::error!("Idle session sweep aborted: {}", e);
            }
        }
    })
}
