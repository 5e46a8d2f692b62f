//! End-to-end scenarios for FilterKeep
//!
//! Shared fixtures for the tests under `tests/`, which drive the session
//! manager, filter stores and statistics collectors together.

use async_trait::async_trait;
use filterkeep_core::{Error, Result, SessionInfo};
use filterkeep_session::{
    SessionManager, SessionManagerConfig, SessionTeardownHook, SweepFailurePolicy, TeardownReason,
};
use std::sync::{Arc, Mutex};

/// Manager with a short idle timeout and collectors left stopped
pub fn manager_with(idle_timeout_ms: u64, policy: SweepFailurePolicy) -> Arc<SessionManager> {
    let config = SessionManagerConfig {
        idle_timeout_ms,
        sweep_failure_policy: policy,
        start_collectors: false,
        ..Default::default()
    };
    match SessionManager::new(config) {
        Ok(manager) => Arc::new(manager),
        Err(e) => panic!("test manager config rejected: {}", e),
    }
}

/// Teardown hook that records every call and fails for chosen sessions
#[derive(Debug, Default)]
pub struct ScriptedHook {
    failing: Vec<String>,
    calls: Mutex<Vec<(String, TeardownReason)>>,
}

impl ScriptedHook {
    pub fn failing_for<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            failing: keys.into_iter().map(Into::into).collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Sessions torn down so far, in call order
    pub fn calls(&self) -> Vec<(String, TeardownReason)> {
        match self.calls.lock() {
            Ok(calls) => calls.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl SessionTeardownHook for ScriptedHook {
    async fn on_teardown(&self, session: &SessionInfo, reason: TeardownReason) -> Result<()> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((session.key.clone(), reason));
        }
        if self.failing.contains(&session.key) {
            return Err(Error::Internal(format!("hook refused {}", session.key)));
        }
        Ok(())
    }
}
