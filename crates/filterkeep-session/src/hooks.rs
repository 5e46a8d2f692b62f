//! Session teardown notification

use async_trait::async_trait;
use filterkeep_core::{Result, SessionInfo};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a session was torn down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeardownReason {
    /// Explicit `remove_storage`
    Removed,
    /// Idle sweep
    Evicted,
    /// `clear_all` or manager shutdown
    Cleared,
}

impl TeardownReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TeardownReason::Removed => "removed",
            TeardownReason::Evicted => "evicted",
            TeardownReason::Cleared => "cleared",
        }
    }
}

impl fmt::Display for TeardownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Callback run after a session's store and collector are torn down
///
/// An error fails the teardown. The idle sweep handles such failures according
/// to its `sweep_failure_policy`.
#[async_trait]
pub trait SessionTeardownHook: Send + Sync {
    async fn on_teardown(&self, session: &SessionInfo, reason: TeardownReason) -> Result<()>;
}
