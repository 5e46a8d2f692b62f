//! Session identity
//!
//! A session is the unit of isolation: it owns exactly one filter store and
//! one statistics collector.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque session identifier supplied by the caller
pub type SessionKey = String;

/// Identity and associations of a live session
///
/// The optional associations are fixed by the first `get_storage` call for a
/// key; later calls never overwrite them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Session key
    pub key: SessionKey,

    /// User the session was opened for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Task API endpoint the session talks to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// When the session was first seen
    pub created_at: DateTime<Utc>,
}

impl SessionInfo {
    /// Create session info stamped now
    pub fn new(key: impl Into<SessionKey>) -> Self {
        Self {
            key: key.into(),
            user_id: None,
            endpoint: None,
            created_at: Utc::now(),
        }
    }

    /// Associate a user
    pub fn with_user_id(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }

    /// Associate an endpoint
    pub fn with_endpoint(mut self, endpoint: Option<String>) -> Self {
        self.endpoint = endpoint;
        self
    }
}
