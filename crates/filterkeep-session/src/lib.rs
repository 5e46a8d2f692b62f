//! FilterKeep Sessions
//!
//! This crate owns the per-session lifecycle:
//! - Lazy creation of a filter store and statistics collector per session key
//! - Idle eviction on a background sweep
//! - Teardown hooks and configurable sweep failure handling
//! - YAML/TOML configuration loading

pub mod config;
pub mod hooks;
pub mod manager;
pub mod sweep;

pub use config::{FilterKeepConfig, SessionManagerConfig, SweepFailurePolicy};
pub use hooks::{SessionTeardownHook, TeardownReason};
pub use manager::{ManagerStats, SessionManager};
pub use sweep::{SweepFailure, SweepReport};
