//! FilterKeep Core Types and Traits
//!
//! This crate provides the fundamental types shared by every FilterKeep crate:
//! - Saved filter records and their create/update payloads
//! - Per-operation metrics and the recorder trait stores report through
//! - Session identity
//! - Core error types

pub mod error;
pub mod filter;
pub mod operation;
pub mod session;

pub use error::{Error, Result};
pub use filter::{FilterPatch, NewFilter, SavedFilter};
pub use operation::{OperationKind, OperationMetrics, OperationRecorder, StorageFootprint};
pub use session::{SessionInfo, SessionKey};
