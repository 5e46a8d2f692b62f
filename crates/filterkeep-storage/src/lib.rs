//! FilterKeep Storage
//!
//! This crate provides the session-scoped, in-memory storage layer:
//! - FIFO-fair async mutual exclusion (`FairMutex`)
//! - Per-session saved filter store (`FilterStore`)

pub mod filter_store;
pub mod lock;

pub use filter_store::{FilterStore, StoreStats};
pub use lock::{FairMutex, FairMutexGuard, LockStats};
