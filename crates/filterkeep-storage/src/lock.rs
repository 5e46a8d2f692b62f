//! FIFO-fair asynchronous mutual exclusion
//!
//! [`FairMutex`] serializes access to a critical section. Waiters are served in
//! the order they called [`FairMutex::acquire`], so no caller starves behind a
//! stream of later arrivals.
//!
//! The lock is not re-entrant. A holder that calls `acquire` on the same lock
//! again before releasing waits on itself forever. This is a caller contract
//! and is not detected.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::{Mutex, MutexGuard};

/// Acquisition counters for a [`FairMutex`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockStats {
    /// Total successful acquisitions
    pub acquisitions: u64,
    /// Acquisitions that had to wait for another holder
    pub contended: u64,
    /// Callers currently queued
    pub waiters: usize,
}

/// FIFO-fair async lock protecting a value
///
/// Built on `tokio::sync::Mutex`, whose waiter queue is strictly first-in,
/// first-out.
#[derive(Debug, Default)]
pub struct FairMutex<T> {
    inner: Mutex<T>,
    waiters: AtomicUsize,
    acquisitions: AtomicU64,
    contended: AtomicU64,
}

/// Release handle for a held [`FairMutex`]
///
/// The lock is released exactly once: by [`FairMutexGuard::release`] or when
/// the guard is dropped, whichever comes first. Dropping covers every early
/// return and `?` path.
#[derive(Debug)]
pub struct FairMutexGuard<'a, T> {
    guard: MutexGuard<'a, T>,
}

/// Decrements the waiter count even if the acquiring future is cancelled
struct WaitTicket<'a>(&'a AtomicUsize);

impl Drop for WaitTicket<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl<T> FairMutex<T> {
    /// Create a new unlocked mutex
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
            waiters: AtomicUsize::new(0),
            acquisitions: AtomicU64::new(0),
            contended: AtomicU64::new(0),
        }
    }

    /// Wait for exclusive access
    ///
    /// Resolves once every earlier caller has acquired and released the lock.
    pub async fn acquire(&self) -> FairMutexGuard<'_, T> {
        if let Ok(guard) = self.inner.try_lock() {
            // try_lock fails while waiters are queued, so this never overtakes them
            self.acquisitions.fetch_add(1, Ordering::Relaxed);
            return FairMutexGuard { guard };
        }

        self.waiters.fetch_add(1, Ordering::AcqRel);
        let ticket = WaitTicket(&self.waiters);
        let guard = self.inner.lock().await;
        drop(ticket);

        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        self.contended.fetch_add(1, Ordering::Relaxed);
        FairMutexGuard { guard }
    }

    /// Acquire without waiting
    ///
    /// Returns `None` if the lock is held or other callers are queued.
    pub fn try_acquire(&self) -> Option<FairMutexGuard<'_, T>> {
        let guard = self.inner.try_lock().ok()?;
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        Some(FairMutexGuard { guard })
    }

    /// Whether some caller currently holds the lock
    pub fn is_locked(&self) -> bool {
        self.inner.try_lock().is_err()
    }

    /// Number of callers queued in `acquire`
    pub fn waiters(&self) -> usize {
        self.waiters.load(Ordering::Acquire)
    }

    /// Snapshot of the acquisition counters
    pub fn stats(&self) -> LockStats {
        LockStats {
            acquisitions: self.acquisitions.load(Ordering::Relaxed),
            contended: self.contended.load(Ordering::Relaxed),
            waiters: self.waiters(),
        }
    }
}

impl<T> FairMutexGuard<'_, T> {
    /// Release the lock now
    pub fn release(self) {
        drop(self);
    }
}

impl<T> Deref for FairMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for FairMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}
