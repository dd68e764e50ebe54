//! Per-process locking.
//!
//! When `RuntimeConfig::lock_per_process` is on, the runtime holds one lock per
//! `(process_type, pid)` from load until the events are appended, so commands for
//! the same process run one after another. Commands for different processes never
//! share a lock.

mod in_memory;

pub use in_memory::{InMemoryLock, InMemoryLockManager};

use std::fmt;
use std::sync::Arc;

/// Error type for lock operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    /// The underlying primitive was poisoned by a panicking holder.
    Poisoned(String),
    AcquireFailed(String),
    ReleaseFailed(String),
    Other(String),
}

impl fmt::Display for LockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockError::Poisoned(msg) => write!(f, "lock poisoned: {}", msg),
            LockError::AcquireFailed(msg) => write!(f, "lock acquire failed: {}", msg),
            LockError::ReleaseFailed(msg) => write!(f, "lock release failed: {}", msg),
            LockError::Other(msg) => write!(f, "lock error: {}", msg),
        }
    }
}

impl std::error::Error for LockError {}

/// A single lock instance.
pub trait Lock: Send + Sync {
    /// Acquire the lock, blocking until it becomes available.
    fn lock(&self) -> Result<(), LockError>;

    /// Returns `Ok(true)` if acquired, `Ok(false)` if already held.
    fn try_lock(&self) -> Result<bool, LockError>;

    fn unlock(&self) -> Result<(), LockError>;
}

/// Hands out one lock per key.
///
/// Repeated calls with the same key must return the same logical lock.
pub trait LockManager: Send + Sync {
    fn get_lock(&self, key: &str) -> Result<Arc<dyn Lock>, LockError>;
}

/// Lock key for one process instance.
///
/// The process type is length-prefixed so no two `(process_type, pid)` pairs
/// share a key, whatever characters they contain.
pub fn process_lock_key(process_type: &str, pid: &str) -> String {
    format!("{}:{}:{}", process_type.len(), process_type, pid)
}

/// Holds a lock until dropped.
pub struct LockGuard {
    lock: Arc<dyn Lock>,
    key: String,
}

impl LockGuard {
    /// Block until `key` is acquired from `manager`.
    pub fn acquire(manager: &dyn LockManager, key: &str) -> Result<Self, LockError> {
        let lock = manager.get_lock(key)?;
        lock.lock()?;
        tracing::trace!(key, "lock acquired");
        Ok(LockGuard {
            lock,
            key: key.to_string(),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = self.lock.unlock() {
            tracing::error!(key = %self.key, error = %e, "failed to release lock");
        }
    }
}
