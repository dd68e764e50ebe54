use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};

use super::{Lock, LockError, LockManager};

/// In-memory lock backed by `Mutex<bool>` + `Condvar`.
pub struct InMemoryLock {
    state: Mutex<bool>,
    wake: Condvar,
}

impl InMemoryLock {
    pub fn new() -> Self {
        InMemoryLock {
            state: Mutex::new(false),
            wake: Condvar::new(),
        }
    }
}

impl Default for InMemoryLock {
    fn default() -> Self {
        Self::new()
    }
}

impl Lock for InMemoryLock {
    fn lock(&self) -> Result<(), LockError> {
        let mut locked = self
            .state
            .lock()
            .map_err(|e| LockError::Poisoned(e.to_string()))?;
        while *locked {
            locked = self
                .wake
                .wait(locked)
                .map_err(|e| LockError::Poisoned(e.to_string()))?;
        }
        *locked = true;
        Ok(())
    }

    fn try_lock(&self) -> Result<bool, LockError> {
        let mut locked = self
            .state
            .lock()
            .map_err(|e| LockError::Poisoned(e.to_string()))?;
        if *locked {
            Ok(false)
        } else {
            *locked = true;
            Ok(true)
        }
    }

    fn unlock(&self) -> Result<(), LockError> {
        let mut locked = self
            .state
            .lock()
            .map_err(|e| LockError::Poisoned(e.to_string()))?;
        if *locked {
            *locked = false;
            self.wake.notify_one();
        }
        Ok(())
    }
}

/// Map size that triggers the first prune.
const PRUNE_AT: usize = 1024;

#[derive(Default)]
struct LockTable {
    locks: HashMap<String, Arc<InMemoryLock>>,
    prune_at: usize,
}

impl LockTable {
    /// Drop locks nobody outside the table holds.
    ///
    /// Holders and waiters keep an `Arc` clone, so an entry with a single strong
    /// reference is neither locked nor awaited and can be recreated on demand.
    fn prune(&mut self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - self.locks.len()
    }
}

/// Lazily creates one `InMemoryLock` per key.
///
/// Idle locks are pruned whenever the map doubles past its last size, so the map
/// tracks the number of keys in use rather than every key ever seen.
#[derive(Default)]
pub struct InMemoryLockManager {
    table: Mutex<LockTable>,
}

impl InMemoryLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.table.lock().map(|t| t.locks.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove idle locks now; returns how many were dropped.
    pub fn prune(&self) -> Result<usize, LockError> {
        let mut table = self
            .table
            .lock()
            .map_err(|_| LockError::Poisoned("lock manager map poisoned".into()))?;
        Ok(table.prune())
    }
}

impl LockManager for InMemoryLockManager {
    fn get_lock(&self, key: &str) -> Result<Arc<dyn Lock>, LockError> {
        let mut table = self
            .table
            .lock()
            .map_err(|_| LockError::Poisoned("lock manager map poisoned".into()))?;
        if table.locks.len() >= table.prune_at.max(PRUNE_AT) {
            let dropped = table.prune();
            table.prune_at = table.locks.len() * 2;
            tracing::trace!(dropped, kept = table.locks.len(), "idle locks pruned");
        }
        let lock: Arc<dyn Lock> = table
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(InMemoryLock::new()))
            .clone();
        Ok(lock)
    }
}
