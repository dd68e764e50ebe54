use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::store::StoreError;

use super::{SnapshotRecord, SnapshotStore};

/// In-memory snapshot store backed by `Arc<RwLock<HashMap>>`.
///
/// Clone-friendly (cloning shares the same underlying storage).
#[derive(Clone, Default)]
pub struct InMemorySnapshotStore {
    storage: Arc<RwLock<HashMap<(String, String), SnapshotRecord>>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    fn get_snapshot(
        &self,
        process_type: &str,
        pid: &str,
    ) -> Result<Option<SnapshotRecord>, StoreError> {
        let storage = self
            .storage
            .read()
            .map_err(|_| StoreError::LockPoisoned("snapshot read"))?;
        Ok(storage
            .get(&(process_type.to_string(), pid.to_string()))
            .cloned())
    }

    fn save_snapshot(&self, record: SnapshotRecord) -> Result<(), StoreError> {
        let mut storage = self
            .storage
            .write()
            .map_err(|_| StoreError::LockPoisoned("snapshot write"))?;
        let key = (record.process_type.clone(), record.pid.clone());
        match storage.get(&key) {
            Some(existing) if existing.version >= record.version => {}
            _ => {
                storage.insert(key, record);
            }
        }
        Ok(())
    }

    fn delete_snapshot(&self, process_type: &str, pid: &str) -> Result<bool, StoreError> {
        let mut storage = self
            .storage
            .write()
            .map_err(|_| StoreError::LockPoisoned("snapshot write"))?;
        Ok(storage
            .remove(&(process_type.to_string(), pid.to_string()))
            .is_some())
    }
}
