//! Process state snapshots.
//!
//! With `RuntimeConfig::snapshot_every` set, the runtime saves the folded state
//! of a process every N versions and later loads only the events after it.

mod in_memory;

pub use in_memory::InMemorySnapshotStore;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::StoreError;

/// Folded state of one process at `version`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub process_type: String,
    pub pid: String,
    pub version: u64,
    pub state: Value,
}

/// Snapshot persistence. One snapshot per process (latest wins).
pub trait SnapshotStore: Send + Sync {
    fn get_snapshot(&self, process_type: &str, pid: &str)
        -> Result<Option<SnapshotRecord>, StoreError>;

    /// Save the snapshot unless a newer one is already stored.
    fn save_snapshot(&self, record: SnapshotRecord) -> Result<(), StoreError>;

    /// Returns true if a snapshot existed.
    fn delete_snapshot(&self, process_type: &str, pid: &str) -> Result<bool, StoreError>;
}
