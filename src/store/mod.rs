//! Event store - append-only, per-stream ordered log of events.
//!
//! A stream holds the events of many processes. Within a stream every event has a
//! 1-based `position`; within a process (`process_type`, `pid`) every event has a
//! 1-based `version` with no gaps. Appends are atomic: either every event of a call
//! becomes visible or none does.

mod in_memory;

pub use in_memory::InMemoryEventStore;

use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::message::Message;

/// Identifier of an open store transaction.
pub type TransactionId = u64;

/// An event that has been appended to a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub stream_name: String,
    /// 1-based position within the stream.
    pub position: u64,
    pub process_type: String,
    pub pid: String,
    /// 1-based version within the process.
    pub version: u64,
    pub event: Message,
    pub recorded_at: SystemTime,
}

impl StoredEvent {
    pub fn name(&self) -> &str {
        self.event.name()
    }
}

/// An event waiting to be appended.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEvent {
    pub process_type: String,
    pub pid: String,
    pub version: u64,
    pub event: Message,
}

impl PendingEvent {
    pub fn new(
        process_type: impl Into<String>,
        pid: impl Into<String>,
        version: u64,
        event: Message,
    ) -> Self {
        Self {
            process_type: process_type.into(),
            pid: pid.into(),
            version,
            event,
        }
    }
}

/// Error type for event store operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    StreamNotFound(String),
    StreamAlreadyExists(String),
    /// The process advanced past the version the appender loaded.
    ConcurrencyConflict {
        stream: String,
        process_type: String,
        pid: String,
        expected: u64,
        actual: u64,
    },
    /// An append would leave a gap (or start below 1).
    NonContiguousVersion {
        stream: String,
        process_type: String,
        pid: String,
        expected: u64,
        got: u64,
    },
    /// The transaction id is unknown or already closed.
    TransactionNotStarted(TransactionId),
    LockPoisoned(&'static str),
    /// Snapshot (de)serialization failed.
    Snapshot(String),
    Other(String),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::StreamNotFound(_) => ErrorKind::NotFound,
            StoreError::StreamAlreadyExists(_) => ErrorKind::AlreadyExists,
            StoreError::ConcurrencyConflict { .. } => ErrorKind::Conflict,
            StoreError::NonContiguousVersion { .. } => ErrorKind::InvalidArgument,
            StoreError::TransactionNotStarted(_) => ErrorKind::TransactionNotStarted,
            StoreError::LockPoisoned(_) | StoreError::Snapshot(_) | StoreError::Other(_) => {
                ErrorKind::Storage
            }
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::StreamNotFound(name) => write!(f, "stream {} not found", name),
            StoreError::StreamAlreadyExists(name) => write!(f, "stream {} already exists", name),
            StoreError::ConcurrencyConflict {
                stream,
                process_type,
                pid,
                expected,
                actual,
            } => write!(
                f,
                "concurrent write detected for {}:{} in {} (expected version {}, got {})",
                process_type, pid, stream, expected, actual
            ),
            StoreError::NonContiguousVersion {
                stream,
                process_type,
                pid,
                expected,
                got,
            } => write!(
                f,
                "non-contiguous version for {}:{} in {} (expected {}, got {})",
                process_type, pid, stream, expected, got
            ),
            StoreError::TransactionNotStarted(id) => {
                write!(f, "transaction {} was not started", id)
            }
            StoreError::LockPoisoned(operation) => {
                write!(f, "event store lock poisoned during {}", operation)
            }
            StoreError::Snapshot(msg) => write!(f, "snapshot error: {}", msg),
            StoreError::Other(msg) => write!(f, "event store error: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

/// Storage backend for process event streams.
pub trait EventStore: Send + Sync {
    fn create_stream(&self, stream: &str) -> Result<(), StoreError>;

    fn delete_stream(&self, stream: &str) -> Result<(), StoreError>;

    fn has_stream(&self, stream: &str) -> Result<bool, StoreError>;

    /// Atomically append events. Every process touched must continue exactly at
    /// its current version + 1; otherwise nothing is written.
    fn append_to(
        &self,
        stream: &str,
        events: Vec<PendingEvent>,
    ) -> Result<Vec<StoredEvent>, StoreError>;

    /// Events of one process with `version >= min_version`, in version order.
    fn load_process_events(
        &self,
        stream: &str,
        process_type: &str,
        pid: &str,
        min_version: u64,
    ) -> Result<Vec<StoredEvent>, StoreError>;

    fn load_events_by_correlation_id(
        &self,
        stream: &str,
        correlation_id: Uuid,
    ) -> Result<Vec<StoredEvent>, StoreError>;

    fn load_events_by_causation_id(
        &self,
        stream: &str,
        causation_id: Uuid,
    ) -> Result<Vec<StoredEvent>, StoreError>;

    /// Events with `position > after_position`, in position order.
    fn load_stream(
        &self,
        stream: &str,
        after_position: u64,
        limit: Option<usize>,
    ) -> Result<Vec<StoredEvent>, StoreError>;

    /// Current version of a process (0 when it has no events).
    fn last_version(
        &self,
        stream: &str,
        process_type: &str,
        pid: &str,
    ) -> Result<u64, StoreError> {
        Ok(self
            .load_process_events(stream, process_type, pid, 1)?
            .last()
            .map(|e| e.version)
            .unwrap_or(0))
    }
}

/// Stores that can group several appends into one atomic commit.
pub trait TransactionalEventStore: EventStore {
    fn begin_transaction(&self) -> Result<TransactionId, StoreError>;

    /// Buffer an append; nothing is visible until `commit_transaction`.
    fn append_in_transaction(
        &self,
        transaction: TransactionId,
        stream: &str,
        events: Vec<PendingEvent>,
    ) -> Result<(), StoreError>;

    fn commit_transaction(&self, transaction: TransactionId)
        -> Result<Vec<StoredEvent>, StoreError>;

    fn rollback_transaction(&self, transaction: TransactionId) -> Result<(), StoreError>;
}
