//! InMemoryEventStore - HashMap-backed event store for testing and development.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::SystemTime;

use uuid::Uuid;

use super::{EventStore, PendingEvent, StoreError, StoredEvent, TransactionId, TransactionalEventStore};

type ProcessKey = (String, String);

#[derive(Default)]
struct StreamLog {
    events: Vec<StoredEvent>,
    heads: HashMap<ProcessKey, u64>,
}

impl StreamLog {
    fn head(&self, key: &ProcessKey) -> u64 {
        self.heads.get(key).copied().unwrap_or(0)
    }

    fn write(&mut self, stream: &str, events: Vec<PendingEvent>) -> Vec<StoredEvent> {
        let now = SystemTime::now();
        let mut stored = Vec::with_capacity(events.len());
        for pending in events {
            let record = StoredEvent {
                stream_name: stream.to_string(),
                position: self.events.len() as u64 + 1,
                process_type: pending.process_type,
                pid: pending.pid,
                version: pending.version,
                event: pending.event,
                recorded_at: now,
            };
            self.heads.insert(
                (record.process_type.clone(), record.pid.clone()),
                record.version,
            );
            self.events.push(record.clone());
            stored.push(record);
        }
        stored
    }
}

/// Check that `events` continue every touched process without gaps.
///
/// `overlay` carries versions claimed by earlier appends of the same batch or
/// transaction that have not been written yet.
fn check_versions(
    stream: &str,
    log: &StreamLog,
    overlay: &mut HashMap<ProcessKey, u64>,
    events: &[PendingEvent],
) -> Result<(), StoreError> {
    for event in events {
        let key = (event.process_type.clone(), event.pid.clone());
        let current = overlay
            .get(&key)
            .copied()
            .unwrap_or_else(|| log.head(&key));
        let expected = current + 1;

        if event.version == 0 || event.version > expected {
            return Err(StoreError::NonContiguousVersion {
                stream: stream.to_string(),
                process_type: event.process_type.clone(),
                pid: event.pid.clone(),
                expected,
                got: event.version,
            });
        }
        if event.version < expected {
            return Err(StoreError::ConcurrencyConflict {
                stream: stream.to_string(),
                process_type: event.process_type.clone(),
                pid: event.pid.clone(),
                expected: event.version - 1,
                actual: current,
            });
        }
        overlay.insert(key, event.version);
    }
    Ok(())
}

/// In-memory event store.
///
/// Clone-friendly via Arc; clones share the same streams and transactions.
#[derive(Clone)]
pub struct InMemoryEventStore {
    streams: Arc<RwLock<HashMap<String, StreamLog>>>,
    transactions: Arc<Mutex<HashMap<TransactionId, Vec<(String, Vec<PendingEvent>)>>>>,
    next_transaction: Arc<AtomicU64>,
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        InMemoryEventStore {
            streams: Arc::new(RwLock::new(HashMap::new())),
            transactions: Arc::new(Mutex::new(HashMap::new())),
            next_transaction: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Create a store with the given streams already created.
    pub fn with_streams(names: &[&str]) -> Self {
        let store = Self::new();
        if let Ok(mut streams) = store.streams.write() {
            for name in names {
                streams.insert(name.to_string(), StreamLog::default());
            }
        }
        store
    }

    /// Number of events in a stream (0 when the stream is missing).
    pub fn stream_len(&self, stream: &str) -> usize {
        self.streams
            .read()
            .map(|s| s.get(stream).map(|log| log.events.len()).unwrap_or(0))
            .unwrap_or(0)
    }

    fn filter_stream<F>(&self, stream: &str, predicate: F) -> Result<Vec<StoredEvent>, StoreError>
    where
        F: Fn(&StoredEvent) -> bool,
    {
        let streams = self
            .streams
            .read()
            .map_err(|_| StoreError::LockPoisoned("read"))?;
        let log = streams
            .get(stream)
            .ok_or_else(|| StoreError::StreamNotFound(stream.to_string()))?;
        Ok(log.events.iter().filter(|e| predicate(e)).cloned().collect())
    }
}

impl EventStore for InMemoryEventStore {
    fn create_stream(&self, stream: &str) -> Result<(), StoreError> {
        let mut streams = self
            .streams
            .write()
            .map_err(|_| StoreError::LockPoisoned("write"))?;
        if streams.contains_key(stream) {
            return Err(StoreError::StreamAlreadyExists(stream.to_string()));
        }
        streams.insert(stream.to_string(), StreamLog::default());
        Ok(())
    }

    fn delete_stream(&self, stream: &str) -> Result<(), StoreError> {
        let mut streams = self
            .streams
            .write()
            .map_err(|_| StoreError::LockPoisoned("write"))?;
        streams
            .remove(stream)
            .map(|_| ())
            .ok_or_else(|| StoreError::StreamNotFound(stream.to_string()))
    }

    fn has_stream(&self, stream: &str) -> Result<bool, StoreError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| StoreError::LockPoisoned("read"))?;
        Ok(streams.contains_key(stream))
    }

    fn append_to(
        &self,
        stream: &str,
        events: Vec<PendingEvent>,
    ) -> Result<Vec<StoredEvent>, StoreError> {
        let mut streams = self
            .streams
            .write()
            .map_err(|_| StoreError::LockPoisoned("write"))?;
        let log = streams
            .get_mut(stream)
            .ok_or_else(|| StoreError::StreamNotFound(stream.to_string()))?;

        check_versions(stream, log, &mut HashMap::new(), &events)?;
        let stored = log.write(stream, events);
        tracing::debug!(stream, count = stored.len(), "events appended");
        Ok(stored)
    }

    fn load_process_events(
        &self,
        stream: &str,
        process_type: &str,
        pid: &str,
        min_version: u64,
    ) -> Result<Vec<StoredEvent>, StoreError> {
        self.filter_stream(stream, |e| {
            e.process_type == process_type && e.pid == pid && e.version >= min_version
        })
    }

    fn load_events_by_correlation_id(
        &self,
        stream: &str,
        correlation_id: Uuid,
    ) -> Result<Vec<StoredEvent>, StoreError> {
        self.filter_stream(stream, |e| e.event.correlation_id() == Some(correlation_id))
    }

    fn load_events_by_causation_id(
        &self,
        stream: &str,
        causation_id: Uuid,
    ) -> Result<Vec<StoredEvent>, StoreError> {
        self.filter_stream(stream, |e| e.event.causation_id() == Some(causation_id))
    }

    fn load_stream(
        &self,
        stream: &str,
        after_position: u64,
        limit: Option<usize>,
    ) -> Result<Vec<StoredEvent>, StoreError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| StoreError::LockPoisoned("read"))?;
        let log = streams
            .get(stream)
            .ok_or_else(|| StoreError::StreamNotFound(stream.to_string()))?;
        let start = (after_position as usize).min(log.events.len());
        let tail = &log.events[start..];
        let take = limit.unwrap_or(tail.len()).min(tail.len());
        Ok(tail[..take].to_vec())
    }

    fn last_version(
        &self,
        stream: &str,
        process_type: &str,
        pid: &str,
    ) -> Result<u64, StoreError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| StoreError::LockPoisoned("read"))?;
        let log = streams
            .get(stream)
            .ok_or_else(|| StoreError::StreamNotFound(stream.to_string()))?;
        Ok(log.head(&(process_type.to_string(), pid.to_string())))
    }
}

impl TransactionalEventStore for InMemoryEventStore {
    fn begin_transaction(&self) -> Result<TransactionId, StoreError> {
        let id = self.next_transaction.fetch_add(1, Ordering::Relaxed);
        let mut transactions = self
            .transactions
            .lock()
            .map_err(|_| StoreError::LockPoisoned("transaction begin"))?;
        transactions.insert(id, Vec::new());
        Ok(id)
    }

    fn append_in_transaction(
        &self,
        transaction: TransactionId,
        stream: &str,
        events: Vec<PendingEvent>,
    ) -> Result<(), StoreError> {
        if !self.has_stream(stream)? {
            return Err(StoreError::StreamNotFound(stream.to_string()));
        }
        let mut transactions = self
            .transactions
            .lock()
            .map_err(|_| StoreError::LockPoisoned("transaction append"))?;
        let buffer = transactions
            .get_mut(&transaction)
            .ok_or(StoreError::TransactionNotStarted(transaction))?;
        buffer.push((stream.to_string(), events));
        Ok(())
    }

    /// Write every buffered append atomically. The transaction is closed even
    /// when validation fails.
    fn commit_transaction(
        &self,
        transaction: TransactionId,
    ) -> Result<Vec<StoredEvent>, StoreError> {
        let buffered = {
            let mut transactions = self
                .transactions
                .lock()
                .map_err(|_| StoreError::LockPoisoned("transaction commit"))?;
            transactions
                .remove(&transaction)
                .ok_or(StoreError::TransactionNotStarted(transaction))?
        };

        let mut streams = self
            .streams
            .write()
            .map_err(|_| StoreError::LockPoisoned("write"))?;

        let mut overlays: HashMap<String, HashMap<ProcessKey, u64>> = HashMap::new();
        for (stream, events) in &buffered {
            let log = streams
                .get(stream)
                .ok_or_else(|| StoreError::StreamNotFound(stream.clone()))?;
            let overlay = overlays.entry(stream.clone()).or_default();
            check_versions(stream, log, overlay, events)?;
        }

        let mut stored = Vec::new();
        for (stream, events) in buffered {
            if let Some(log) = streams.get_mut(&stream) {
                stored.extend(log.write(&stream, events));
            }
        }
        tracing::debug!(transaction, count = stored.len(), "transaction committed");
        Ok(stored)
    }

    fn rollback_transaction(&self, transaction: TransactionId) -> Result<(), StoreError> {
        let mut transactions = self
            .transactions
            .lock()
            .map_err(|_| StoreError::LockPoisoned("transaction rollback"))?;
        transactions
            .remove(&transaction)
            .map(|_| ())
            .ok_or(StoreError::TransactionNotStarted(transaction))
    }
}
