//! Post-commit listeners, backed by `event-emitter-rs`.
//!
//! Listeners fire only after events are durably appended. A failed append never
//! reaches them.

use std::collections::HashSet;
use std::sync::{Mutex, RwLock};

use event_emitter_rs::EventEmitter;

use crate::lock::LockError;
use crate::store::StoredEvent;

/// Event-name keyed listeners, called with the JSON-encoded `StoredEvent`.
pub struct CommitListeners {
    emitter: Mutex<EventEmitter>,
    names: RwLock<HashSet<String>>,
}

impl Default for CommitListeners {
    fn default() -> Self {
        Self::new()
    }
}

impl CommitListeners {
    pub fn new() -> Self {
        CommitListeners {
            emitter: Mutex::new(EventEmitter::new()),
            names: RwLock::new(HashSet::new()),
        }
    }

    /// Register a listener for an event name.
    pub fn on<F>(&self, event: &str, listener: F) -> Result<(), LockError>
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        let mut emitter = self
            .emitter
            .lock()
            .map_err(|e| LockError::Poisoned(e.to_string()))?;
        emitter.on(event, listener);
        self.names
            .write()
            .map_err(|e| LockError::Poisoned(e.to_string()))?
            .insert(event.to_string());
        Ok(())
    }

    pub fn is_listening(&self, event: &str) -> bool {
        self.names
            .read()
            .map(|names| names.contains(event))
            .unwrap_or(false)
    }

    /// Fire listeners for every committed event. Listeners run asynchronously.
    pub fn emit(&self, events: &[StoredEvent]) {
        let Ok(mut emitter) = self.emitter.lock() else {
            tracing::error!("commit listener registry poisoned");
            return;
        };
        for stored in events {
            if !self.is_listening(stored.name()) {
                continue;
            }
            match serde_json::to_string(stored) {
                Ok(json) => {
                    emitter.emit(stored.name(), json);
                }
                Err(e) => tracing::warn!(event = stored.name(), error = %e, "event encode failed"),
            }
        }
    }
}
