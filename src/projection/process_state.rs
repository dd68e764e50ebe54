use std::sync::Arc;

use serde_json::json;

use super::{ProjectionError, Projector};
use crate::error::ConfigurationError;
use crate::read_model::DocumentStore;
use crate::registry::{ApplyTable, ProcessRegistry, ProcessState};
use crate::store::StoredEvent;

/// Mirrors the folded state of every process of one type into a collection.
///
/// Documents are keyed by pid and look like
/// `{ "pid": "u1", "processType": "User", "version": 2, "state": { .. } }`.
/// An event at or below the stored version is skipped, so redelivery is a no-op;
/// an event that would skip a version halts the projector.
pub struct ProcessStateProjector {
    name: String,
    process_type: String,
    collection: String,
    table: Arc<ApplyTable>,
}

impl ProcessStateProjector {
    pub fn new(
        registry: &ProcessRegistry,
        process_type: &str,
        collection: impl Into<String>,
    ) -> Result<Self, ConfigurationError> {
        let table = registry.apply_table(process_type).cloned().ok_or_else(|| {
            ConfigurationError::Other(format!("no process type {} registered", process_type))
        })?;
        let collection = collection.into();
        Ok(ProcessStateProjector {
            name: format!("{}_state", collection),
            process_type: process_type.to_string(),
            collection,
            table,
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }
}

impl Projector for ProcessStateProjector {
    fn name(&self) -> &str {
        &self.name
    }

    fn collections(&self) -> Vec<String> {
        vec![self.collection.clone()]
    }

    fn accepts(&self, event: &StoredEvent) -> bool {
        event.process_type == self.process_type
    }

    fn project(
        &self,
        documents: &dyn DocumentStore,
        event: &StoredEvent,
    ) -> Result<(), ProjectionError> {
        if !self.table.handles(event.name()) {
            return Err(ProjectionError::UnknownEvent {
                projection: self.name.clone(),
                event: Box::new(event.clone()),
            });
        }

        let current = documents.get_doc(&self.collection, &event.pid)?;
        let (state, version) = match current {
            Some(doc) => (
                doc.data.get("state").cloned().map(ProcessState::new),
                doc.data.get("version").and_then(|v| v.as_u64()).unwrap_or(0),
            ),
            None => (None, 0),
        };

        if event.version <= version {
            return Ok(());
        }
        if event.version != version + 1 {
            return Err(ProjectionError::handler(format!(
                "out of order: {} is at version {}, got {}",
                event.pid, version, event.version
            )));
        }

        let next = self
            .table
            .apply(state, &event.event)
            .map_err(|e| ProjectionError::handler(e.to_string()))?;
        documents.upsert_doc(
            &self.collection,
            &event.pid,
            json!({
                "pid": event.pid,
                "processType": event.process_type,
                "version": event.version,
                "state": next.into_value(),
            }),
        )?;
        Ok(())
    }
}
