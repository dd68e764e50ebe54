use std::sync::{Arc, Mutex, MutexGuard};

use super::{ProjectionError, Projector};
use crate::read_model::DocumentStore;
use crate::store::{EventStore, StoreError, StoredEvent};

/// Whether a projector still receives events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectionStatus {
    Running,
    /// Stopped after a failure; only `reset` resumes it.
    Halted(String),
}

/// What one `catch_up` call did.
#[derive(Debug, Default)]
pub struct CatchUpReport {
    /// Events handled across all projectors.
    pub delivered: usize,
    /// Projectors that halted during this call, plus store failures.
    pub failures: Vec<ProjectionError>,
}

struct Slot {
    projector: Arc<dyn Projector>,
    /// Stream position of the last event this projector consumed.
    cursor: u64,
    status: ProjectionStatus,
}

impl Slot {
    fn is_running(&self) -> bool {
        self.status == ProjectionStatus::Running
    }

    fn advance(&mut self, position: u64) {
        self.cursor = self.cursor.max(position);
    }

    /// Hand one event to the projector, halting it on failure.
    fn deliver(
        &mut self,
        documents: &dyn DocumentStore,
        event: &StoredEvent,
    ) -> Result<bool, ProjectionError> {
        let name = self.projector.name().to_string();
        if let ProjectionStatus::Halted(reason) = &self.status {
            return Err(ProjectionError::Halted {
                projection: name,
                reason: reason.clone(),
            });
        }
        if !self.projector.accepts(event) {
            self.advance(event.position);
            return Ok(false);
        }

        match self.projector.project(documents, event) {
            Ok(()) => {
                self.advance(event.position);
                Ok(true)
            }
            Err(err) => {
                let err = match err {
                    e @ (ProjectionError::UnknownEvent { .. }
                    | ProjectionError::ProjectorFailed { .. }) => e,
                    other => ProjectionError::ProjectorFailed {
                        projection: name.clone(),
                        event: Box::new(event.clone()),
                        reason: other.to_string(),
                    },
                };
                tracing::error!(
                    projection = %name,
                    event = event.name(),
                    position = event.position,
                    error = %err,
                    "projector halted"
                );
                self.status = ProjectionStatus::Halted(err.to_string());
                Err(err)
            }
        }
    }
}

/// Delivers committed events to projectors, one cursor per projector.
///
/// Events are consumed in stream position order. Cursors are positions within
/// the stream passed to `catch_up`.
pub struct ProjectionEngine {
    documents: Arc<dyn DocumentStore>,
    slots: Mutex<Vec<Slot>>,
}

impl ProjectionEngine {
    pub fn new<D: DocumentStore + 'static>(documents: D) -> Self {
        Self::with_documents(Arc::new(documents))
    }

    pub fn with_documents(documents: Arc<dyn DocumentStore>) -> Self {
        ProjectionEngine {
            documents,
            slots: Mutex::new(Vec::new()),
        }
    }

    pub fn documents(&self) -> Arc<dyn DocumentStore> {
        Arc::clone(&self.documents)
    }

    fn slots(&self) -> Result<MutexGuard<'_, Vec<Slot>>, ProjectionError> {
        self.slots
            .lock()
            .map_err(|_| ProjectionError::Store(StoreError::LockPoisoned("projection engine")))
    }

    /// Add a projector and create its collections.
    pub fn register<P: Projector + 'static>(&self, projector: P) -> Result<(), ProjectionError> {
        let mut slots = self.slots()?;
        if slots.iter().any(|s| s.projector.name() == projector.name()) {
            return Err(ProjectionError::DuplicateProjection(
                projector.name().to_string(),
            ));
        }
        for collection in projector.collections() {
            self.documents.add_collection(&collection)?;
        }
        tracing::debug!(projection = projector.name(), "projection registered");
        slots.push(Slot {
            projector: Arc::new(projector),
            cursor: 0,
            status: ProjectionStatus::Running,
        });
        Ok(())
    }

    pub fn names(&self) -> Vec<String> {
        self.slots()
            .map(|slots| slots.iter().map(|s| s.projector.name().to_string()).collect())
            .unwrap_or_default()
    }

    pub fn status(&self, name: &str) -> Option<ProjectionStatus> {
        let slots = self.slots().ok()?;
        slots
            .iter()
            .find(|s| s.projector.name() == name)
            .map(|s| s.status.clone())
    }

    pub fn cursor(&self, name: &str) -> Option<u64> {
        let slots = self.slots().ok()?;
        slots
            .iter()
            .find(|s| s.projector.name() == name)
            .map(|s| s.cursor)
    }

    /// Feed every running projector the events after its cursor.
    pub fn catch_up(&self, store: &dyn EventStore, stream: &str) -> CatchUpReport {
        let mut report = CatchUpReport::default();
        let mut slots = match self.slots() {
            Ok(slots) => slots,
            Err(err) => {
                report.failures.push(err);
                return report;
            }
        };

        let Some(from) = slots.iter().filter(|s| s.is_running()).map(|s| s.cursor).min() else {
            return report;
        };
        let events = match store.load_stream(stream, from, None) {
            Ok(events) => events,
            Err(err) => {
                report.failures.push(err.into());
                return report;
            }
        };

        for slot in slots.iter_mut().filter(|s| s.is_running()) {
            let cursor = slot.cursor;
            for event in events.iter().filter(|e| e.position > cursor) {
                match slot.deliver(self.documents.as_ref(), event) {
                    Ok(true) => report.delivered += 1,
                    Ok(false) => {}
                    Err(err) => {
                        report.failures.push(err);
                        break;
                    }
                }
            }
        }
        report
    }

    /// Deliver one event to one projector.
    ///
    /// Events at or before the cursor are redelivered without moving it; the
    /// event right after the cursor advances it. Anything further ahead is
    /// rejected so no position is skipped. Returns false when the projector
    /// does not route the event.
    pub fn project_event(&self, name: &str, event: &StoredEvent) -> Result<bool, ProjectionError> {
        let mut slots = self.slots()?;
        let slot = slots
            .iter_mut()
            .find(|s| s.projector.name() == name)
            .ok_or_else(|| ProjectionError::UnknownProjection(name.to_string()))?;
        if event.position > slot.cursor + 1 {
            return Err(ProjectionError::OutOfOrder {
                projection: name.to_string(),
                position: event.position,
                cursor: slot.cursor,
            });
        }
        slot.deliver(self.documents.as_ref(), event)
    }

    /// Drop the projector's collections, rewind its cursor and resume it.
    pub fn reset(&self, name: &str) -> Result<(), ProjectionError> {
        let mut slots = self.slots()?;
        let slot = slots
            .iter_mut()
            .find(|s| s.projector.name() == name)
            .ok_or_else(|| ProjectionError::UnknownProjection(name.to_string()))?;
        for collection in slot.projector.collections() {
            self.documents.drop_collection(&collection)?;
            self.documents.add_collection(&collection)?;
        }
        slot.cursor = 0;
        slot.status = ProjectionStatus::Running;
        tracing::info!(projection = name, "projection reset");
        Ok(())
    }
}
