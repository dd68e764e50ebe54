//! Projections - read-model updates driven by committed events.
//!
//! A projector declares which events it consumes; the engine delivers them in
//! stream order and keeps one cursor per projector. A projector that receives an
//! event it has no handler for fails, and the engine halts it until `reset`.
//! Handlers should write with upsert semantics so that redelivery is harmless.
//!
//! ## Example
//!
//! ```ignore
//! use sourced_process::{Projection, ProjectionEngine, InMemoryDocumentStore};
//!
//! let users = Projection::new("users")
//!     .collection("users")
//!     .process_type("User")
//!     .on("UserRegistered", |docs, event| {
//!         docs.upsert_doc("users", &event.pid, event.event.payload_value())?;
//!         Ok(())
//!     });
//!
//! let engine = ProjectionEngine::new(InMemoryDocumentStore::new());
//! engine.register(users)?;
//! ```

mod engine;
mod process_state;

pub use engine::{CatchUpReport, ProjectionEngine, ProjectionStatus};
pub use process_state::ProcessStateProjector;

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::error::ErrorKind;
use crate::read_model::{DocumentError, DocumentStore};
use crate::store::{StoreError, StoredEvent};

/// Error type for projection operations.
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectionError {
    /// A handler failed. Carries the offending event.
    ProjectorFailed {
        projection: String,
        event: Box<StoredEvent>,
        reason: String,
    },
    /// The projector has no handler for this event.
    UnknownEvent {
        projection: String,
        event: Box<StoredEvent>,
    },
    /// Raised by a handler; reported as `ProjectorFailed` by the engine.
    Handler(String),
    /// The projector is halted and will not accept events until reset.
    Halted { projection: String, reason: String },
    /// A direct delivery would skip events the projector has not consumed.
    OutOfOrder {
        projection: String,
        position: u64,
        cursor: u64,
    },
    UnknownProjection(String),
    DuplicateProjection(String),
    Document(DocumentError),
    Store(StoreError),
}

impl ProjectionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProjectionError::ProjectorFailed { .. }
            | ProjectionError::UnknownEvent { .. }
            | ProjectionError::Handler(_)
            | ProjectionError::Halted { .. } => ErrorKind::ProjectorFailed,
            ProjectionError::OutOfOrder { .. } => ErrorKind::InvalidArgument,
            ProjectionError::UnknownProjection(_) => ErrorKind::NotFound,
            ProjectionError::DuplicateProjection(_) => ErrorKind::ConfigurationError,
            ProjectionError::Document(e) => e.kind(),
            ProjectionError::Store(e) => e.kind(),
        }
    }

    /// Handler-side failure; the engine attaches projection and event.
    pub fn handler(reason: impl Into<String>) -> Self {
        ProjectionError::Handler(reason.into())
    }

    /// The event this failure is about, if any.
    pub fn event(&self) -> Option<&StoredEvent> {
        match self {
            ProjectionError::ProjectorFailed { event, .. }
            | ProjectionError::UnknownEvent { event, .. } => Some(&**event),
            _ => None,
        }
    }

    pub fn projection(&self) -> Option<&str> {
        match self {
            ProjectionError::ProjectorFailed { projection, .. }
            | ProjectionError::UnknownEvent { projection, .. }
            | ProjectionError::Halted { projection, .. }
            | ProjectionError::OutOfOrder { projection, .. } => Some(projection),
            ProjectionError::UnknownProjection(name)
            | ProjectionError::DuplicateProjection(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for ProjectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProjectionError::ProjectorFailed {
                projection,
                event,
                reason,
            } => write!(
                f,
                "projection {} failed on {} (position {}): {}",
                projection,
                event.name(),
                event.position,
                reason
            ),
            ProjectionError::UnknownEvent { projection, event } => write!(
                f,
                "projection {} has no handler for {} (position {})",
                projection,
                event.name(),
                event.position
            ),
            ProjectionError::Handler(reason) => write!(f, "projector handler failed: {}", reason),
            ProjectionError::Halted { projection, reason } => {
                write!(f, "projection {} is halted: {}", projection, reason)
            }
            ProjectionError::OutOfOrder {
                projection,
                position,
                cursor,
            } => write!(
                f,
                "projection {} is at position {}, cannot take position {}",
                projection, cursor, position
            ),
            ProjectionError::UnknownProjection(name) => write!(f, "unknown projection: {}", name),
            ProjectionError::DuplicateProjection(name) => {
                write!(f, "projection {} is registered more than once", name)
            }
            ProjectionError::Document(e) => write!(f, "{}", e),
            ProjectionError::Store(e) => write!(f, "event store error: {}", e),
        }
    }
}

impl std::error::Error for ProjectionError {}

impl From<DocumentError> for ProjectionError {
    fn from(err: DocumentError) -> Self {
        ProjectionError::Document(err)
    }
}

impl From<StoreError> for ProjectionError {
    fn from(err: StoreError) -> Self {
        ProjectionError::Store(err)
    }
}

/// Consumes committed events and writes read models.
pub trait Projector: Send + Sync {
    /// Unique name; also the key of the engine's cursor.
    fn name(&self) -> &str;

    /// Collections owned by this projector. Added on registration, dropped on reset.
    fn collections(&self) -> Vec<String>;

    /// Whether the event is routed to this projector at all.
    fn accepts(&self, event: &StoredEvent) -> bool;

    /// Apply one accepted event. Must be idempotent.
    fn project(&self, documents: &dyn DocumentStore, event: &StoredEvent)
        -> Result<(), ProjectionError>;
}

type ProjectFn =
    Box<dyn Fn(&dyn DocumentStore, &StoredEvent) -> Result<(), ProjectionError> + Send + Sync>;

/// Closure-based projector routed by event name.
pub struct Projection {
    name: String,
    collections: Vec<String>,
    process_types: HashSet<String>,
    handlers: HashMap<String, ProjectFn>,
    ignored: HashSet<String>,
}

impl Projection {
    pub fn new(name: impl Into<String>) -> Self {
        Projection {
            name: name.into(),
            collections: Vec::new(),
            process_types: HashSet::new(),
            handlers: HashMap::new(),
            ignored: HashSet::new(),
        }
    }

    pub fn collection(mut self, name: impl Into<String>) -> Self {
        self.collections.push(name.into());
        self
    }

    /// Only route events of this process type. With none set, every event is routed.
    pub fn process_type(mut self, process_type: impl Into<String>) -> Self {
        self.process_types.insert(process_type.into());
        self
    }

    pub fn on<F>(mut self, event: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&dyn DocumentStore, &StoredEvent) -> Result<(), ProjectionError>
            + Send
            + Sync
            + 'static,
    {
        self.handlers.insert(event.into(), Box::new(handler));
        self
    }

    /// Accept an event name without doing anything.
    pub fn ignore(mut self, event: impl Into<String>) -> Self {
        self.ignored.insert(event.into());
        self
    }
}

impl Projector for Projection {
    fn name(&self) -> &str {
        &self.name
    }

    fn collections(&self) -> Vec<String> {
        self.collections.clone()
    }

    fn accepts(&self, event: &StoredEvent) -> bool {
        self.process_types.is_empty() || self.process_types.contains(&event.process_type)
    }

    fn project(
        &self,
        documents: &dyn DocumentStore,
        event: &StoredEvent,
    ) -> Result<(), ProjectionError> {
        match self.handlers.get(event.name()) {
            Some(handler) => handler(documents, event),
            None if self.ignored.contains(event.name()) => Ok(()),
            None => Err(ProjectionError::UnknownEvent {
                projection: self.name.clone(),
                event: Box::new(event.clone()),
            }),
        }
    }
}

impl fmt::Debug for Projection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut events: Vec<&String> = self.handlers.keys().collect();
        events.sort();
        f.debug_struct("Projection")
            .field("name", &self.name)
            .field("collections", &self.collections)
            .field("events", &events)
            .finish()
    }
}
