//! Process dispatch core for event-sourced applications.
//!
//! Commands are routed to process descriptions in a `ProcessRegistry`, state is
//! folded from an `EventStore`, handle functions yield new events which are
//! appended atomically, and a `ProjectionEngine` keeps read models up to date. A
//! `QueryDispatcher` serves the read side.
//!
//! ## Example
//!
//! ```ignore
//! use sourced_process::{
//!     InMemoryEventStore, Lifecycle, Message, ProcessRegistry, ProcessRuntime, ProcessState,
//! };
//! use serde_json::json;
//!
//! let registry = ProcessRegistry::builder()
//!     .register("RegisterUser", "User", "userId", Lifecycle::New, |inv| {
//!         Ok(vec![inv.event("UserRegistered", inv.command.payload_value())?])
//!     })
//!     .record_that("UserRegistered", |_, event| Ok(ProcessState::new(event.payload_value())))
//!     .build()?;
//!
//! let runtime = ProcessRuntime::builder(registry, InMemoryEventStore::new()).build()?;
//! let result = runtime.dispatch(Message::command(
//!     "RegisterUser",
//!     json!({ "userId": "u1", "username": "alice" }),
//! )?)?;
//! assert_eq!(result.version, 1);
//! ```

pub mod error;
pub mod lock;
pub mod message;
pub mod projection;
pub mod query;
pub mod read_model;
pub mod registry;
pub mod runtime;
pub mod schema;
pub mod snapshot;
pub mod store;

#[cfg(feature = "emitter")]
pub mod emitter;

pub use error::{ConfigurationError, DispatchError, ErrorKind};
pub use lock::{InMemoryLock, InMemoryLockManager, Lock, LockError, LockGuard, LockManager};
pub use message::{Message, MessageCatalog, MessageError, MessageFactory, MessageType, Payload};
pub use projection::{
    CatchUpReport, ProcessStateProjector, Projection, ProjectionEngine, ProjectionError,
    ProjectionStatus, Projector,
};
pub use query::{
    FnResolver, QueryDispatcher, QueryDispatcherBuilder, QueryError, QueryRequest, QueryResponse,
    Resolver,
};
pub use read_model::{
    DocumentError, DocumentStore, InMemoryDocumentStore, ReadModel, ReadModelRepository,
    ReadModelsExt, Versioned,
};
pub use registry::{
    apply_typed, ApplyTable, Invocation, Lifecycle, ProcessDescription, ProcessRegistry,
    ProcessState, RegistryBuilder,
};
pub use runtime::{
    CommandDispatchResult, CommandPreProcessor, CommandRequest, CommandResponse, ContextProvider,
    DispatchStage, LoadedState, PreProcessed, ProcessRuntime, ProcessRuntimeBuilder,
    RuntimeConfig,
};
pub use schema::{BasicSchemaValidator, NoopValidator, SchemaValidator, ValidationError};
pub use snapshot::{InMemorySnapshotStore, SnapshotRecord, SnapshotStore};
pub use store::{
    EventStore, InMemoryEventStore, PendingEvent, StoreError, StoredEvent, TransactionId,
    TransactionalEventStore,
};

#[cfg(feature = "emitter")]
pub use emitter::CommitListeners;
