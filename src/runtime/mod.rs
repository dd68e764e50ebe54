//! Process runtime - the command dispatch state machine.
//!
//! A dispatch walks `Received -> IdentifierExtracted -> (StateLoaded | New) ->
//! Handled -> EventsPersisted -> Applied -> Completed`; any step may fail with a
//! `DispatchError`, in which case nothing the command produced becomes visible.
//!
//! ## Example
//!
//! ```ignore
//! use sourced_process::{InMemoryEventStore, Message, ProcessRuntime};
//! use serde_json::json;
//!
//! let runtime = ProcessRuntime::builder(registry, InMemoryEventStore::new()).build()?;
//! let result = runtime.dispatch(Message::command("RegisterUser", json!({
//!     "userId": "u1",
//!     "username": "alice",
//! }))?)?;
//! assert_eq!(result.version, 1);
//! ```

mod config;
mod context;
mod result;

pub use config::RuntimeConfig;
pub use context::{
    CommandPreProcessor, ContextProvider, FnContextProvider, FnPreProcessor, PreProcessed,
};
pub use result::{CommandDispatchResult, CommandRequest, CommandResponse, DispatchStage};

use std::sync::Arc;

use serde_json::Value;
use tracing::field;

use crate::error::{ConfigurationError, DispatchError};
use crate::lock::{process_lock_key, InMemoryLockManager, LockGuard, LockManager};
use crate::message::{Message, MessageFactory, MessageType};
use crate::projection::ProjectionEngine;
use crate::registry::{ApplyTable, Invocation, ProcessDescription, ProcessRegistry, ProcessState};
use crate::schema::{NoopValidator, SchemaValidator};
use crate::snapshot::{SnapshotRecord, SnapshotStore};
use crate::store::{EventStore, PendingEvent, StoreError, StoredEvent};

#[cfg(feature = "emitter")]
use crate::emitter::CommitListeners;

/// Metadata keys stamped on every persisted event.
pub const META_PROCESS_TYPE: &str = "_process_type";
pub const META_PID: &str = "_pid";
pub const META_VERSION: &str = "_version";

/// Folded state of a process and the version it reflects.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedState {
    pub state: Option<ProcessState>,
    pub version: u64,
}

enum PreProcessOutcome {
    Dispatch(Arc<ProcessDescription>, Message),
    Done(CommandDispatchResult),
}

/// Dispatches commands to their processes.
///
/// The runtime is `Send + Sync`; share it behind an `Arc` to dispatch from
/// several threads.
pub struct ProcessRuntime {
    registry: Arc<ProcessRegistry>,
    store: Arc<dyn EventStore>,
    config: RuntimeConfig,
    locks: Arc<dyn LockManager>,
    snapshots: Option<Arc<dyn SnapshotStore>>,
    projections: Option<Arc<ProjectionEngine>>,
    validator: Arc<dyn SchemaValidator>,
    factory: Arc<dyn MessageFactory>,
    #[cfg(feature = "emitter")]
    listeners: CommitListeners,
}

impl ProcessRuntime {
    pub fn builder<S>(registry: impl Into<Arc<ProcessRegistry>>, store: S) -> ProcessRuntimeBuilder
    where
        S: EventStore + 'static,
    {
        ProcessRuntimeBuilder::new(registry.into(), Arc::new(store))
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    pub fn store(&self) -> &dyn EventStore {
        self.store.as_ref()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn projections(&self) -> Option<&Arc<ProjectionEngine>> {
        self.projections.as_ref()
    }

    pub fn message_factory(&self) -> &dyn MessageFactory {
        self.factory.as_ref()
    }

    /// Dispatch one command.
    pub fn dispatch(&self, command: Message) -> Result<CommandDispatchResult, DispatchError> {
        let span = tracing::info_span!(
            "dispatch",
            command = %command.name(),
            process_type = field::Empty,
            pid = field::Empty,
        );
        let _enter = span.enter();

        let outcome = self.run(command, &span);
        match &outcome {
            Ok(result) => tracing::info!(
                events = result.events.len(),
                version = result.version,
                "command dispatched"
            ),
            Err(e) => tracing::warn!(kind = %e.kind(), error = %e, "command dispatch failed"),
        }
        outcome
    }

    /// Build a command with the message factory and dispatch it, mapping the
    /// outcome to a status code.
    pub fn dispatch_request(&self, request: &CommandRequest) -> CommandResponse {
        let command = match self.factory.create_message(
            &request.command,
            request.payload.clone(),
            request.metadata.clone(),
        ) {
            Ok(command) => command,
            Err(e) => return DispatchError::from(e).into(),
        };
        match self.dispatch(command) {
            Ok(result) => CommandResponse::ok(&result),
            Err(e) => CommandResponse::from_error(&e),
        }
    }

    /// Fold the current state of a process without dispatching anything.
    ///
    /// Returns `None` when the process has no events.
    pub fn load_state(
        &self,
        process_type: &str,
        pid: &str,
    ) -> Result<Option<LoadedState>, DispatchError> {
        let table = self.registry.apply_table(process_type).ok_or_else(|| {
            DispatchError::invalid(format!("unknown process type {}", process_type))
        })?;
        let loaded = self.load(table, process_type, pid)?;
        Ok((loaded.version > 0).then_some(loaded))
    }

    /// Register a listener called with the JSON-encoded event after every commit
    /// that contains an event named `event`.
    #[cfg(feature = "emitter")]
    pub fn on<F>(&self, event: &str, listener: F) -> Result<(), DispatchError>
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        self.listeners.on(event, listener)?;
        Ok(())
    }

    fn run(
        &self,
        command: Message,
        span: &tracing::Span,
    ) -> Result<CommandDispatchResult, DispatchError> {
        if command.message_type() != MessageType::Command {
            return Err(DispatchError::invalid(format!(
                "{} is a {}, not a command",
                command.name(),
                command.message_type()
            )));
        }
        let mut stages = vec![DispatchStage::Received];

        let (description, command) = match self.pre_process(command)? {
            PreProcessOutcome::Dispatch(description, command) => (description, command),
            PreProcessOutcome::Done(result) => {
                tracing::debug!("command answered by pre-processor");
                return Ok(result);
            }
        };
        let process_type = description.process_type();

        let pid = description.extract_pid(&command)?;
        span.record("process_type", process_type);
        span.record("pid", pid.as_str());
        stages.push(DispatchStage::IdentifierExtracted);
        tracing::debug!(stage = ?DispatchStage::IdentifierExtracted);

        let guard = if self.config.lock_per_process {
            Some(LockGuard::acquire(
                self.locks.as_ref(),
                &process_lock_key(process_type, &pid),
            )?)
        } else {
            None
        };

        let loaded = self.load(description.apply_table(), process_type, &pid)?;
        let stage = if description.is_new() {
            if loaded.version > 0 {
                return Err(DispatchError::ProcessAlreadyExists {
                    process_type: process_type.to_string(),
                    pid,
                });
            }
            DispatchStage::New
        } else {
            if loaded.version == 0 {
                return Err(DispatchError::ProcessNotFound {
                    process_type: process_type.to_string(),
                    pid,
                });
            }
            DispatchStage::StateLoaded
        };
        stages.push(stage);
        tracing::debug!(stage = ?stage, version = loaded.version);

        let context = description
            .context_providers()
            .iter()
            .map(|provider| provider.provide(&command))
            .collect::<Result<Vec<Value>, DispatchError>>()?;

        let pending = self.handle(&description, &command, &pid, &loaded, &context)?;
        stages.push(DispatchStage::Handled);
        tracing::debug!(stage = ?DispatchStage::Handled, events = pending.len());

        // Fold before appending so an apply failure leaves the store untouched.
        let next_state = description
            .apply_table()
            .fold(loaded.state.clone(), pending.iter().map(|p| &p.event))?;

        let stored = if pending.is_empty() {
            Vec::new()
        } else {
            self.store
                .append_to(&self.config.stream_name, pending)
                .map_err(|err| match err {
                    // Another creation committed between our load and append.
                    StoreError::ConcurrencyConflict { .. } if description.is_new() => {
                        DispatchError::ProcessAlreadyExists {
                            process_type: process_type.to_string(),
                            pid: pid.clone(),
                        }
                    }
                    other => other.into(),
                })?
        };
        stages.push(DispatchStage::EventsPersisted);
        tracing::debug!(stage = ?DispatchStage::EventsPersisted, events = stored.len());

        let version = stored.last().map(|e| e.version).unwrap_or(loaded.version);
        stages.push(DispatchStage::Applied);

        if self.config.snapshot_due(loaded.version, version) {
            self.save_snapshot(process_type, &pid, version, next_state.as_ref());
        }
        drop(guard);

        let projection_failures = self.after_commit(&stored);
        stages.push(DispatchStage::Completed);

        Ok(CommandDispatchResult {
            command,
            process_type: process_type.to_string(),
            pid,
            events: stored,
            state: next_state,
            version,
            stages,
            projection_failures,
        })
    }

    /// Run pre-processors, following at most one redirect.
    fn pre_process(&self, command: Message) -> Result<PreProcessOutcome, DispatchError> {
        let mut description = self.registry.resolve(command.name())?;
        self.validate_payload(&description, &command)?;

        let mut command = command;
        let mut redirected = false;
        'descriptions: loop {
            let current = Arc::clone(&description);
            for pre_processor in current.pre_processors() {
                match pre_processor.pre_process(command, self.factory.as_ref())? {
                    PreProcessed::Done(result) => return Ok(PreProcessOutcome::Done(result)),
                    PreProcessed::Command(next) if next.name() == current.command() => {
                        self.validate_payload(&current, &next)?;
                        command = next;
                    }
                    PreProcessed::Command(next) => {
                        if redirected {
                            return Err(ConfigurationError::RedirectLimit {
                                from: current.command().to_string(),
                                to: next.name().to_string(),
                            }
                            .into());
                        }
                        redirected = true;
                        tracing::debug!(from = current.command(), to = next.name(), "command redirected");
                        description = self.registry.resolve(next.name())?;
                        self.validate_payload(&description, &next)?;
                        command = next;
                        continue 'descriptions;
                    }
                }
            }
            return Ok(PreProcessOutcome::Dispatch(description, command));
        }
    }

    fn validate_payload(
        &self,
        description: &ProcessDescription,
        command: &Message,
    ) -> Result<(), DispatchError> {
        if let Some(schema) = description.payload_schema() {
            self.validator
                .assert_payload_schema(command.name(), schema, command.payload())?;
        }
        Ok(())
    }

    /// Snapshot (if any) plus the events after it, folded in version order.
    fn load(
        &self,
        table: &ApplyTable,
        process_type: &str,
        pid: &str,
    ) -> Result<LoadedState, DispatchError> {
        let snapshot = match &self.snapshots {
            Some(snapshots) => snapshots.get_snapshot(process_type, pid)?,
            None => None,
        };
        let (mut state, mut version) = match snapshot {
            Some(record) => (Some(ProcessState::new(record.state)), record.version),
            None => (None, 0),
        };

        let events = self.store.load_process_events(
            &self.config.stream_name,
            process_type,
            pid,
            version + 1,
        )?;
        for stored in &events {
            if stored.version != version + 1 {
                return Err(StoreError::NonContiguousVersion {
                    stream: self.config.stream_name.clone(),
                    process_type: process_type.to_string(),
                    pid: pid.to_string(),
                    expected: version + 1,
                    got: stored.version,
                }
                .into());
            }
            state = Some(table.apply(state, &stored.event)?);
            version = stored.version;
        }
        Ok(LoadedState { state, version })
    }

    /// Call the handle function and stamp what it yields.
    fn handle(
        &self,
        description: &ProcessDescription,
        command: &Message,
        pid: &str,
        loaded: &LoadedState,
        context: &[Value],
    ) -> Result<Vec<PendingEvent>, DispatchError> {
        let process_type = description.process_type();
        let invocation = Invocation {
            process_type,
            pid,
            version: loaded.version,
            state: loaded.state.as_ref(),
            command,
            context,
        };

        let mut pending = Vec::new();
        let mut version = loaded.version;
        for event in description.handle(&invocation)? {
            if event.message_type() != MessageType::Event {
                return Err(ConfigurationError::NotAnEvent {
                    command: command.name().to_string(),
                    message: event.name().to_string(),
                }
                .into());
            }
            if !description.records_event(event.name()) {
                return Err(ConfigurationError::UnlistedEvent {
                    command: command.name().to_string(),
                    event: event.name().to_string(),
                }
                .into());
            }
            version += 1;
            let event = event
                .caused_by(command)
                .with_metadata(META_PROCESS_TYPE, process_type)
                .with_metadata(META_PID, pid)
                .with_metadata(META_VERSION, version);
            pending.push(PendingEvent::new(process_type, pid, version, event));
        }
        Ok(pending)
    }

    fn save_snapshot(
        &self,
        process_type: &str,
        pid: &str,
        version: u64,
        state: Option<&ProcessState>,
    ) {
        let (Some(snapshots), Some(state)) = (&self.snapshots, state) else {
            return;
        };
        let record = SnapshotRecord {
            process_type: process_type.to_string(),
            pid: pid.to_string(),
            version,
            state: state.as_value().clone(),
        };
        match snapshots.save_snapshot(record) {
            Ok(()) => tracing::debug!(version, "snapshot saved"),
            Err(e) => tracing::warn!(error = %e, "snapshot save failed"),
        }
    }

    /// Projections and listeners. Runs after the lock is released; failures here
    /// never undo the commit.
    fn after_commit(&self, stored: &[StoredEvent]) -> Vec<crate::projection::ProjectionError> {
        if stored.is_empty() {
            return Vec::new();
        }

        let mut failures = Vec::new();
        if self.config.run_projections {
            if let Some(engine) = &self.projections {
                let report = engine.catch_up(self.store.as_ref(), &self.config.stream_name);
                failures = report.failures;
            }
        }

        #[cfg(feature = "emitter")]
        self.listeners.emit(stored);

        failures
    }
}

/// Builder for `ProcessRuntime`.
pub struct ProcessRuntimeBuilder {
    registry: Arc<ProcessRegistry>,
    store: Arc<dyn EventStore>,
    config: RuntimeConfig,
    locks: Option<Arc<dyn LockManager>>,
    snapshots: Option<Arc<dyn SnapshotStore>>,
    projections: Option<Arc<ProjectionEngine>>,
    validator: Option<Arc<dyn SchemaValidator>>,
    factory: Option<Arc<dyn MessageFactory>>,
}

impl ProcessRuntimeBuilder {
    fn new(registry: Arc<ProcessRegistry>, store: Arc<dyn EventStore>) -> Self {
        ProcessRuntimeBuilder {
            registry,
            store,
            config: RuntimeConfig::default(),
            locks: None,
            snapshots: None,
            projections: None,
            validator: None,
            factory: None,
        }
    }

    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Defaults to an `InMemoryLockManager`.
    pub fn lock_manager<L: LockManager + 'static>(mut self, locks: L) -> Self {
        self.locks = Some(Arc::new(locks));
        self
    }

    pub fn snapshots<S: SnapshotStore + 'static>(mut self, snapshots: S) -> Self {
        self.snapshots = Some(Arc::new(snapshots));
        self
    }

    pub fn projections(mut self, engine: Arc<ProjectionEngine>) -> Self {
        self.projections = Some(engine);
        self
    }

    /// Defaults to `NoopValidator`.
    pub fn validator<V: SchemaValidator + 'static>(mut self, validator: V) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Defaults to the registry's catalog.
    pub fn message_factory<F: MessageFactory + 'static>(mut self, factory: F) -> Self {
        self.factory = Some(Arc::new(factory));
        self
    }

    /// Validate the configuration and create the stream if it is missing.
    pub fn build(self) -> Result<ProcessRuntime, DispatchError> {
        self.config.validate()?;
        if !self.store.has_stream(&self.config.stream_name)? {
            self.store.create_stream(&self.config.stream_name)?;
            tracing::debug!(stream = %self.config.stream_name, "stream created");
        }

        let factory = match self.factory {
            Some(factory) => factory,
            None => Arc::new(self.registry.catalog()),
        };

        Ok(ProcessRuntime {
            registry: self.registry,
            store: self.store,
            config: self.config,
            locks: self
                .locks
                .unwrap_or_else(|| Arc::new(InMemoryLockManager::new())),
            snapshots: self.snapshots,
            projections: self.projections,
            validator: self.validator.unwrap_or_else(|| Arc::new(NoopValidator)),
            factory,
            #[cfg(feature = "emitter")]
            listeners: CommitListeners::new(),
        })
    }
}
