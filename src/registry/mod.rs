//! Process description registry.
//!
//! Maps every command name to the process that handles it: the process type, the
//! payload key holding the process id, whether the command starts a new process,
//! the handle function and the events it may record. Apply functions are kept per
//! process type so that every command of that type folds the same history the
//! same way.
//!
//! Registries are built once with `RegistryBuilder` and are immutable afterwards.
//!
//! ## Example
//!
//! ```ignore
//! use sourced_process::{Lifecycle, ProcessRegistry};
//!
//! let registry = ProcessRegistry::builder()
//!     .register("RegisterUser", "User", "userId", Lifecycle::New, |inv| {
//!         Ok(vec![inv.event("UserRegistered", inv.command.payload_value())?])
//!     })
//!     .record_that("UserRegistered", |_, event| Ok(event.payload_value().into()))
//!     .build()?;
//! ```

mod builder;
mod state;

pub use builder::RegistryBuilder;
pub use state::{apply_typed, Invocation, ProcessState};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{ConfigurationError, DispatchError};
use crate::message::{Message, MessageCatalog};
use crate::runtime::{CommandPreProcessor, ContextProvider};

/// Events yielded by a handle function. Consumed exactly once.
pub type EventSequence = Box<dyn Iterator<Item = Message> + Send>;

/// Business logic of a command.
pub type HandleFn =
    Arc<dyn Fn(&Invocation<'_>) -> Result<EventSequence, DispatchError> + Send + Sync>;

/// Pure fold step for one event name.
pub type ApplyFn =
    Arc<dyn Fn(Option<ProcessState>, &Message) -> Result<ProcessState, DispatchError> + Send + Sync>;

/// Whether a command starts a process or continues one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// The process must have no events yet.
    New,
    /// The process must have at least one event.
    Existing,
}

/// Apply functions of one process type.
pub struct ApplyTable {
    process_type: String,
    handlers: HashMap<String, ApplyFn>,
}

impl ApplyTable {
    pub fn process_type(&self) -> &str {
        &self.process_type
    }

    pub fn handles(&self, event: &str) -> bool {
        self.handlers.contains_key(event)
    }

    pub fn event_names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    pub fn apply(
        &self,
        state: Option<ProcessState>,
        event: &Message,
    ) -> Result<ProcessState, DispatchError> {
        let apply = self.handlers.get(event.name()).ok_or_else(|| {
            DispatchError::Configuration(ConfigurationError::MissingApply {
                process_type: self.process_type.clone(),
                event: event.name().to_string(),
            })
        })?;
        apply(state, event)
    }

    /// Apply `events` in order, starting from `state`.
    pub fn fold<'a, I>(
        &self,
        state: Option<ProcessState>,
        events: I,
    ) -> Result<Option<ProcessState>, DispatchError>
    where
        I: IntoIterator<Item = &'a Message>,
    {
        let mut state = state;
        for event in events {
            state = Some(self.apply(state, event)?);
        }
        Ok(state)
    }
}

impl fmt::Debug for ApplyTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut events: Vec<&str> = self.event_names().collect();
        events.sort_unstable();
        f.debug_struct("ApplyTable")
            .field("process_type", &self.process_type)
            .field("events", &events)
            .finish()
    }
}

/// Everything the runtime needs to dispatch one command name.
pub struct ProcessDescription {
    command: String,
    process_type: String,
    identifier_key: String,
    lifecycle: Lifecycle,
    handle: HandleFn,
    records: Vec<String>,
    apply: Arc<ApplyTable>,
    context_providers: Vec<Arc<dyn ContextProvider>>,
    pre_processors: Vec<Arc<dyn CommandPreProcessor>>,
    payload_schema: Option<Value>,
}

impl ProcessDescription {
    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn process_type(&self) -> &str {
        &self.process_type
    }

    pub fn identifier_key(&self) -> &str {
        &self.identifier_key
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn is_new(&self) -> bool {
        self.lifecycle == Lifecycle::New
    }

    /// Event names this command may yield, in registration order.
    pub fn records(&self) -> &[String] {
        &self.records
    }

    pub fn records_event(&self, event: &str) -> bool {
        self.records.iter().any(|e| e == event)
    }

    pub fn apply_table(&self) -> &ApplyTable {
        &self.apply
    }

    pub fn context_providers(&self) -> &[Arc<dyn ContextProvider>] {
        &self.context_providers
    }

    pub fn pre_processors(&self) -> &[Arc<dyn CommandPreProcessor>] {
        &self.pre_processors
    }

    pub fn payload_schema(&self) -> Option<&Value> {
        self.payload_schema.as_ref()
    }

    pub fn handle(&self, invocation: &Invocation<'_>) -> Result<EventSequence, DispatchError> {
        (self.handle)(invocation)
    }

    /// Read the process id from the command payload.
    ///
    /// Strings and integers are accepted; integers are stringified. A missing,
    /// empty or otherwise-typed value is an invalid argument.
    pub fn extract_pid(&self, command: &Message) -> Result<String, DispatchError> {
        match command.get(&self.identifier_key) {
            Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
            Some(Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(n.to_string()),
            Some(Value::String(_)) => Err(DispatchError::invalid(format!(
                "identifier {} of command {} is empty",
                self.identifier_key, self.command
            ))),
            Some(_) => Err(DispatchError::invalid(format!(
                "identifier {} of command {} must be a string or integer",
                self.identifier_key, self.command
            ))),
            None => Err(DispatchError::invalid(format!(
                "command {} is missing identifier {}",
                self.command, self.identifier_key
            ))),
        }
    }
}

impl fmt::Debug for ProcessDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessDescription")
            .field("command", &self.command)
            .field("process_type", &self.process_type)
            .field("identifier_key", &self.identifier_key)
            .field("lifecycle", &self.lifecycle)
            .field("records", &self.records)
            .field("context_providers", &self.context_providers.len())
            .field("pre_processors", &self.pre_processors.len())
            .finish()
    }
}

/// Immutable command name -> process description table.
#[derive(Debug)]
pub struct ProcessRegistry {
    descriptions: HashMap<String, Arc<ProcessDescription>>,
    apply_tables: HashMap<String, Arc<ApplyTable>>,
}

impl ProcessRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Look up the description of a command.
    pub fn resolve(&self, command: &str) -> Result<Arc<ProcessDescription>, DispatchError> {
        self.descriptions
            .get(command)
            .cloned()
            .ok_or_else(|| DispatchError::UnknownCommand(command.to_string()))
    }

    pub fn contains(&self, command: &str) -> bool {
        self.descriptions.contains_key(command)
    }

    pub fn commands(&self) -> Vec<&str> {
        self.descriptions.keys().map(String::as_str).collect()
    }

    pub fn process_types(&self) -> Vec<&str> {
        self.apply_tables.keys().map(String::as_str).collect()
    }

    pub fn apply_table(&self, process_type: &str) -> Option<&Arc<ApplyTable>> {
        self.apply_tables.get(process_type)
    }

    pub fn len(&self) -> usize {
        self.descriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptions.is_empty()
    }

    /// Commands and every event with an apply function, typed accordingly.
    pub fn catalog(&self) -> MessageCatalog {
        let mut catalog = MessageCatalog::new();
        for name in self.descriptions.keys() {
            catalog = catalog.command(name.clone());
        }
        for table in self.apply_tables.values() {
            for event in table.event_names() {
                catalog = catalog.event(event);
            }
        }
        catalog
    }
}
