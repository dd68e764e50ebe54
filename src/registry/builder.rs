use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;

use super::{
    ApplyFn, ApplyTable, EventSequence, HandleFn, Invocation, Lifecycle, ProcessDescription,
    ProcessRegistry, ProcessState,
};
use crate::error::{ConfigurationError, DispatchError};
use crate::message::{Message, MessageFactory};
use crate::runtime::{
    CommandPreProcessor, ContextProvider, FnContextProvider, FnPreProcessor, PreProcessed,
};

struct PendingCommand {
    command: String,
    process_type: String,
    identifier_key: String,
    lifecycle: Lifecycle,
    handle: HandleFn,
    records: Vec<String>,
    context_providers: Vec<Arc<dyn ContextProvider>>,
    pre_processors: Vec<Arc<dyn CommandPreProcessor>>,
    payload_schema: Option<Value>,
}

/// Builder for `ProcessRegistry`.
///
/// `record_that`, `records`, `context`, `pre_process` and `payload_schema`
/// configure the most recently registered command. Problems are collected while
/// chaining and reported by `build()`.
#[derive(Default)]
pub struct RegistryBuilder {
    commands: Vec<PendingCommand>,
    applies: HashMap<String, HashMap<String, ApplyFn>>,
    errors: Vec<ConfigurationError>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a command and its handle function.
    pub fn register<F, I>(
        mut self,
        command: &str,
        process_type: &str,
        identifier_key: &str,
        lifecycle: Lifecycle,
        handle: F,
    ) -> Self
    where
        F: Fn(&Invocation<'_>) -> Result<I, DispatchError> + Send + Sync + 'static,
        I: IntoIterator<Item = Message>,
        I::IntoIter: Send + 'static,
    {
        if command.is_empty() {
            self.errors.push(ConfigurationError::EmptyName("command name"));
        }
        if process_type.is_empty() {
            self.errors.push(ConfigurationError::EmptyName("process type"));
        }
        if identifier_key.is_empty() {
            self.errors.push(ConfigurationError::EmptyName("identifier key"));
        }

        let handle: HandleFn = Arc::new(
            move |invocation: &Invocation<'_>| -> Result<EventSequence, DispatchError> {
                let events = handle(invocation)?;
                Ok(Box::new(events.into_iter()) as EventSequence)
            },
        );

        self.commands.push(PendingCommand {
            command: command.to_string(),
            process_type: process_type.to_string(),
            identifier_key: identifier_key.to_string(),
            lifecycle,
            handle,
            records: Vec::new(),
            context_providers: Vec::new(),
            pre_processors: Vec::new(),
            payload_schema: None,
        });
        self
    }

    /// Declare that the last registered command records `event`, and register the
    /// apply function for it within the command's process type.
    pub fn record_that<F>(mut self, event: &str, apply: F) -> Self
    where
        F: Fn(Option<ProcessState>, &Message) -> Result<ProcessState, DispatchError>
            + Send
            + Sync
            + 'static,
    {
        let Some(process_type) = self.commands.last().map(|c| c.process_type.clone()) else {
            self.errors
                .push(ConfigurationError::RecordThatWithoutCommand(event.to_string()));
            return self;
        };
        if event.is_empty() {
            self.errors.push(ConfigurationError::EmptyName("event name"));
            return self;
        }

        let table = self.applies.entry(process_type.clone()).or_default();
        if table.contains_key(event) {
            self.errors.push(ConfigurationError::DuplicateApply {
                process_type,
                event: event.to_string(),
            });
            return self;
        }
        table.insert(event.to_string(), Arc::new(apply));
        self.push_record(event);
        self
    }

    /// Declare that the last registered command records `event`, reusing the apply
    /// function another command of the same process type registered for it.
    pub fn records(mut self, event: &str) -> Self {
        if self.commands.is_empty() {
            self.errors
                .push(ConfigurationError::RecordThatWithoutCommand(event.to_string()));
            return self;
        }
        self.push_record(event);
        self
    }

    /// Attach a context provider to the last registered command.
    pub fn context<P>(mut self, provider: P) -> Self
    where
        P: ContextProvider + 'static,
    {
        match self.commands.last_mut() {
            Some(last) => last.context_providers.push(Arc::new(provider)),
            None => self
                .errors
                .push(ConfigurationError::SettingWithoutCommand("context provider")),
        }
        self
    }

    /// Attach a closure context provider to the last registered command.
    pub fn context_fn<F>(self, provider: F) -> Self
    where
        F: Fn(&Message) -> Result<Value, DispatchError> + Send + Sync + 'static,
    {
        self.context(FnContextProvider::new(provider))
    }

    /// Attach a pre-processor to the last registered command.
    pub fn pre_process<P>(mut self, pre_processor: P) -> Self
    where
        P: CommandPreProcessor + 'static,
    {
        match self.commands.last_mut() {
            Some(last) => last.pre_processors.push(Arc::new(pre_processor)),
            None => self
                .errors
                .push(ConfigurationError::SettingWithoutCommand("pre-processor")),
        }
        self
    }

    /// Attach a closure pre-processor to the last registered command.
    pub fn pre_process_fn<F>(self, pre_processor: F) -> Self
    where
        F: Fn(Message, &dyn MessageFactory) -> Result<PreProcessed, DispatchError>
            + Send
            + Sync
            + 'static,
    {
        self.pre_process(FnPreProcessor::new(pre_processor))
    }

    /// Validate the last registered command's payload against `schema`.
    pub fn payload_schema(mut self, schema: Value) -> Self {
        match self.commands.last_mut() {
            Some(last) => last.payload_schema = Some(schema),
            None => self
                .errors
                .push(ConfigurationError::SettingWithoutCommand("payload schema")),
        }
        self
    }

    fn push_record(&mut self, event: &str) {
        if let Some(last) = self.commands.last_mut() {
            if !last.records.iter().any(|e| e == event) {
                last.records.push(event.to_string());
            }
        }
    }

    /// Freeze the registry, failing on the first configuration problem.
    pub fn build(self) -> Result<ProcessRegistry, ConfigurationError> {
        if let Some(err) = self.errors.into_iter().next() {
            return Err(err);
        }

        let mut seen = HashSet::new();
        for pending in &self.commands {
            if !seen.insert(pending.command.as_str()) {
                return Err(ConfigurationError::DuplicateCommand(pending.command.clone()));
            }
            if pending.records.is_empty() {
                return Err(ConfigurationError::MissingRecordThat(pending.command.clone()));
            }
            for event in &pending.records {
                let covered = self
                    .applies
                    .get(&pending.process_type)
                    .map(|table| table.contains_key(event))
                    .unwrap_or(false);
                if !covered {
                    return Err(ConfigurationError::MissingApply {
                        process_type: pending.process_type.clone(),
                        event: event.clone(),
                    });
                }
            }
        }

        let apply_tables: HashMap<String, Arc<ApplyTable>> = self
            .applies
            .into_iter()
            .map(|(process_type, handlers)| {
                let table = ApplyTable {
                    process_type: process_type.clone(),
                    handlers,
                };
                (process_type, Arc::new(table))
            })
            .collect();

        let mut descriptions = HashMap::new();
        for pending in self.commands {
            let apply = apply_tables
                .get(&pending.process_type)
                .cloned()
                .ok_or_else(|| ConfigurationError::MissingRecordThat(pending.command.clone()))?;
            tracing::debug!(
                command = %pending.command,
                process_type = %pending.process_type,
                events = pending.records.len(),
                "process description registered"
            );
            descriptions.insert(
                pending.command.clone(),
                Arc::new(ProcessDescription {
                    command: pending.command,
                    process_type: pending.process_type,
                    identifier_key: pending.identifier_key,
                    lifecycle: pending.lifecycle,
                    handle: pending.handle,
                    records: pending.records,
                    apply,
                    context_providers: pending.context_providers,
                    pre_processors: pending.pre_processors,
                    payload_schema: pending.payload_schema,
                }),
            );
        }

        Ok(ProcessRegistry {
            descriptions,
            apply_tables,
        })
    }
}
