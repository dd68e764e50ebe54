//! Error taxonomy shared by the write path, the projection engine and the query side.
//!
//! Every error type in the crate exposes `kind()`, and every `ErrorKind` maps to a
//! stable HTTP-style status code so callers can surface failures uniformly.

use std::error::Error;
use std::fmt;

use crate::lock::LockError;
use crate::schema::ValidationError;
use crate::store::StoreError;

/// Stable classification of every failure the framework can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad or missing identifier, malformed payload.
    InvalidArgument,
    /// Unknown command/query name, or the targeted process does not exist.
    NotFound,
    /// A "new" command targeted a process that already has history.
    AlreadyExists,
    /// Schema rejection of a payload or response.
    ValidationFailed,
    /// A projector could not handle an event and was halted.
    ProjectorFailed,
    /// Transactional append used without an open transaction.
    TransactionNotStarted,
    /// Registry or wiring problem; should be caught at startup.
    ConfigurationError,
    /// The process version advanced between load and append.
    Conflict,
    /// Business logic refused the command.
    Rejected,
    /// Storage-level failure (poisoned locks, adapter errors).
    Storage,
}

impl ErrorKind {
    /// Map this kind to an HTTP-style status code.
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::InvalidArgument => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::AlreadyExists => 409,
            ErrorKind::ValidationFailed => 400,
            ErrorKind::ProjectorFailed => 500,
            ErrorKind::TransactionNotStarted => 500,
            ErrorKind::ConfigurationError => 500,
            ErrorKind::Conflict => 409,
            ErrorKind::Rejected => 422,
            ErrorKind::Storage => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::NotFound => "not_found",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::ValidationFailed => "validation_failed",
            ErrorKind::ProjectorFailed => "projector_failed",
            ErrorKind::TransactionNotStarted => "transaction_not_started",
            ErrorKind::ConfigurationError => "configuration_error",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Rejected => "rejected",
            ErrorKind::Storage => "storage",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Problems detected while building the process registry or wiring the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// The same command name was registered twice.
    DuplicateCommand(String),
    /// An event has more than one apply function within one process type.
    DuplicateApply { process_type: String, event: String },
    /// A command references an event that has no apply function for its process type.
    MissingApply { process_type: String, event: String },
    /// A command was registered without any terminating `record_that`.
    MissingRecordThat(String),
    /// `record_that` was called before any command was registered.
    RecordThatWithoutCommand(String),
    /// A per-command setting (context, pre-processor, schema) came before any command.
    SettingWithoutCommand(&'static str),
    /// A command, process type, identifier key or event name was empty.
    EmptyName(&'static str),
    /// A handle function yielded an event its description never recorded.
    UnlistedEvent { command: String, event: String },
    /// A handle function yielded a message that is not an event.
    NotAnEvent { command: String, message: String },
    /// A pre-processor tried to redirect a command that was already redirected.
    RedirectLimit { from: String, to: String },
    /// Anything else detected at wiring time.
    Other(String),
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigurationError::DuplicateCommand(name) => {
                write!(f, "command {} is registered more than once", name)
            }
            ConfigurationError::DuplicateApply {
                process_type,
                event,
            } => write!(
                f,
                "event {} of process {} has more than one apply function",
                event, process_type
            ),
            ConfigurationError::MissingApply {
                process_type,
                event,
            } => write!(
                f,
                "event {} of process {} has no apply function",
                event, process_type
            ),
            ConfigurationError::MissingRecordThat(command) => {
                write!(f, "command {} does not record any event", command)
            }
            ConfigurationError::RecordThatWithoutCommand(event) => {
                write!(f, "record_that({}) called before any command was registered", event)
            }
            ConfigurationError::SettingWithoutCommand(setting) => {
                write!(f, "{} set before any command was registered", setting)
            }
            ConfigurationError::EmptyName(what) => write!(f, "{} must not be empty", what),
            ConfigurationError::UnlistedEvent { command, event } => write!(
                f,
                "command {} yielded event {} which it does not record",
                command, event
            ),
            ConfigurationError::NotAnEvent { command, message } => write!(
                f,
                "command {} yielded {} which is not an event",
                command, message
            ),
            ConfigurationError::RedirectLimit { from, to } => write!(
                f,
                "pre-processor tried to redirect {} to {} after a redirect already happened",
                from, to
            ),
            ConfigurationError::Other(msg) => write!(f, "configuration error: {}", msg),
        }
    }
}

impl Error for ConfigurationError {}

/// Error returned by command dispatch.
#[derive(Debug)]
pub enum DispatchError {
    /// Bad or missing identifier, malformed payload.
    InvalidArgument(String),
    /// No process description is registered for this command name.
    UnknownCommand(String),
    /// An "existing" command targeted a process without history.
    ProcessNotFound { process_type: String, pid: String },
    /// A "new" command targeted a process that already has history.
    ProcessAlreadyExists { process_type: String, pid: String },
    /// Business logic rejected the command.
    Rejected(String),
    /// Payload failed schema validation.
    Validation(ValidationError),
    /// Registry or wiring error surfaced at dispatch time.
    Configuration(ConfigurationError),
    /// Event store failure (including optimistic concurrency conflicts).
    Store(StoreError),
    /// Per-process lock failure.
    Lock(LockError),
}

impl DispatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            DispatchError::UnknownCommand(_) => ErrorKind::NotFound,
            DispatchError::ProcessNotFound { .. } => ErrorKind::NotFound,
            DispatchError::ProcessAlreadyExists { .. } => ErrorKind::AlreadyExists,
            DispatchError::Rejected(_) => ErrorKind::Rejected,
            DispatchError::Validation(_) => ErrorKind::ValidationFailed,
            DispatchError::Configuration(_) => ErrorKind::ConfigurationError,
            DispatchError::Store(e) => e.kind(),
            DispatchError::Lock(_) => ErrorKind::Storage,
        }
    }

    /// Map this error to an HTTP-style status code.
    pub fn status_code(&self) -> u16 {
        self.kind().status_code()
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        DispatchError::Rejected(reason.into())
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        DispatchError::InvalidArgument(reason.into())
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            DispatchError::UnknownCommand(name) => write!(f, "unknown command: {}", name),
            DispatchError::ProcessNotFound { process_type, pid } => {
                write!(f, "process {} with id {} not found", process_type, pid)
            }
            DispatchError::ProcessAlreadyExists { process_type, pid } => {
                write!(f, "process {} with id {} already exists", process_type, pid)
            }
            DispatchError::Rejected(msg) => write!(f, "rejected: {}", msg),
            DispatchError::Validation(e) => write!(f, "{}", e),
            DispatchError::Configuration(e) => write!(f, "{}", e),
            DispatchError::Store(e) => write!(f, "event store error: {}", e),
            DispatchError::Lock(e) => write!(f, "{}", e),
        }
    }
}

impl Error for DispatchError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DispatchError::Validation(e) => Some(e),
            DispatchError::Configuration(e) => Some(e),
            DispatchError::Store(e) => Some(e),
            DispatchError::Lock(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for DispatchError {
    fn from(err: StoreError) -> Self {
        DispatchError::Store(err)
    }
}

impl From<LockError> for DispatchError {
    fn from(err: LockError) -> Self {
        DispatchError::Lock(err)
    }
}

impl From<ValidationError> for DispatchError {
    fn from(err: ValidationError) -> Self {
        DispatchError::Validation(err)
    }
}

impl From<ConfigurationError> for DispatchError {
    fn from(err: ConfigurationError) -> Self {
        DispatchError::Configuration(err)
    }
}

impl From<crate::message::MessageError> for DispatchError {
    fn from(err: crate::message::MessageError) -> Self {
        match err {
            crate::message::MessageError::UnknownMessage(name) => DispatchError::UnknownCommand(name),
            other => DispatchError::InvalidArgument(other.to_string()),
        }
    }
}
