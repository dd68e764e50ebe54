//! Hooks that run around a handle function.

use serde_json::Value;

use super::CommandDispatchResult;
use crate::error::DispatchError;
use crate::message::{Message, MessageFactory};

/// Supplies read-only data to a handle function.
///
/// Providers run after state is loaded and before `handle`; their values reach
/// the handle function through `Invocation::context` in registration order.
pub trait ContextProvider: Send + Sync {
    fn provide(&self, command: &Message) -> Result<Value, DispatchError>;
}

/// `ContextProvider` backed by a closure.
pub struct FnContextProvider<F>(F);

impl<F> FnContextProvider<F>
where
    F: Fn(&Message) -> Result<Value, DispatchError> + Send + Sync,
{
    pub fn new(provider: F) -> Self {
        FnContextProvider(provider)
    }
}

impl<F> ContextProvider for FnContextProvider<F>
where
    F: Fn(&Message) -> Result<Value, DispatchError> + Send + Sync,
{
    fn provide(&self, command: &Message) -> Result<Value, DispatchError> {
        (self.0)(command)
    }
}

/// Outcome of a pre-processor.
#[derive(Debug)]
pub enum PreProcessed {
    /// Continue with this command. A different command name redirects dispatch
    /// to that command's process description.
    Command(Message),
    /// Stop here and return this result without touching the store.
    Done(CommandDispatchResult),
}

/// Inspects, rewrites or short-circuits a command before it is dispatched.
pub trait CommandPreProcessor: Send + Sync {
    fn pre_process(
        &self,
        command: Message,
        factory: &dyn MessageFactory,
    ) -> Result<PreProcessed, DispatchError>;
}

/// `CommandPreProcessor` backed by a closure.
pub struct FnPreProcessor<F>(F);

impl<F> FnPreProcessor<F>
where
    F: Fn(Message, &dyn MessageFactory) -> Result<PreProcessed, DispatchError> + Send + Sync,
{
    pub fn new(pre_processor: F) -> Self {
        FnPreProcessor(pre_processor)
    }
}

impl<F> CommandPreProcessor for FnPreProcessor<F>
where
    F: Fn(Message, &dyn MessageFactory) -> Result<PreProcessed, DispatchError> + Send + Sync,
{
    fn pre_process(
        &self,
        command: Message,
        factory: &dyn MessageFactory,
    ) -> Result<PreProcessed, DispatchError> {
        (self.0)(command, factory)
    }
}
