//! The handler traits: the contract every action author implements.
//!
//! Which trait a handler implements decides where it runs:
//! - [`ServerHandler`] / [`StreamHandler`] run on the trusted server with a
//!   full [`CapabilityContext`].
//! - [`ClientHandler`] / [`EmbedHandler`] only generate code; the code runs in
//!   an untrusted client runtime and the handler never sees credentials or
//!   the variable store.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::{ActionError, CapabilityContext, ClientCode, ClientContext, EmbedContext, Options};

/// Lazily produced text chunks of a streaming handler. Single pass.
pub type ChunkStream = BoxStream<'static, Result<String, ActionError>>;

/// Server-side handler: side effects through the context, nothing returned.
#[async_trait]
pub trait ServerHandler: Send + Sync {
    async fn run(&self, ctx: &CapabilityContext) -> Result<(), ActionError>;
}

/// Server-side streaming handler.
///
/// The returned stream must own what it needs (`'static`); clone handles out
/// of the context rather than borrowing it.
#[async_trait]
pub trait StreamHandler: Send + Sync {
    async fn stream(&self, ctx: &CapabilityContext) -> Result<ChunkStream, ActionError>;
}

/// Generates client code from options alone.
pub trait ClientHandler: Send + Sync {
    fn generate(&self, ctx: &ClientContext) -> Result<ClientCode, ActionError>;
}

impl<F> ClientHandler for F
where
    F: Fn(&ClientContext) -> Result<ClientCode, ActionError> + Send + Sync,
{
    fn generate(&self, ctx: &ClientContext) -> Result<ClientCode, ActionError> {
        self(ctx)
    }
}

/// Generates the code that bootstraps a third-party embed.
///
/// Should fail fast with [`ActionError::Configuration`] rather than emit
/// broken code when a required option is missing.
pub trait EmbedHandler: Send + Sync {
    fn init(&self, ctx: &EmbedContext) -> Result<ClientCode, ActionError>;
}

impl<F> EmbedHandler for F
where
    F: Fn(&EmbedContext) -> Result<ClientCode, ActionError> + Send + Sync,
{
    fn init(&self, ctx: &EmbedContext) -> Result<ClientCode, ActionError> {
        self(ctx)
    }
}

/// Picks the variable that receives an action's output, if any.
pub trait VariableSelector: Send + Sync {
    fn select(&self, options: &Options) -> Option<String>;
}

impl<F> VariableSelector for F
where
    F: Fn(&Options) -> Option<String> + Send + Sync,
{
    fn select(&self, options: &Options) -> Option<String> {
        self(options)
    }
}

/// Selects the variable id stored in a string option, e.g. `saveVariableId`.
///
/// Blank values count as "no variable".
#[derive(Debug, Clone)]
pub struct OptionVariable(pub String);

impl OptionVariable {
    pub fn new(option_key: impl Into<String>) -> Self {
        Self(option_key.into())
    }
}

impl VariableSelector for OptionVariable {
    fn select(&self, options: &Options) -> Option<String> {
        options
            .str(&self.0)
            .filter(|id| !id.trim().is_empty())
            .map(str::to_owned)
    }
}

/// Never selects a variable.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoVariable;

impl VariableSelector for NoVariable {
    fn select(&self, _options: &Options) -> Option<String> {
        None
    }
}
