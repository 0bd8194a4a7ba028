//! `actions` crate: the contract between action authors and the engine.
//!
//! Every action handler (server, streaming, client or embed) implements
//! one of the traits in [`traits`]. The engine crate builds the
//! [`CapabilityContext`] handed to server handlers and validates what
//! client handlers return.

pub mod context;
pub mod error;
pub mod logs;
pub mod mock;
pub mod payload;
pub mod traits;
pub mod variables;

pub use context::{
    ActivationId, CapabilityContext, ClientContext, Credentials, EmbedContext, MountPoint, Options,
};
pub use error::{ActionError, CredentialError, UndefinedArgs};
pub use logs::{ChannelLogSink, LogEntry, LogSink, LogStatus, Logs, MemoryLogSink};
pub use payload::{ClientCode, ClientPayload};
pub use traits::{
    ChunkStream, ClientHandler, EmbedHandler, NoVariable, OptionVariable, ServerHandler,
    StreamHandler, VariableSelector,
};
pub use variables::{InMemoryVariables, VariableStore, Variables};
