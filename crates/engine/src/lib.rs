//! `engine` crate: action definitions, option validation and the activation engine.

pub mod client;
pub mod config;
pub mod context;
pub mod embed;
pub mod error;
pub mod executor;
pub mod manifest;
pub mod models;
pub mod options;
pub mod server;
pub mod stream;

pub use config::EngineConfig;
pub use context::{ActivationRequest, ContextBuilder};
pub use embed::{EmbedCoordinator, FlowResume, PendingResume, WaitPlan};
pub use error::{EngineError, Failure, FailureKind};
pub use executor::{ActionExecutor, EmbedActivation, Outcome};
pub use manifest::{ActionManifest, HandlerRegistry};
pub use models::{
    ActionDefinition, ActionDefinitionBuilder, CredentialRequirement, EmbedSpec, ExecutionVariant,
    RunSpec, ServerStreamSpec, WaitForEvent,
};
pub use options::{OptionField, OptionKind, OptionSchema};
pub use stream::StreamHandle;

#[cfg(test)]
mod executor_tests;
