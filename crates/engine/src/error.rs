//! Engine-level error types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use actions::ActivationId;

/// Errors produced by the action engine (definition checks + activation).
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Activation failures surfaced to the host ------

    /// A handler read a credential the host never resolved.
    #[error("action '{action_id}' is missing credential '{key}': {message}")]
    MissingCredential {
        action_id: String,
        key: String,
        message: String,
    },

    /// Unexpected error or panic inside a server or stream handler.
    #[error("action '{action_id}' handler faulted: {message}")]
    HandlerFault {
        action_id: String,
        message: String,
    },

    /// Generated client args contain undefined values.
    #[error("action '{action_id}' produced undefined client args: {}", .keys.join(", "))]
    InvalidClientPayload {
        action_id: String,
        keys: Vec<String>,
    },

    /// A required option is missing or invalid; no client code was emitted.
    #[error("action '{action_id}' is misconfigured: {message}")]
    ConfigurationError {
        action_id: String,
        message: String,
    },

    /// The streaming handler's sequence ended abnormally.
    #[error("action '{action_id}' stream failed: {message}")]
    StreamFault {
        action_id: String,
        message: String,
    },

    /// The host cancelled the activation.
    #[error("activation {activation_id} was cancelled")]
    Cancelled { activation_id: ActivationId },

    // ------ Definition / binding errors ------

    /// A definition has zero or several run variants, or is otherwise malformed.
    #[error("invalid action definition '{action_id}': {reason}")]
    InvalidDefinition {
        action_id: String,
        reason: String,
    },

    /// A manifest names a handler that is not registered.
    #[error("action '{action_id}' references unknown {kind} handler '{name}'")]
    UnknownHandler {
        action_id: String,
        kind: &'static str,
        name: String,
    },

    /// Raw options do not satisfy the declared schema.
    #[error("action '{action_id}' has invalid options: {message}")]
    InvalidOptions {
        action_id: String,
        message: String,
    },

    // ------ Event resume errors ------

    /// No continuation is registered for this activation (never registered,
    /// already resumed, or cancelled).
    #[error("activation {activation_id} is not awaiting an event")]
    NotAwaitingEvent { activation_id: ActivationId },

    /// A continuation is already registered for this activation.
    #[error("activation {activation_id} is already awaiting an event")]
    AlreadyAwaitingEvent { activation_id: ActivationId },

    /// Too many activations are waiting for client events.
    #[error("cannot register activation {activation_id}: {limit} waits already pending")]
    ResumeCapacityExceeded {
        activation_id: ActivationId,
        limit: usize,
    },

    // ------ Configuration ------

    /// The engine configuration could not be loaded.
    #[error("engine configuration error: {0}")]
    Config(String),
}

/// Failure category reported to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    MissingCredential,
    HandlerFault,
    InvalidClientPayload,
    ConfigurationError,
    StreamFault,
    Cancelled,
    InvalidDefinition,
    UnknownHandler,
    InvalidOptions,
    NotAwaitingEvent,
    AlreadyAwaitingEvent,
    ResumeCapacityExceeded,
    Config,
}

/// Structured failure (kind + message) handed to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl EngineError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::MissingCredential { .. } => FailureKind::MissingCredential,
            Self::HandlerFault { .. } => FailureKind::HandlerFault,
            Self::InvalidClientPayload { .. } => FailureKind::InvalidClientPayload,
            Self::ConfigurationError { .. } => FailureKind::ConfigurationError,
            Self::StreamFault { .. } => FailureKind::StreamFault,
            Self::Cancelled { .. } => FailureKind::Cancelled,
            Self::InvalidDefinition { .. } => FailureKind::InvalidDefinition,
            Self::UnknownHandler { .. } => FailureKind::UnknownHandler,
            Self::InvalidOptions { .. } => FailureKind::InvalidOptions,
            Self::NotAwaitingEvent { .. } => FailureKind::NotAwaitingEvent,
            Self::AlreadyAwaitingEvent { .. } => FailureKind::AlreadyAwaitingEvent,
            Self::ResumeCapacityExceeded { .. } => FailureKind::ResumeCapacityExceeded,
            Self::Config(_) => FailureKind::Config,
        }
    }

    pub fn failure(&self) -> Failure {
        Failure {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}
