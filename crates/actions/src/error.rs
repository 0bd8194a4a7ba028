//! Handler-level error types.

use thiserror::Error;

/// Errors returned by an action handler.
///
/// The engine uses the variant to decide how the failure reaches the host:
/// - `MissingCredential`: the activation fails with a credential error.
/// - `Configuration`: a required option is missing or invalid.
/// - `Fault` / `Other`: unexpected failure; the activation is aborted.
///
/// Expected upstream failures (a rejected HTTP call, an empty result) are
/// not errors: record them with [`Logs::error`](crate::Logs::error) and
/// return `Ok`.
#[derive(Debug, Error)]
pub enum ActionError {
    /// A credential was read that the host never resolved.
    #[error("missing credential: {0}")]
    MissingCredential(#[from] CredentialError),

    /// The action instance is misconfigured.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Unexpected failure raised by the handler itself.
    #[error("handler fault: {0}")]
    Fault(String),

    /// Any other error bubbled up with `?`.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ActionError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn fault(message: impl Into<String>) -> Self {
        Self::Fault(message.into())
    }
}

/// Raised on first access to a credential that is not available.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    /// The action never declared a credential requirement.
    #[error("action declares no credentials, cannot read '{key}'")]
    NotDeclared { key: String },

    /// The action declared a requirement but the host resolved nothing.
    #[error("credential '{key}' was not resolved by the host")]
    NotResolved { key: String },

    /// Credentials were resolved but this key is absent.
    #[error("resolved credentials have no key '{key}'")]
    UnknownKey { key: String },
}

impl CredentialError {
    /// The key the handler attempted to read.
    pub fn key(&self) -> &str {
        match self {
            Self::NotDeclared { key } | Self::NotResolved { key } | Self::UnknownKey { key } => key,
        }
    }
}

/// A generated client payload still holds undefined arguments.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("client args are undefined: {}", .keys.join(", "))]
pub struct UndefinedArgs {
    pub keys: Vec<String>,
}
