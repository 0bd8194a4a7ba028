//! Per-activation capability bindings handed to handlers.
//!
//! A [`CapabilityContext`] is built fresh for every activation by the engine
//! and dropped when the activation completes. Client-targeted handlers never
//! see it: they get a [`ClientContext`] (or an [`EmbedContext`]) holding only
//! a read-only options snapshot, since the code they generate runs outside
//! the host's trust boundary.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{ActionError, CredentialError, Logs, Variables};

// ---------------------------------------------------------------------------
// ActivationId
// ---------------------------------------------------------------------------

/// Identifies one runtime invocation of an action instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActivationId(pub Uuid);

impl ActivationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ActivationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ActivationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
enum CredentialState {
    #[default]
    NotDeclared,
    Unresolved,
    Resolved(Arc<BTreeMap<String, String>>),
}

/// Resolved secrets for an action that declares a credential requirement.
///
/// Reads are lazy: a missing credential only fails when a handler actually
/// asks for it, so credential-optional code paths keep working.
#[derive(Clone, Default)]
pub struct Credentials {
    state: CredentialState,
}

impl Credentials {
    /// The action declares no credential requirement.
    pub fn not_declared() -> Self {
        Self { state: CredentialState::NotDeclared }
    }

    /// A requirement was declared but the host resolved nothing.
    pub fn unresolved() -> Self {
        Self { state: CredentialState::Unresolved }
    }

    pub fn resolved(values: BTreeMap<String, String>) -> Self {
        Self { state: CredentialState::Resolved(Arc::new(values)) }
    }

    /// Read a secret by key.
    ///
    /// # Errors
    /// Returns [`CredentialError`] when the action declared no credentials,
    /// nothing was resolved, or the key is absent.
    pub fn get(&self, key: &str) -> Result<&str, CredentialError> {
        match &self.state {
            CredentialState::NotDeclared => {
                Err(CredentialError::NotDeclared { key: key.to_owned() })
            }
            CredentialState::Unresolved => {
                Err(CredentialError::NotResolved { key: key.to_owned() })
            }
            CredentialState::Resolved(values) => values
                .get(key)
                .map(String::as_str)
                .ok_or_else(|| CredentialError::UnknownKey { key: key.to_owned() }),
        }
    }

    /// Like [`get`](Self::get) but `None` instead of an error.
    pub fn try_get(&self, key: &str) -> Option<&str> {
        self.get(key).ok()
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self.state, CredentialState::Resolved(_))
    }
}

// Secrets never end up in logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            CredentialState::NotDeclared => f.write_str("Credentials(not declared)"),
            CredentialState::Unresolved => f.write_str("Credentials(unresolved)"),
            CredentialState::Resolved(values) => f
                .debug_struct("Credentials")
                .field("keys", &values.keys().collect::<Vec<_>>())
                .finish(),
        }
    }
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Read-only snapshot of an action instance's validated options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Options(Arc<Map<String, Value>>);

impl Options {
    pub fn new(values: Map<String, Value>) -> Self {
        Self(Arc::new(values))
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// String option; `None` when absent, null, or not a string.
    pub fn str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Non-empty string option.
    ///
    /// # Errors
    /// [`ActionError::Configuration`] when the option is absent or blank.
    pub fn require_str(&self, key: &str) -> Result<&str, ActionError> {
        match self.str(key) {
            Some(s) if !s.trim().is_empty() => Ok(s),
            _ => Err(ActionError::configuration(format!("option '{key}' is required"))),
        }
    }

    /// Deserialize one option into `T`; absent and null both yield `None`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ActionError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| ActionError::configuration(format!("option '{key}': {e}"))),
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for Options {
    fn from(values: Map<String, Value>) -> Self {
        Self::new(values)
    }
}

// ---------------------------------------------------------------------------
// MountPoint
// ---------------------------------------------------------------------------

/// Symbolic reference to the host element an embed is mounted into.
///
/// The engine never touches the DOM; generated code refers to the mount
/// point by this name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MountPoint(pub String);

impl MountPoint {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MountPoint {
    fn default() -> Self {
        Self("embed-container".into())
    }
}

impl fmt::Display for MountPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Contexts
// ---------------------------------------------------------------------------

/// Everything a server-side handler is authorized to touch.
#[derive(Clone)]
pub struct CapabilityContext {
    /// Activation this context belongs to.
    pub activation_id: ActivationId,
    /// Declared credentials, read lazily.
    pub credentials: Credentials,
    /// Validated options for this action instance.
    pub options: Options,
    /// The flow's variable bag.
    pub variables: Variables,
    /// Structured log channel to the host.
    pub logs: Logs,
    /// Cancelled by the host when the activation is abandoned.
    pub cancellation: CancellationToken,
}

impl CapabilityContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

impl fmt::Debug for CapabilityContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityContext")
            .field("activation_id", &self.activation_id)
            .field("credentials", &self.credentials)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Reduced context for client code generation: options only.
#[derive(Debug, Clone, Default)]
pub struct ClientContext {
    pub options: Options,
}

/// Reduced context for embed initialization: options plus the mount point.
#[derive(Debug, Clone, Default)]
pub struct EmbedContext {
    pub options: Options,
    pub mount: MountPoint,
}
