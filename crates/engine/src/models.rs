//! Core domain models for the action engine.
//!
//! An [`ActionDefinition`] is authored once, loaded by the host at flow-build
//! time and shared immutably across activations. Its [`RunSpec`] says where
//! the action executes.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use actions::{ClientHandler, EmbedHandler, ServerHandler, StreamHandler, VariableSelector};

use crate::options::OptionSchema;
use crate::EngineError;

// ---------------------------------------------------------------------------
// ExecutionVariant
// ---------------------------------------------------------------------------

/// Where and how an action executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionVariant {
    /// Plain call on the trusted server.
    Server,
    /// Server call producing a chunk stream.
    ServerStream,
    /// Code generated for the client runtime.
    Client,
    /// Client code bootstrapping a third-party embed, with optional event resume.
    ClientEmbed,
}

impl ExecutionVariant {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::ServerStream => "server_stream",
            Self::Client => "client",
            Self::ClientEmbed => "client_embed",
        }
    }
}

impl fmt::Display for ExecutionVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// RunSpec
// ---------------------------------------------------------------------------

/// Streaming server run: the selector picks the variable that receives the
/// concatenated text, the handler produces the chunks.
#[derive(Clone)]
pub struct ServerStreamSpec {
    pub stream_variable: Arc<dyn VariableSelector>,
    pub handler: Arc<dyn StreamHandler>,
}

/// Optional second phase of an embed: wait for a client-side event.
#[derive(Clone)]
pub struct WaitForEvent {
    /// Variable receiving the event's data, if any.
    pub save_variable: Arc<dyn VariableSelector>,
    /// Generates the code that subscribes to the embed event.
    pub parse: Arc<dyn ClientHandler>,
}

#[derive(Clone)]
pub struct EmbedSpec {
    pub init: Arc<dyn EmbedHandler>,
    pub wait_for_event: Option<WaitForEvent>,
}

/// Exactly one execution variant with its handlers.
#[derive(Clone)]
pub enum RunSpec {
    Server { handler: Arc<dyn ServerHandler> },
    ServerStream(ServerStreamSpec),
    Client { handler: Arc<dyn ClientHandler> },
    ClientEmbed(EmbedSpec),
}

impl RunSpec {
    pub fn variant(&self) -> ExecutionVariant {
        match self {
            Self::Server { .. } => ExecutionVariant::Server,
            Self::ServerStream(_) => ExecutionVariant::ServerStream,
            Self::Client { .. } => ExecutionVariant::Client,
            Self::ClientEmbed(_) => ExecutionVariant::ClientEmbed,
        }
    }
}

impl fmt::Debug for RunSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientEmbed(spec) => f
                .debug_struct("ClientEmbed")
                .field("wait_for_event", &spec.wait_for_event.is_some())
                .finish_non_exhaustive(),
            other => write!(f, "{}", other.variant()),
        }
    }
}

// ---------------------------------------------------------------------------
// ActionDefinition
// ---------------------------------------------------------------------------

/// Credential an action needs the host to resolve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRequirement {
    /// Credential type name shown in the credentials UI (e.g. `openai`).
    #[serde(rename = "type")]
    pub credential_type: String,
    /// Keys the handlers read.
    #[serde(default)]
    pub keys: Vec<String>,
}

/// A named, versioned descriptor of one pluggable flow behavior.
#[derive(Debug, Clone)]
pub struct ActionDefinition {
    pub id: String,
    pub version: String,
    pub options: OptionSchema,
    pub credentials: Option<CredentialRequirement>,
    pub run: RunSpec,
}

impl ActionDefinition {
    pub fn builder(id: impl Into<String>) -> ActionDefinitionBuilder {
        ActionDefinitionBuilder::new(id)
    }

    pub fn variant(&self) -> ExecutionVariant {
        self.run.variant()
    }

    pub fn declares_credentials(&self) -> bool {
        self.credentials.is_some()
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Assembles an [`ActionDefinition`] from loose parts.
///
/// Every run setter records a variant; [`build`](Self::build) rejects zero or
/// more than one.
pub struct ActionDefinitionBuilder {
    id: String,
    version: String,
    options: OptionSchema,
    credentials: Option<CredentialRequirement>,
    runs: Vec<RunSpec>,
}

impl ActionDefinitionBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: "1.0.0".into(),
            options: OptionSchema::default(),
            credentials: None,
            runs: Vec::new(),
        }
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn options(mut self, schema: OptionSchema) -> Self {
        self.options = schema;
        self
    }

    pub fn credentials(mut self, requirement: CredentialRequirement) -> Self {
        self.credentials = Some(requirement);
        self
    }

    pub fn server(mut self, handler: Arc<dyn ServerHandler>) -> Self {
        self.runs.push(RunSpec::Server { handler });
        self
    }

    pub fn server_stream(
        mut self,
        stream_variable: Arc<dyn VariableSelector>,
        handler: Arc<dyn StreamHandler>,
    ) -> Self {
        self.runs.push(RunSpec::ServerStream(ServerStreamSpec { stream_variable, handler }));
        self
    }

    pub fn client(mut self, handler: Arc<dyn ClientHandler>) -> Self {
        self.runs.push(RunSpec::Client { handler });
        self
    }

    pub fn client_embed(
        mut self,
        init: Arc<dyn EmbedHandler>,
        wait_for_event: Option<WaitForEvent>,
    ) -> Self {
        self.runs.push(RunSpec::ClientEmbed(EmbedSpec { init, wait_for_event }));
        self
    }

    /// # Errors
    /// [`EngineError::InvalidDefinition`] for an empty id, an invalid option
    /// schema, or anything other than exactly one run variant.
    pub fn build(mut self) -> Result<ActionDefinition, EngineError> {
        let invalid = |id: &str, reason: String| EngineError::InvalidDefinition {
            action_id: id.to_owned(),
            reason,
        };

        if self.id.trim().is_empty() {
            return Err(invalid(&self.id, "action id must not be empty".into()));
        }
        self.options.check().map_err(|reason| invalid(&self.id, reason))?;

        if self.runs.len() > 1 {
            let names: Vec<_> = self.runs.iter().map(|r| r.variant().as_str()).collect();
            return Err(invalid(
                &self.id,
                format!("exactly one run variant allowed, found {}", names.join(", ")),
            ));
        }
        let Some(run) = self.runs.pop() else {
            return Err(invalid(&self.id, "no run variant declared".into()));
        };

        Ok(ActionDefinition {
            id: self.id,
            version: self.version,
            options: self.options,
            credentials: self.credentials,
            run,
        })
    }
}
