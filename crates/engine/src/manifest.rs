//! Declarative action manifests and the handler registry they bind against.
//!
//! A manifest is the serialisable shape of a definition. Run variants appear
//! as optional, mutually-exclusive nested objects that name registered
//! handlers:
//!
//! ```json
//! {
//!   "id": "cal-com",
//!   "options": [{ "key": "url", "kind": "string", "required": true }],
//!   "run": {
//!     "client_embed": {
//!       "init": "cal-com.init",
//!       "wait_for_event": { "parse": "cal-com.booked", "save_variable_option": "saveVariableId" }
//!     }
//!   }
//! }
//! ```
//!
//! Rules enforced before binding:
//! 1. The action id is not empty.
//! 2. Exactly one of `server`, `server_stream`, `client`, `client_embed` is set.
//! 3. The option schema has unique keys and well-typed defaults.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use actions::{
    ClientHandler, EmbedHandler, NoVariable, OptionVariable, ServerHandler, StreamHandler,
    VariableSelector,
};

use crate::models::{ActionDefinition, CredentialRequirement, ExecutionVariant, WaitForEvent};
use crate::options::OptionSchema;
use crate::EngineError;

// ---------------------------------------------------------------------------
// Manifest types
// ---------------------------------------------------------------------------

fn default_version() -> String {
    "1.0.0".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionManifest {
    pub id: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub options: OptionSchema,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<CredentialRequirement>,
    #[serde(default)]
    pub run: RunManifest,
}

/// Run variants as optional nested objects; exactly one must be set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunManifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<HandlerRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_stream: Option<StreamManifest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<HandlerRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_embed: Option<EmbedManifest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerRef {
    pub handler: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamManifest {
    pub handler: String,
    /// Option key holding the id of the variable that receives the text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_variable_option: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedManifest {
    pub init: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_for_event: Option<WaitManifest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitManifest {
    pub parse: String,
    /// Option key holding the id of the variable that receives event data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_variable_option: Option<String>,
}

fn selector(option_key: Option<&String>) -> Arc<dyn VariableSelector> {
    match option_key {
        Some(key) => Arc::new(OptionVariable::new(key.clone())),
        None => Arc::new(NoVariable),
    }
}

impl RunManifest {
    fn populated(&self) -> Vec<ExecutionVariant> {
        let mut found = Vec::new();
        if self.server.is_some() {
            found.push(ExecutionVariant::Server);
        }
        if self.server_stream.is_some() {
            found.push(ExecutionVariant::ServerStream);
        }
        if self.client.is_some() {
            found.push(ExecutionVariant::Client);
        }
        if self.client_embed.is_some() {
            found.push(ExecutionVariant::ClientEmbed);
        }
        found
    }
}

impl ActionManifest {
    /// Validate the manifest shape and return the variant it selects.
    ///
    /// # Errors
    /// [`EngineError::InvalidDefinition`] when a rule above is broken.
    pub fn variant(&self) -> Result<ExecutionVariant, EngineError> {
        let invalid = |reason: String| EngineError::InvalidDefinition {
            action_id: self.id.clone(),
            reason,
        };

        if self.id.trim().is_empty() {
            return Err(invalid("action id must not be empty".into()));
        }
        self.options.check().map_err(invalid)?;

        match self.run.populated().as_slice() {
            [] => Err(invalid("no run variant declared".into())),
            [single] => Ok(*single),
            many => {
                let names: Vec<_> = many.iter().map(|v| v.as_str()).collect();
                Err(invalid(format!(
                    "exactly one run variant allowed, found {}",
                    names.join(", ")
                )))
            }
        }
    }

    /// Resolve handler names against `registry` and build the definition.
    ///
    /// # Errors
    /// [`EngineError::InvalidDefinition`] for a malformed manifest,
    /// [`EngineError::UnknownHandler`] for an unregistered handler name.
    pub fn bind(&self, registry: &HandlerRegistry) -> Result<ActionDefinition, EngineError> {
        let variant = self.variant()?;

        let mut builder = ActionDefinition::builder(self.id.clone())
            .version(self.version.clone())
            .options(self.options.clone());
        if let Some(requirement) = &self.credentials {
            builder = builder.credentials(requirement.clone());
        }

        let unknown = |kind: &'static str, name: &str| EngineError::UnknownHandler {
            action_id: self.id.clone(),
            kind,
            name: name.to_owned(),
        };

        // `variant()` guarantees the matching field is populated.
        let builder = match (variant, &self.run) {
            (ExecutionVariant::Server, RunManifest { server: Some(r), .. }) => {
                let handler = registry
                    .server(&r.handler)
                    .ok_or_else(|| unknown("server", &r.handler))?;
                builder.server(handler)
            }
            (ExecutionVariant::ServerStream, RunManifest { server_stream: Some(s), .. }) => {
                let handler = registry
                    .stream(&s.handler)
                    .ok_or_else(|| unknown("stream", &s.handler))?;
                builder.server_stream(selector(s.stream_variable_option.as_ref()), handler)
            }
            (ExecutionVariant::Client, RunManifest { client: Some(r), .. }) => {
                let handler = registry
                    .client(&r.handler)
                    .ok_or_else(|| unknown("client", &r.handler))?;
                builder.client(handler)
            }
            (ExecutionVariant::ClientEmbed, RunManifest { client_embed: Some(e), .. }) => {
                let init = registry.embed(&e.init).ok_or_else(|| unknown("embed", &e.init))?;
                let wait = match &e.wait_for_event {
                    Some(w) => Some(WaitForEvent {
                        save_variable: selector(w.save_variable_option.as_ref()),
                        parse: registry
                            .client(&w.parse)
                            .ok_or_else(|| unknown("client", &w.parse))?,
                    }),
                    None => None,
                };
                builder.client_embed(init, wait)
            }
            _ => {
                return Err(EngineError::InvalidDefinition {
                    action_id: self.id.clone(),
                    reason: format!("run variant '{variant}' is not populated"),
                })
            }
        };

        builder.build()
    }
}

// ---------------------------------------------------------------------------
// HandlerRegistry
// ---------------------------------------------------------------------------

/// Maps handler names to implementations, one table per handler kind.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    server: HashMap<String, Arc<dyn ServerHandler>>,
    stream: HashMap<String, Arc<dyn StreamHandler>>,
    client: HashMap<String, Arc<dyn ClientHandler>>,
    embed: HashMap<String, Arc<dyn EmbedHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_server(
        &mut self,
        name: impl Into<String>,
        handler: Arc<dyn ServerHandler>,
    ) -> &mut Self {
        self.server.insert(name.into(), handler);
        self
    }

    pub fn register_stream(
        &mut self,
        name: impl Into<String>,
        handler: Arc<dyn StreamHandler>,
    ) -> &mut Self {
        self.stream.insert(name.into(), handler);
        self
    }

    pub fn register_client(
        &mut self,
        name: impl Into<String>,
        handler: Arc<dyn ClientHandler>,
    ) -> &mut Self {
        self.client.insert(name.into(), handler);
        self
    }

    pub fn register_embed(
        &mut self,
        name: impl Into<String>,
        handler: Arc<dyn EmbedHandler>,
    ) -> &mut Self {
        self.embed.insert(name.into(), handler);
        self
    }

    pub fn server(&self, name: &str) -> Option<Arc<dyn ServerHandler>> {
        self.server.get(name).cloned()
    }

    pub fn stream(&self, name: &str) -> Option<Arc<dyn StreamHandler>> {
        self.stream.get(name).cloned()
    }

    pub fn client(&self, name: &str) -> Option<Arc<dyn ClientHandler>> {
        self.client.get(name).cloned()
    }

    pub fn embed(&self, name: &str) -> Option<Arc<dyn EmbedHandler>> {
        self.embed.get(name).cloned()
    }
}
