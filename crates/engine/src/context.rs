//! Capability context assembly.
//!
//! Pure construction: nothing here performs I/O or touches the variable
//! store.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use actions::{
    ActivationId, CapabilityContext, ClientContext, Credentials, EmbedContext, LogSink, Logs,
    MountPoint, Options, VariableStore, Variables,
};

use crate::models::ActionDefinition;
use crate::EngineConfig;

/// Everything the host supplies for one activation.
pub struct ActivationRequest {
    pub activation_id: ActivationId,
    /// Resolved credential values; `None` when the host resolved nothing.
    pub credentials: Option<BTreeMap<String, String>>,
    /// Raw option values, validated against the definition's schema.
    pub options: Map<String, Value>,
    pub variables: Arc<dyn VariableStore>,
    pub logs: Arc<dyn LogSink>,
    /// Where embeds are mounted.
    pub mount: MountPoint,
    pub cancellation: CancellationToken,
}

impl ActivationRequest {
    pub fn new(variables: Arc<dyn VariableStore>, logs: Arc<dyn LogSink>) -> Self {
        Self {
            activation_id: ActivationId::new(),
            credentials: None,
            options: Map::new(),
            variables,
            logs,
            mount: MountPoint::default(),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_activation_id(mut self, activation_id: ActivationId) -> Self {
        self.activation_id = activation_id;
        self
    }

    pub fn with_credentials(mut self, credentials: BTreeMap<String, String>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_options(mut self, options: Map<String, Value>) -> Self {
        self.options = options;
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn with_mount(mut self, mount: MountPoint) -> Self {
        self.mount = mount;
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }
}

/// Builds the per-activation contexts handed to handlers.
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    echo_logs: bool,
}

impl ContextBuilder {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            echo_logs: config.echo_logs,
        }
    }

    /// Full context for server and streaming handlers.
    ///
    /// Credentials are only bound when the definition declares a
    /// requirement; a declared but unresolved requirement still builds and
    /// fails on first read.
    pub fn server(
        &self,
        definition: &ActionDefinition,
        request: &ActivationRequest,
        options: Options,
    ) -> CapabilityContext {
        let credentials = match (&definition.credentials, &request.credentials) {
            (None, _) => Credentials::not_declared(),
            (Some(_), Some(values)) if !values.is_empty() => Credentials::resolved(values.clone()),
            (Some(_), _) => Credentials::unresolved(),
        };

        CapabilityContext {
            activation_id: request.activation_id,
            credentials,
            options,
            variables: Variables::new(request.variables.clone()),
            logs: Logs::new(request.logs.clone()).with_echo(self.echo_logs),
            cancellation: request.cancellation.clone(),
        }
    }

    /// Options-only context for client code generation.
    pub fn client(&self, options: Options) -> ClientContext {
        ClientContext { options }
    }

    /// Options plus mount point for embed initialization.
    pub fn embed(&self, options: Options, mount: MountPoint) -> EmbedContext {
        EmbedContext { options, mount }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CredentialRequirement;
    use actions::mock::MockServerHandler;
    use actions::{CredentialError, InMemoryVariables, MemoryLogSink};

    fn definition(with_credentials: bool) -> ActionDefinition {
        let mut builder = ActionDefinition::builder("openai")
            .server(Arc::new(MockServerHandler::succeeding("openai")));
        if with_credentials {
            builder = builder.credentials(CredentialRequirement {
                credential_type: "openai".into(),
                keys: vec!["apiKey".into()],
            });
        }
        builder.build().unwrap()
    }

    fn request() -> ActivationRequest {
        ActivationRequest::new(Arc::new(InMemoryVariables::new()), Arc::new(MemoryLogSink::new()))
    }

    #[test]
    fn declared_and_resolved_credentials_are_bound() {
        let builder = ContextBuilder::new(&EngineConfig::default());
        let req = request().with_credentials(BTreeMap::from([("apiKey".into(), "sk".into())]));
        let ctx = builder.server(&definition(true), &req, Options::empty());
        assert_eq!(ctx.credentials.get("apiKey"), Ok("sk"));
        assert_eq!(ctx.activation_id, req.activation_id);
    }

    #[test]
    fn undeclared_requirement_drops_resolved_values() {
        let builder = ContextBuilder::new(&EngineConfig::default());
        let req = request().with_credentials(BTreeMap::from([("apiKey".into(), "sk".into())]));
        let ctx = builder.server(&definition(false), &req, Options::empty());
        assert!(matches!(ctx.credentials.get("apiKey"), Err(CredentialError::NotDeclared { .. })));
    }

    #[test]
    fn declared_but_unresolved_builds_and_fails_on_read() {
        let builder = ContextBuilder::new(&EngineConfig::default());
        for req in [request(), request().with_credentials(BTreeMap::new())] {
            let ctx = builder.server(&definition(true), &req, Options::empty());
            assert!(matches!(
                ctx.credentials.get("apiKey"),
                Err(CredentialError::NotResolved { .. })
            ));
        }
    }
}
