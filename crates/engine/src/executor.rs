//! Action activation engine.
//!
//! `ActionExecutor` is the central dispatcher:
//! 1. Rejects activations cancelled before dispatch.
//! 2. Validates raw options against the definition's schema.
//! 3. Builds the context matching the run variant.
//! 4. Runs the matching executor (server, stream, client or embed).
//! 5. Owns the embed continuation table used by [`ActionExecutor::resume`].

use serde_json::{Map, Value};
use tracing::{info, instrument};

use actions::{ActivationId, ClientPayload, Options, Variables};

use crate::client::generate;
use crate::context::{ActivationRequest, ContextBuilder};
use crate::embed::{EmbedCoordinator, FlowResume, PendingResume, WaitPlan};
use crate::models::{ActionDefinition, RunSpec};
use crate::server::run_server;
use crate::stream::{run_stream, StreamHandle};
use crate::{EngineConfig, EngineError};

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Embed activation result: the Init payload plus, when the action waits for
/// a client event, the registered continuation.
#[derive(Debug)]
pub struct EmbedActivation {
    pub init: ClientPayload,
    pub wait: Option<PendingResume>,
}

/// What one activation hands back to the host.
#[derive(Debug)]
pub enum Outcome {
    /// A server handler ran to completion.
    Completed,
    /// Chunks to forward to the client as they arrive.
    Stream(StreamHandle),
    /// Code for the client runtime.
    Client(ClientPayload),
    /// Embed bootstrap code, optionally followed by an event wait.
    Embed(EmbedActivation),
}

impl Outcome {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Stream(_) => "stream",
            Self::Client(_) => "client",
            Self::Embed(_) => "embed",
        }
    }
}

// ---------------------------------------------------------------------------
// ActionExecutor
// ---------------------------------------------------------------------------

/// Dispatches activations of action definitions.
///
/// Construct one executor per host and share it; definitions are passed per
/// call and never retained.
pub struct ActionExecutor {
    config: EngineConfig,
    contexts: ContextBuilder,
    embeds: EmbedCoordinator,
}

impl ActionExecutor {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            contexts: ContextBuilder::new(&config),
            embeds: EmbedCoordinator::new(config.max_pending_resumes),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Continuation table for embeds waiting on client events.
    pub fn embeds(&self) -> &EmbedCoordinator {
        &self.embeds
    }

    /// Run one activation of `definition`.
    ///
    /// # Errors
    /// `Cancelled` if the request was cancelled before dispatch,
    /// `InvalidOptions` if the raw options do not satisfy the schema
    /// (`ConfigurationError` for embeds), or whatever the variant's executor
    /// reports.
    #[instrument(
        skip_all,
        fields(
            action_id = %definition.id,
            activation_id = %request.activation_id,
            variant = %definition.variant(),
        )
    )]
    pub async fn activate(
        &self,
        definition: &ActionDefinition,
        request: ActivationRequest,
    ) -> Result<Outcome, EngineError> {
        if request.cancellation.is_cancelled() {
            info!("activation cancelled before dispatch");
            return Err(EngineError::Cancelled {
                activation_id: request.activation_id,
            });
        }

        let options = validate_options(definition, request.options.clone())?;

        let outcome = match &definition.run {
            RunSpec::Server { handler } => {
                let ctx = self.contexts.server(definition, &request, options);
                run_server(definition, handler.as_ref(), &ctx).await?;
                Outcome::Completed
            }

            RunSpec::ServerStream(spec) => {
                let ctx = self.contexts.server(definition, &request, options);
                Outcome::Stream(run_stream(definition, spec, ctx).await?)
            }

            RunSpec::Client { handler } => {
                let ctx = self.contexts.client(options);
                Outcome::Client(generate(definition, handler.as_ref(), &ctx)?)
            }

            RunSpec::ClientEmbed(spec) => {
                let embed_ctx = self.contexts.embed(options.clone(), request.mount.clone());
                let init = self.embeds.init_payload(definition, spec, &embed_ctx)?;

                let wait = match &spec.wait_for_event {
                    Some(wait) => {
                        let plan = self
                            .embeds
                            .wait_plan(definition, wait, &self.contexts.client(options))?;
                        Some(self.embeds.register(
                            &definition.id,
                            request.activation_id,
                            plan,
                            Variables::new(request.variables.clone()),
                            request.cancellation.clone(),
                        )?)
                    }
                    None => None,
                };

                Outcome::Embed(EmbedActivation { init, wait })
            }
        };

        info!(outcome = outcome.kind(), "activation dispatched");
        Ok(outcome)
    }

    /// Wait payload of an embed action, without running its Init phase.
    ///
    /// Returns `Ok(None)` for actions that do not wait for a client event.
    pub fn wait_plan(
        &self,
        definition: &ActionDefinition,
        raw_options: Map<String, Value>,
    ) -> Result<Option<WaitPlan>, EngineError> {
        let RunSpec::ClientEmbed(spec) = &definition.run else {
            return Ok(None);
        };
        let Some(wait) = &spec.wait_for_event else {
            return Ok(None);
        };

        let options = validate_options(definition, raw_options)?;
        self.embeds
            .wait_plan(definition, wait, &self.contexts.client(options))
            .map(Some)
    }

    /// Deliver a client event to the activation waiting for it.
    pub async fn resume(
        &self,
        activation_id: ActivationId,
        data: Value,
    ) -> Result<FlowResume, EngineError> {
        self.embeds.fire(activation_id, data).await
    }

    /// Abandon an activation's event wait. Returns whether one was pending.
    pub fn cancel_wait(&self, activation_id: ActivationId) -> bool {
        let cancelled = self.embeds.cancel(activation_id);
        if cancelled {
            info!(%activation_id, "event wait cancelled");
        }
        cancelled
    }
}

/// Validate raw options against the definition's schema.
///
/// Embeds report schema violations as `ConfigurationError`: they are caught
/// before Init, so no client code is emitted.
fn validate_options(
    definition: &ActionDefinition,
    raw: Map<String, Value>,
) -> Result<Options, EngineError> {
    match (definition.options.validate(&definition.id, raw), &definition.run) {
        (Err(EngineError::InvalidOptions { action_id, message }), RunSpec::ClientEmbed(_)) => {
            Err(EngineError::ConfigurationError { action_id, message })
        }
        (result, _) => result,
    }
}

impl Default for ActionExecutor {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}
