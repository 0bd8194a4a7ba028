//! Embed lifecycle coordinator.
//!
//! Per activation: `(none) -> Init -> [Wait -> Resumed] -> terminal`.
//!
//! Init produces the code that mounts a third-party widget. When the action
//! declares `wait_for_event`, a second payload subscribes to the widget's
//! event and the coordinator keeps a one-shot continuation keyed by
//! activation id. Firing the event consumes the continuation: the event data
//! is written to the save variable (if any) and the host is resumed exactly
//! once. There is no way back into Init.
//!
//! A continuation dies with its activation: once the activation's token is
//! cancelled or the host drops its [`PendingResume`], the event is refused
//! and the entry no longer counts against the capacity limit.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use actions::{ActivationId, ClientContext, ClientPayload, EmbedContext, Variables};

use crate::client::{generate, validate_payload};
use crate::models::{ActionDefinition, EmbedSpec, WaitForEvent};
use crate::server::{panic_message, select_variable};
use crate::EngineError;

/// Payload and target variable of the wait phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitPlan {
    pub payload: ClientPayload,
    pub save_variable: Option<String>,
}

/// Delivered to the host when the awaited client event fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowResume {
    pub activation_id: ActivationId,
    /// Variable the event data was written to, if any.
    pub variable: Option<String>,
    pub data: Value,
}

/// A registered wait. The host sends `wait.payload` to the client and awaits
/// [`resumed`](Self::resumed) to continue the flow.
#[derive(Debug)]
pub struct PendingResume {
    pub activation_id: ActivationId,
    pub wait: WaitPlan,
    resumed: oneshot::Receiver<FlowResume>,
}

impl PendingResume {
    /// Wait for the event. `None` if the wait was cancelled.
    pub async fn resumed(self) -> Option<FlowResume> {
        self.resumed.await.ok()
    }

    /// Non-blocking check; `None` while still waiting or after cancellation.
    pub fn try_resumed(&mut self) -> Option<FlowResume> {
        self.resumed.try_recv().ok()
    }
}

struct Waiting {
    action_id: String,
    save_variable: Option<String>,
    variables: Variables,
    cancellation: CancellationToken,
    resume: oneshot::Sender<FlowResume>,
}

impl Waiting {
    fn is_live(&self) -> bool {
        !self.cancellation.is_cancelled() && !self.resume.is_closed()
    }
}

/// Owns the continuation table for activations awaiting client events.
pub struct EmbedCoordinator {
    pending: Mutex<HashMap<ActivationId, Waiting>>,
    max_pending: usize,
}

impl EmbedCoordinator {
    pub fn new(max_pending: usize) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            max_pending,
        }
    }

    fn table(&self) -> MutexGuard<'_, HashMap<ActivationId, Waiting>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Table with dead continuations removed.
    fn live_table(&self) -> MutexGuard<'_, HashMap<ActivationId, Waiting>> {
        let mut table = self.table();
        table.retain(|activation_id, waiting| {
            let live = waiting.is_live();
            if !live {
                info!(
                    %activation_id,
                    action_id = %waiting.action_id,
                    "dropping abandoned event wait"
                );
            }
            live
        });
        table
    }

    /// Init phase: generate the bootstrap payload.
    ///
    /// # Errors
    /// Any handler failure is a [`EngineError::ConfigurationError`], raised
    /// before client code exists; undefined args are
    /// [`EngineError::InvalidClientPayload`].
    #[instrument(skip_all, fields(action_id = %definition.id, mount = %ctx.mount))]
    pub fn init_payload(
        &self,
        definition: &ActionDefinition,
        spec: &EmbedSpec,
        ctx: &EmbedContext,
    ) -> Result<ClientPayload, EngineError> {
        let code = match catch_unwind(AssertUnwindSafe(|| spec.init.init(ctx))) {
            Ok(Ok(code)) => code,
            Ok(Err(e)) => {
                let err = EngineError::ConfigurationError {
                    action_id: definition.id.clone(),
                    message: match e {
                        actions::ActionError::Configuration(message) => message,
                        other => other.to_string(),
                    },
                };
                error!(error = %err, "embed init rejected");
                return Err(err);
            }
            Err(panic) => {
                let err = EngineError::ConfigurationError {
                    action_id: definition.id.clone(),
                    message: format!("init handler panicked: {}", panic_message(panic.as_ref())),
                };
                error!(error = %err, "embed init panicked");
                return Err(err);
            }
        };

        let payload = validate_payload(&definition.id, code)?;
        info!("embed init payload generated");
        Ok(payload)
    }

    /// Wait phase: resolve the save variable and generate the subscription
    /// payload. Independent of whether Init was dispatched.
    ///
    /// # Errors
    /// A panicking selector is a [`EngineError::HandlerFault`]; the parse
    /// handler fails as in [`generate`].
    pub fn wait_plan(
        &self,
        definition: &ActionDefinition,
        wait: &WaitForEvent,
        ctx: &ClientContext,
    ) -> Result<WaitPlan, EngineError> {
        let save_variable =
            select_variable(&definition.id, wait.save_variable.as_ref(), &ctx.options)?;
        let payload = generate(definition, wait.parse.as_ref(), ctx)?;
        Ok(WaitPlan { payload, save_variable })
    }

    /// Register the one-shot continuation for `activation_id`, alive until
    /// `cancellation` fires or the returned handle is dropped.
    ///
    /// # Errors
    /// - [`EngineError::AlreadyAwaitingEvent`] if the activation is already waiting.
    /// - [`EngineError::ResumeCapacityExceeded`] when the table is full.
    pub fn register(
        &self,
        action_id: &str,
        activation_id: ActivationId,
        wait: WaitPlan,
        variables: Variables,
        cancellation: CancellationToken,
    ) -> Result<PendingResume, EngineError> {
        let mut table = self.live_table();
        if table.contains_key(&activation_id) {
            return Err(EngineError::AlreadyAwaitingEvent { activation_id });
        }
        if table.len() >= self.max_pending {
            warn!(limit = self.max_pending, "embed continuation table is full");
            return Err(EngineError::ResumeCapacityExceeded {
                activation_id,
                limit: self.max_pending,
            });
        }

        let (tx, rx) = oneshot::channel();
        table.insert(
            activation_id,
            Waiting {
                action_id: action_id.to_owned(),
                save_variable: wait.save_variable.clone(),
                variables,
                cancellation,
                resume: tx,
            },
        );
        info!(
            %activation_id,
            action_id,
            save_variable = ?wait.save_variable,
            "awaiting client event"
        );

        Ok(PendingResume {
            activation_id,
            wait,
            resumed: rx,
        })
    }

    /// The client event fired: store its data and resume the flow.
    ///
    /// # Errors
    /// [`EngineError::NotAwaitingEvent`] if nothing is registered for the
    /// activation, including every fire after the first and any fire after
    /// the activation was cancelled or its handle dropped. No variable is
    /// written in that case.
    #[instrument(skip(self, data))]
    pub async fn fire(
        &self,
        activation_id: ActivationId,
        data: Value,
    ) -> Result<FlowResume, EngineError> {
        // Removal under the lock is what makes the resume at-most-once.
        let Some(waiting) = self.table().remove(&activation_id) else {
            warn!("event fired for an activation that is not waiting");
            return Err(EngineError::NotAwaitingEvent { activation_id });
        };
        if !waiting.is_live() {
            warn!(action_id = %waiting.action_id, "event fired for an abandoned activation");
            return Err(EngineError::NotAwaitingEvent { activation_id });
        }

        if let Some(variable_id) = &waiting.save_variable {
            waiting.variables.set(variable_id, data.clone()).await;
        }

        let resume = FlowResume {
            activation_id,
            variable: waiting.save_variable,
            data,
        };
        if waiting.resume.send(resume.clone()).is_err() {
            warn!(
                action_id = %waiting.action_id,
                "host dropped the resume handle during the write"
            );
        }
        info!(action_id = %waiting.action_id, "flow resumed");
        Ok(resume)
    }

    /// Drop a pending continuation. Returns whether one existed.
    pub fn cancel(&self, activation_id: ActivationId) -> bool {
        self.table().remove(&activation_id).is_some()
    }

    pub fn is_awaiting(&self, activation_id: ActivationId) -> bool {
        self.live_table().contains_key(&activation_id)
    }

    /// Live continuations; abandoned ones are dropped first.
    pub fn pending_count(&self) -> usize {
        self.live_table().len()
    }
}
