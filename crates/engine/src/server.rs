//! Server executor for plain (non-streaming) handlers.
//!
//! The handler is awaited once on the caller's task. Its `Err` results and
//! panics are converted to engine failures at this boundary; nothing is
//! retried. Variable writes the handler committed before failing stay.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use futures::FutureExt;
use tracing::{error, info, instrument};

use actions::{ActionError, CapabilityContext, Options, ServerHandler, VariableSelector};

use crate::models::ActionDefinition;
use crate::EngineError;

/// Run a server handler to completion.
///
/// # Errors
/// - [`EngineError::MissingCredential`] if the handler read an unresolved credential.
/// - [`EngineError::ConfigurationError`] if the handler rejected its options.
/// - [`EngineError::HandlerFault`] for any other error or a panic.
/// - [`EngineError::Cancelled`] if the host cancelled before completion.
#[instrument(skip_all, fields(action_id = %definition.id, activation_id = %ctx.activation_id))]
pub async fn run_server(
    definition: &ActionDefinition,
    handler: &dyn ServerHandler,
    ctx: &CapabilityContext,
) -> Result<(), EngineError> {
    let call = AssertUnwindSafe(handler.run(ctx)).catch_unwind();

    let outcome = tokio::select! {
        biased;
        _ = ctx.cancellation.cancelled() => {
            info!("activation cancelled while handler was running");
            return Err(EngineError::Cancelled { activation_id: ctx.activation_id });
        }
        outcome = call => outcome,
    };

    match outcome {
        Ok(Ok(())) => {
            info!("server handler completed");
            Ok(())
        }
        Ok(Err(e)) => {
            let err = handler_error(&definition.id, e);
            error!(error = %err, "server handler failed");
            Err(err)
        }
        Err(panic) => {
            let err = EngineError::HandlerFault {
                action_id: definition.id.clone(),
                message: format!("handler panicked: {}", panic_message(panic.as_ref())),
            };
            error!(error = %err, "server handler panicked");
            Err(err)
        }
    }
}

/// Map a handler's error to the failure reported to the host.
pub(crate) fn handler_error(action_id: &str, err: ActionError) -> EngineError {
    match err {
        ActionError::MissingCredential(e) => EngineError::MissingCredential {
            action_id: action_id.to_owned(),
            key: e.key().to_owned(),
            message: e.to_string(),
        },
        ActionError::Configuration(message) => EngineError::ConfigurationError {
            action_id: action_id.to_owned(),
            message,
        },
        ActionError::Fault(message) => EngineError::HandlerFault {
            action_id: action_id.to_owned(),
            message,
        },
        ActionError::Other(e) => EngineError::HandlerFault {
            action_id: action_id.to_owned(),
            message: format!("{e:#}"),
        },
    }
}

/// Run an author-supplied variable selector; a panic is a `HandlerFault`.
pub(crate) fn select_variable(
    action_id: &str,
    selector: &dyn VariableSelector,
    options: &Options,
) -> Result<Option<String>, EngineError> {
    catch_unwind(AssertUnwindSafe(|| selector.select(options))).map_err(|panic| {
        let err = EngineError::HandlerFault {
            action_id: action_id.to_owned(),
            message: format!("variable selector panicked: {}", panic_message(panic.as_ref())),
        };
        error!(error = %err, "variable selector panicked");
        err
    })
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
