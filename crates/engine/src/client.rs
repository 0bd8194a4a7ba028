//! Client code generation.
//!
//! The engine only generates `{args, content}`; it never parses, sandboxes or
//! runs `content`. That belongs to the client runtime.

use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::{error, info, instrument, warn};

use actions::{ClientCode, ClientContext, ClientHandler, ClientPayload};

use crate::models::ActionDefinition;
use crate::server::{handler_error, panic_message};
use crate::EngineError;

/// Run a client handler and validate its payload.
///
/// # Errors
/// - [`EngineError::InvalidClientPayload`] if any arg is undefined.
/// - [`EngineError::ConfigurationError`] if the handler rejected its options.
/// - [`EngineError::HandlerFault`] for any other handler error or a panic.
#[instrument(skip_all, fields(action_id = %definition.id))]
pub fn generate(
    definition: &ActionDefinition,
    handler: &dyn ClientHandler,
    ctx: &ClientContext,
) -> Result<ClientPayload, EngineError> {
    let code = match catch_unwind(AssertUnwindSafe(|| handler.generate(ctx))) {
        Ok(Ok(code)) => code,
        Ok(Err(e)) => {
            let err = handler_error(&definition.id, e);
            error!(error = %err, "client handler failed");
            return Err(err);
        }
        Err(panic) => {
            let err = EngineError::HandlerFault {
                action_id: definition.id.clone(),
                message: format!("handler panicked: {}", panic_message(panic.as_ref())),
            };
            error!(error = %err, "client handler panicked");
            return Err(err);
        }
    };

    let payload = validate_payload(&definition.id, code)?;
    info!(args = payload.args.len(), "client payload generated");
    Ok(payload)
}

/// Reject undefined args; never coerce them.
pub fn validate_payload(action_id: &str, code: ClientCode) -> Result<ClientPayload, EngineError> {
    ClientPayload::try_from(code).map_err(|undefined| {
        warn!(action_id, keys = ?undefined.keys, "client payload has undefined args");
        EngineError::InvalidClientPayload {
            action_id: action_id.to_owned(),
            keys: undefined.keys,
        }
    })
}
