//! Server executor for streaming handlers.
//!
//! Chunks are forwarded to the host in the order they are produced. When
//! the selector resolved a stream variable, the chunks are also mirrored
//! into a buffer and written to that variable once, after the stream ends
//! normally. Faults and cancellation never write the variable.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::stream::{self, BoxStream, Stream};
use futures::{FutureExt, StreamExt};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use actions::{ActionError, ActivationId, CapabilityContext, Variables};

use crate::models::{ActionDefinition, ServerStreamSpec};
use crate::server::{handler_error, panic_message, select_variable};
use crate::EngineError;

/// Single-pass sequence of text chunks produced by one activation.
///
/// Ends normally, with exactly one terminal error item, or silently once the
/// activation is cancelled. Cannot be replayed.
pub struct StreamHandle {
    activation_id: ActivationId,
    variable: Option<String>,
    inner: BoxStream<'static, Result<String, EngineError>>,
}

impl StreamHandle {
    pub fn activation_id(&self) -> ActivationId {
        self.activation_id
    }

    /// Variable that receives the concatenated text, if one was selected.
    pub fn variable(&self) -> Option<&str> {
        self.variable.as_deref()
    }

    /// Drain the stream into one string, for hosts that do not render live.
    pub async fn collect_text(mut self) -> Result<String, EngineError> {
        let mut text = String::new();
        while let Some(chunk) = self.next().await {
            text.push_str(&chunk?);
        }
        Ok(text)
    }
}

impl Stream for StreamHandle {
    type Item = Result<String, EngineError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandle")
            .field("activation_id", &self.activation_id)
            .field("variable", &self.variable)
            .finish_non_exhaustive()
    }
}

type CaughtChunks = BoxStream<'static, std::thread::Result<Result<String, ActionError>>>;

struct Mirror {
    action_id: String,
    chunks: CaughtChunks,
    buffer: String,
    variable: Option<String>,
    variables: Variables,
    cancellation: CancellationToken,
    emitted: usize,
    done: bool,
}

impl Mirror {
    async fn step(mut self) -> Option<(Result<String, EngineError>, Self)> {
        if self.done {
            return None;
        }

        let next = tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => {
                info!(emitted = self.emitted, "stream cancelled, variable left untouched");
                return None;
            }
            next = self.chunks.next() => next,
        };

        match next {
            Some(Ok(Ok(chunk))) => {
                if self.variable.is_some() {
                    self.buffer.push_str(&chunk);
                }
                self.emitted += 1;
                Some((Ok(chunk), self))
            }
            Some(Ok(Err(e))) => {
                let message = match handler_error(&self.action_id, e) {
                    EngineError::HandlerFault { message, .. } => message,
                    other => other.to_string(),
                };
                Some(self.fault(message))
            }
            Some(Err(panic)) => {
                let message = format!("handler panicked: {}", panic_message(panic.as_ref()));
                Some(self.fault(message))
            }
            None => {
                if let Some(variable_id) = self.variable.take() {
                    let text = std::mem::take(&mut self.buffer);
                    self.variables.set(&variable_id, Value::String(text)).await;
                    info!(
                        variable_id = %variable_id,
                        chunks = self.emitted,
                        "stream completed, variable written"
                    );
                } else {
                    info!(chunks = self.emitted, "stream completed");
                }
                None
            }
        }
    }

    fn fault(mut self, message: String) -> (Result<String, EngineError>, Self) {
        error!(emitted = self.emitted, error = %message, "stream failed");
        self.done = true;
        self.buffer.clear();
        let err = EngineError::StreamFault {
            action_id: self.action_id.clone(),
            message,
        };
        (Err(err), self)
    }
}

/// Resolve the stream variable, start the streaming handler, and wrap its
/// output in a [`StreamHandle`].
///
/// # Errors
/// Failures raised before the handler produced a stream map as for plain
/// server handlers (`HandlerFault`, `MissingCredential`, ...). Failures
/// inside the stream surface as a terminal `StreamFault` item instead.
#[instrument(skip_all, fields(action_id = %definition.id, activation_id = %ctx.activation_id))]
pub async fn run_stream(
    definition: &ActionDefinition,
    spec: &ServerStreamSpec,
    ctx: CapabilityContext,
) -> Result<StreamHandle, EngineError> {
    let variable = select_variable(&definition.id, spec.stream_variable.as_ref(), &ctx.options)?;
    info!(variable_id = ?variable, "starting stream");

    let call = AssertUnwindSafe(spec.handler.stream(&ctx)).catch_unwind();
    let chunks = tokio::select! {
        biased;
        _ = ctx.cancellation.cancelled() => {
            return Err(EngineError::Cancelled { activation_id: ctx.activation_id });
        }
        outcome = call => match outcome {
            Ok(Ok(chunks)) => chunks,
            Ok(Err(e)) => {
                let err = handler_error(&definition.id, e);
                error!(error = %err, "stream handler failed before streaming");
                return Err(err);
            }
            Err(panic) => {
                let err = EngineError::HandlerFault {
                    action_id: definition.id.clone(),
                    message: format!("handler panicked: {}", panic_message(panic.as_ref())),
                };
                error!(error = %err, "stream handler panicked before streaming");
                return Err(err);
            }
        },
    };

    let mirror = Mirror {
        action_id: definition.id.clone(),
        chunks: AssertUnwindSafe(chunks).catch_unwind().boxed(),
        buffer: String::new(),
        variable: variable.clone(),
        variables: ctx.variables.clone(),
        cancellation: ctx.cancellation.clone(),
        emitted: 0,
        done: false,
    };

    Ok(StreamHandle {
        activation_id: ctx.activation_id,
        variable,
        inner: stream::unfold(mirror, Mirror::step).fuse().boxed(),
    })
}
