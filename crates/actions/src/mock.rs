//! Mock handlers: test doubles for every handler trait.
//!
//! Each mock records the activations (or options) it was called with and
//! behaves as programmed at construction time.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::Value;

use crate::{
    ActionError, ActivationId, CapabilityContext, ChunkStream, ClientCode, ClientContext,
    ClientHandler, EmbedContext, EmbedHandler, LogEntry, LogStatus, Options, ServerHandler,
    StreamHandler,
};

/// Terminal behaviour of a mock server handler.
#[derive(Debug, Clone)]
pub enum MockBehaviour {
    /// Complete successfully.
    Succeed,
    /// Return `ActionError::Fault`.
    Fail(String),
    /// Panic with the given message.
    Panic(String),
    /// Read the given credential key and fail if it is missing.
    ReadCredential(String),
}

/// A mock server handler.
///
/// Applies its variable writes and log entries in order, then behaves as
/// programmed. A failing mock keeps the writes it made before failing.
pub struct MockServerHandler {
    pub name: String,
    pub behaviour: MockBehaviour,
    pub writes: Vec<(String, Value)>,
    pub logs: Vec<(LogStatus, String)>,
    /// Activations seen by this handler (in call order).
    pub calls: Arc<Mutex<Vec<ActivationId>>>,
}

impl MockServerHandler {
    fn with_behaviour(name: impl Into<String>, behaviour: MockBehaviour) -> Self {
        Self {
            name: name.into(),
            behaviour,
            writes: Vec::new(),
            logs: Vec::new(),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn succeeding(name: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::Succeed)
    }

    pub fn failing(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::Fail(msg.into()))
    }

    pub fn panicking(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::Panic(msg.into()))
    }

    pub fn reading_credential(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::ReadCredential(key.into()))
    }

    pub fn with_write(mut self, variable_id: impl Into<String>, value: Value) -> Self {
        self.writes.push((variable_id.into(), value));
        self
    }

    pub fn with_log(mut self, status: LogStatus, description: impl Into<String>) -> Self {
        self.logs.push((status, description.into()));
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ServerHandler for MockServerHandler {
    async fn run(&self, ctx: &CapabilityContext) -> Result<(), ActionError> {
        self.calls.lock().unwrap().push(ctx.activation_id);

        for (variable_id, value) in &self.writes {
            ctx.variables.set(variable_id, value.clone()).await;
        }
        for (status, description) in &self.logs {
            ctx.logs.append(LogEntry::new(*status, description.clone()));
        }

        match &self.behaviour {
            MockBehaviour::Succeed => Ok(()),
            MockBehaviour::Fail(msg) => Err(ActionError::fault(msg.clone())),
            MockBehaviour::Panic(msg) => panic!("{}", msg),
            MockBehaviour::ReadCredential(key) => {
                let secret = ctx.credentials.get(key)?;
                ctx.logs.info(format!("{} authenticated ({} chars)", self.name, secret.len()));
                Ok(())
            }
        }
    }
}

/// A mock streaming handler emitting a fixed list of chunks.
pub struct MockStreamHandler {
    pub chunks: Vec<String>,
    /// Error emitted after all chunks, if any.
    pub fail_with: Option<String>,
    /// Panic inside the stream after all chunks, if any.
    pub panic_with: Option<String>,
    /// Never terminate after the chunks (for cancellation tests).
    pub hang: bool,
    /// Fail before producing a stream at all.
    pub refuse: Option<String>,
    pub calls: Arc<Mutex<Vec<ActivationId>>>,
}

impl MockStreamHandler {
    pub fn emitting<S: Into<String>>(chunks: impl IntoIterator<Item = S>) -> Self {
        Self {
            chunks: chunks.into_iter().map(Into::into).collect(),
            fail_with: None,
            panic_with: None,
            hang: false,
            refuse: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn then_fail(mut self, msg: impl Into<String>) -> Self {
        self.fail_with = Some(msg.into());
        self
    }

    pub fn then_panic(mut self, msg: impl Into<String>) -> Self {
        self.panic_with = Some(msg.into());
        self
    }

    pub fn then_hang(mut self) -> Self {
        self.hang = true;
        self
    }

    pub fn refusing(msg: impl Into<String>) -> Self {
        let mut mock = Self::emitting(Vec::<String>::new());
        mock.refuse = Some(msg.into());
        mock
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl StreamHandler for MockStreamHandler {
    async fn stream(&self, ctx: &CapabilityContext) -> Result<ChunkStream, ActionError> {
        self.calls.lock().unwrap().push(ctx.activation_id);

        if let Some(msg) = &self.refuse {
            return Err(ActionError::fault(msg.clone()));
        }

        let mut out: ChunkStream = stream::iter(self.chunks.clone().into_iter().map(Ok)).boxed();

        if let Some(msg) = self.fail_with.clone() {
            out = out.chain(stream::once(async move { Err(ActionError::fault(msg)) })).boxed();
        }
        if let Some(msg) = self.panic_with.clone() {
            out = out.chain(stream::once(async move { explode(msg) })).boxed();
        }
        if self.hang {
            out = out.chain(stream::pending()).boxed();
        }

        Ok(out)
    }
}

fn explode(msg: String) -> Result<String, ActionError> {
    panic!("{}", msg)
}

/// A mock client handler returning fixed code, or failing.
pub struct MockClientHandler {
    pub code: Result<ClientCode, String>,
    /// Options seen by this handler (in call order).
    pub calls: Arc<Mutex<Vec<Options>>>,
}

impl MockClientHandler {
    pub fn returning(code: ClientCode) -> Self {
        Self {
            code: Ok(code),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing(msg: impl Into<String>) -> Self {
        Self {
            code: Err(msg.into()),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl ClientHandler for MockClientHandler {
    fn generate(&self, ctx: &ClientContext) -> Result<ClientCode, ActionError> {
        self.calls.lock().unwrap().push(ctx.options.clone());
        self.code.clone().map_err(ActionError::Fault)
    }
}

/// A mock embed initializer that requires one string option.
///
/// The option value is bound as `url` next to the mount point as `mount`.
pub struct MockEmbedHandler {
    pub required_option: String,
    pub content: String,
    pub calls: Arc<Mutex<Vec<Options>>>,
}

impl MockEmbedHandler {
    pub fn requiring(option_key: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            required_option: option_key.into(),
            content: content.into(),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl EmbedHandler for MockEmbedHandler {
    fn init(&self, ctx: &EmbedContext) -> Result<ClientCode, ActionError> {
        self.calls.lock().unwrap().push(ctx.options.clone());
        let url = ctx.options.require_str(&self.required_option)?;
        Ok(ClientCode::new(self.content.clone())
            .arg("url", url)
            .arg("mount", ctx.mount.as_str()))
    }
}
