//! Integration tests for the action activation engine.
//!
//! Handlers are the mocks from `actions::mock`; variables and logs live in
//! memory so every side effect can be asserted.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::StreamExt;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use actions::mock::{MockClientHandler, MockEmbedHandler, MockServerHandler, MockStreamHandler};
use actions::{
    ActionError, ActivationId, CapabilityContext, ClientCode, ClientContext, InMemoryVariables,
    LogStatus, MemoryLogSink, MountPoint, NoVariable, OptionVariable, ServerHandler,
};
use async_trait::async_trait;

use crate::{
    ActionDefinition, ActionExecutor, ActionManifest, ActivationRequest, CredentialRequirement,
    EngineConfig, EngineError, HandlerRegistry, OptionField, OptionSchema, Outcome, WaitForEvent,
};

struct Fixture {
    variables: Arc<InMemoryVariables>,
    logs: Arc<MemoryLogSink>,
}

impl Fixture {
    fn new() -> Self {
        Self {
            variables: Arc::new(InMemoryVariables::new()),
            logs: Arc::new(MemoryLogSink::new()),
        }
    }

    fn request(&self) -> ActivationRequest {
        ActivationRequest::new(self.variables.clone(), self.logs.clone())
    }
}

fn cal_com(save_variable_option: &str) -> ActionDefinition {
    ActionDefinition::builder("cal-com")
        .options(OptionSchema::new().field(OptionField::string(save_variable_option)))
        .client_embed(
            Arc::new(MockEmbedHandler::requiring("url", "Cal('init', { origin: url, mount })")),
            Some(WaitForEvent {
                save_variable: Arc::new(OptionVariable::new(save_variable_option)),
                parse: Arc::new(MockClientHandler::returning(
                    ClientCode::new("Cal('on', 'bookingSuccessful', (e) => resume(e.detail.date))")
                        .arg("event", "bookingSuccessful"),
                )),
            }),
        )
        .build()
        .expect("valid definition")
}

// ============================================================
// Definition shape
// ============================================================

#[test]
fn definition_requires_exactly_one_variant() {
    let none = ActionDefinition::builder("empty").build();
    assert!(matches!(none, Err(EngineError::InvalidDefinition { .. })));

    let two = ActionDefinition::builder("both")
        .server(Arc::new(MockServerHandler::succeeding("s")))
        .client(Arc::new(MockClientHandler::returning(ClientCode::new(""))))
        .build();
    assert!(matches!(two, Err(EngineError::InvalidDefinition { .. })));
}

// ============================================================
// Dispatch preconditions
// ============================================================

#[tokio::test]
async fn cancelled_before_dispatch_never_calls_the_handler() {
    let fx = Fixture::new();
    let handler = Arc::new(MockServerHandler::succeeding("noop"));
    let def = ActionDefinition::builder("noop").server(handler.clone()).build().unwrap();

    let token = CancellationToken::new();
    token.cancel();
    let result = ActionExecutor::default()
        .activate(&def, fx.request().with_cancellation(token))
        .await;

    assert!(matches!(result, Err(EngineError::Cancelled { .. })));
    assert_eq!(handler.call_count(), 0);
}

#[tokio::test]
async fn invalid_options_are_rejected_before_the_handler_runs() {
    let fx = Fixture::new();
    let handler = Arc::new(MockServerHandler::succeeding("http"));
    let def = ActionDefinition::builder("http")
        .options(OptionSchema::new().field(OptionField::string("url").required()))
        .server(handler.clone())
        .build()
        .unwrap();

    let err = ActionExecutor::default()
        .activate(&def, fx.request().with_option("url", 42))
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::InvalidOptions { .. }));
    assert_eq!(handler.call_count(), 0);
}

// ============================================================
// Server
// ============================================================

/// Reads its options the way an author would and records a result.
struct Completion;

#[async_trait]
impl ServerHandler for Completion {
    async fn run(&self, ctx: &CapabilityContext) -> Result<(), ActionError> {
        let key = ctx.credentials.get("apiKey")?;
        let model = ctx.options.require_str("model")?;
        ctx.variables
            .set("v_model", json!(format!("{model}:{}", key.len())))
            .await;
        ctx.logs.success("completion stored");
        Ok(())
    }
}

fn completion() -> ActionDefinition {
    ActionDefinition::builder("openai")
        .options(OptionSchema::new().field(OptionField::string("model").with_default("gpt-4o")))
        .credentials(CredentialRequirement {
            credential_type: "openai".into(),
            keys: vec!["apiKey".into()],
        })
        .server(Arc::new(Completion))
        .build()
        .unwrap()
}

#[tokio::test]
async fn server_run_sees_credentials_defaults_and_logs() {
    let fx = Fixture::new();
    let request = fx
        .request()
        .with_credentials(BTreeMap::from([("apiKey".to_string(), "sk-123".to_string())]));

    let outcome = ActionExecutor::default().activate(&completion(), request).await.unwrap();

    assert!(matches!(outcome, Outcome::Completed));
    assert_eq!(fx.variables.value("v_model"), Some(json!("gpt-4o:6")));
    let entries = fx.logs.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, LogStatus::Success);
}

#[tokio::test]
async fn unresolved_credential_fails_on_read() {
    let fx = Fixture::new();
    let err = ActionExecutor::default()
        .activate(&completion(), fx.request())
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::MissingCredential { ref key, .. } if key == "apiKey"));
    assert_eq!(fx.variables.write_count(), 0);
}

#[tokio::test]
async fn failing_server_handler_is_one_fault_and_keeps_prior_writes() {
    let fx = Fixture::new();
    let handler = Arc::new(
        MockServerHandler::failing("sheets", "row parser crashed").with_write("var_rows", json!(3)),
    );
    let def = ActionDefinition::builder("sheets").server(handler.clone()).build().unwrap();

    let err = ActionExecutor::default().activate(&def, fx.request()).await.unwrap_err();

    assert!(matches!(
        err,
        EngineError::HandlerFault { ref message, .. } if message == "row parser crashed"
    ));
    assert_eq!(fx.variables.writes(), vec![("var_rows".to_string(), json!(3))]);
    assert_eq!(handler.call_count(), 1);
}

// ============================================================
// Server stream
// ============================================================

fn chat(handler: MockStreamHandler) -> ActionDefinition {
    ActionDefinition::builder("chat")
        .server_stream(Arc::new(OptionVariable::new("responseMapping")), Arc::new(handler))
        .build()
        .unwrap()
}

#[tokio::test]
async fn stream_is_forwarded_and_mirrored_into_the_variable() {
    let fx = Fixture::new();
    let def = chat(MockStreamHandler::emitting(["The ", "answer ", "is 42"]));

    let outcome = ActionExecutor::default()
        .activate(&def, fx.request().with_option("responseMapping", "v_answer"))
        .await
        .unwrap();
    let Outcome::Stream(handle) = outcome else {
        panic!("expected a stream, got {}", outcome.kind());
    };

    let chunks: Vec<String> = handle.map(|chunk| chunk.unwrap()).collect().await;
    assert_eq!(chunks, vec!["The ", "answer ", "is 42"]);
    assert_eq!(fx.variables.writes(), vec![("v_answer".to_string(), json!("The answer is 42"))]);
}

#[tokio::test]
async fn stream_without_variable_is_forwarded_but_not_written() {
    let fx = Fixture::new();
    let def = ActionDefinition::builder("chat")
        .server_stream(Arc::new(NoVariable), Arc::new(MockStreamHandler::emitting(["a", "b", "c"])))
        .build()
        .unwrap();

    let outcome = ActionExecutor::default().activate(&def, fx.request()).await.unwrap();
    let Outcome::Stream(handle) = outcome else {
        panic!("expected a stream");
    };

    assert_eq!(handle.collect_text().await.unwrap(), "abc");
    assert_eq!(fx.variables.write_count(), 0);
}

#[tokio::test]
async fn cancelling_mid_stream_ends_it_without_a_write() {
    let fx = Fixture::new();
    let token = CancellationToken::new();
    let def = chat(MockStreamHandler::emitting(["partial"]).then_hang());

    let Outcome::Stream(mut handle) = ActionExecutor::default()
        .activate(
            &def,
            fx.request()
                .with_option("responseMapping", "v_answer")
                .with_cancellation(token.clone()),
        )
        .await
        .unwrap()
    else {
        panic!("expected a stream");
    };

    assert_eq!(handle.next().await.unwrap().unwrap(), "partial");
    token.cancel();
    assert!(handle.next().await.is_none());
    assert_eq!(fx.variables.write_count(), 0);
}

// ============================================================
// Client
// ============================================================

#[tokio::test]
async fn client_run_returns_payload_and_touches_nothing_server_side() {
    let fx = Fixture::new();
    let handler = Arc::new(MockClientHandler::returning(
        ClientCode::new("window.open(url, '_blank')").arg("url", "https://typebot.io"),
    ));
    let def = ActionDefinition::builder("redirect").client(handler.clone()).build().unwrap();

    let outcome = ActionExecutor::default().activate(&def, fx.request()).await.unwrap();
    let Outcome::Client(payload) = outcome else {
        panic!("expected a client payload");
    };

    assert_eq!(payload.content, "window.open(url, '_blank')");
    assert_eq!(payload.args["url"], json!("https://typebot.io"));
    assert_eq!(handler.call_count(), 1);
    assert_eq!(fx.variables.write_count(), 0);
    assert!(fx.logs.is_empty());
}

#[tokio::test]
async fn client_payload_with_undefined_arg_is_invalid() {
    let fx = Fixture::new();
    let def = ActionDefinition::builder("script")
        .client(Arc::new(MockClientHandler::returning(
            ClientCode::new("run(a, b)").arg("a", Value::Null).maybe_arg("b", None),
        )))
        .build()
        .unwrap();

    let err = ActionExecutor::default().activate(&def, fx.request()).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidClientPayload { ref keys, .. } if keys == &vec!["b".to_string()]
    ));
}

// ============================================================
// Client embed
// ============================================================

#[tokio::test]
async fn embed_without_wait_produces_only_the_init_payload() {
    let fx = Fixture::new();
    let init = Arc::new(MockEmbedHandler::requiring("url", "Widget.mount(url, mount)"));
    let def = ActionDefinition::builder("widget")
        .client_embed(init.clone(), None)
        .build()
        .unwrap();
    let executor = ActionExecutor::default();

    let Outcome::Embed(activation) = executor
        .activate(
            &def,
            fx.request()
                .with_option("url", "https://widget.example")
                .with_mount(MountPoint::new("bubble-embed")),
        )
        .await
        .unwrap()
    else {
        panic!("expected an embed");
    };

    assert!(activation.wait.is_none());
    assert_eq!(activation.init.args["mount"], json!("bubble-embed"));
    assert_eq!(init.call_count(), 1);
    assert_eq!(executor.embeds().pending_count(), 0);
    assert!(executor.wait_plan(&def, Default::default()).unwrap().is_none());
}

#[tokio::test]
async fn embed_event_resumes_the_flow_exactly_once() {
    let fx = Fixture::new();
    let def = cal_com("saveVariableId");
    let executor = ActionExecutor::default();
    let activation_id = ActivationId::new();

    let Outcome::Embed(activation) = executor
        .activate(
            &def,
            fx.request()
                .with_activation_id(activation_id)
                .with_option("url", "https://cal.com/me")
                .with_option("saveVariableId", "var_1"),
        )
        .await
        .unwrap()
    else {
        panic!("expected an embed");
    };
    let pending = activation.wait.expect("wait_for_event is declared");
    assert_eq!(pending.wait.save_variable.as_deref(), Some("var_1"));
    assert_eq!(pending.wait.payload.args["event"], json!("bookingSuccessful"));

    let resume = executor.resume(activation_id, json!("2024-01-01")).await.unwrap();
    assert_eq!(resume.variable.as_deref(), Some("var_1"));
    assert_eq!(fx.variables.value("var_1"), Some(json!("2024-01-01")));
    assert_eq!(pending.resumed().await, Some(resume));

    let again = executor.resume(activation_id, json!("2024-01-01")).await;
    assert!(matches!(again, Err(EngineError::NotAwaitingEvent { .. })));
    assert_eq!(fx.variables.write_count(), 1);
}

#[tokio::test]
async fn wait_payload_is_producible_without_init() {
    let def = cal_com("saveVariableId");
    let executor = ActionExecutor::default();

    // No `url`: Init would be rejected, the wait payload is not.
    let plan = executor
        .wait_plan(
            &def,
            serde_json::Map::from_iter([("saveVariableId".to_string(), json!("var_2"))]),
        )
        .unwrap()
        .expect("wait_for_event is declared");

    assert_eq!(plan.save_variable.as_deref(), Some("var_2"));
    assert_eq!(executor.embeds().pending_count(), 0);
}

#[tokio::test]
async fn embed_init_without_required_option_is_a_configuration_error() {
    let fx = Fixture::new();
    let executor = ActionExecutor::default();

    let err = executor
        .activate(&cal_com("saveVariableId"), fx.request())
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::ConfigurationError { .. }));
    assert_eq!(executor.embeds().pending_count(), 0);
}

/// Stand-in for the client runtime: evaluates the wait payload against the
/// widget's event by reading the field the payload names.
fn client_runtime_extract(payload: &actions::ClientPayload, event: &Value) -> Value {
    let field = payload.args["field"].as_str().expect("payload names the event field");
    event[field].clone()
}

#[tokio::test]
async fn booking_event_date_is_extracted_client_side_and_stored() {
    let fx = Fixture::new();
    let executor = ActionExecutor::default();
    let activation_id = ActivationId::new();
    let def = ActionDefinition::builder("cal-com")
        .client_embed(
            Arc::new(MockEmbedHandler::requiring("url", "Cal('init', { origin: url, mount })")),
            Some(WaitForEvent {
                save_variable: Arc::new(OptionVariable::new("saveVariableId")),
                parse: Arc::new(MockClientHandler::returning(
                    ClientCode::new("Cal('on', 'bookingSuccessful', (e) => resume(e[field]))")
                        .arg("field", "date"),
                )),
            }),
        )
        .build()
        .unwrap();

    let Outcome::Embed(activation) = executor
        .activate(
            &def,
            fx.request()
                .with_activation_id(activation_id)
                .with_option("url", "https://cal.com/me")
                .with_option("saveVariableId", "var_1"),
        )
        .await
        .unwrap()
    else {
        panic!("expected an embed");
    };
    let pending = activation.wait.expect("wait_for_event is declared");

    // The engine stores what the client code resumes with; extraction of
    // `date` from the event object happens in the generated code.
    let event = json!({ "date": "2024-01-01", "attendee": "ada@example.com" });
    let data = client_runtime_extract(&pending.wait.payload, &event);
    executor.resume(activation_id, data).await.unwrap();

    assert_eq!(fx.variables.value("var_1"), Some(json!("2024-01-01")));
    assert_eq!(pending.resumed().await.map(|r| r.data), Some(json!("2024-01-01")));
    assert!(executor.resume(activation_id, event).await.is_err());
    assert_eq!(fx.variables.write_count(), 1);
}

#[tokio::test]
async fn embed_with_required_url_schema_reports_configuration_error() {
    let fx = Fixture::new();
    let init = Arc::new(MockEmbedHandler::requiring("url", "Widget.mount(url, mount)"));
    let def = ActionDefinition::builder("widget")
        .options(OptionSchema::new().field(OptionField::string("url").required()))
        .client_embed(init.clone(), None)
        .build()
        .unwrap();
    let executor = ActionExecutor::default();

    let err = executor.activate(&def, fx.request()).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::ConfigurationError { ref message, .. } if message.contains("url")
    ));
    assert_eq!(init.call_count(), 0);

    let wait_err = executor
        .wait_plan(&cal_com_requiring_url(), serde_json::Map::new())
        .unwrap_err();
    assert!(matches!(wait_err, EngineError::ConfigurationError { .. }));
}

fn cal_com_requiring_url() -> ActionDefinition {
    let base = cal_com("saveVariableId");
    ActionDefinition {
        options: OptionSchema::new().field(OptionField::string("url").required()),
        ..base
    }
}

#[tokio::test]
async fn cancelled_activation_does_not_resume_or_write() {
    let fx = Fixture::new();
    let executor = ActionExecutor::default();
    let activation_id = ActivationId::new();
    let token = CancellationToken::new();

    let Outcome::Embed(activation) = executor
        .activate(
            &cal_com("saveVariableId"),
            fx.request()
                .with_activation_id(activation_id)
                .with_cancellation(token.clone())
                .with_option("url", "https://cal.com/me")
                .with_option("saveVariableId", "var_1"),
        )
        .await
        .unwrap()
    else {
        panic!("expected an embed");
    };

    token.cancel();
    drop(activation);
    assert_eq!(executor.embeds().pending_count(), 0);

    let late = executor.resume(activation_id, json!("2024-01-01")).await;
    assert!(matches!(late, Err(EngineError::NotAwaitingEvent { .. })));
    assert_eq!(fx.variables.write_count(), 0);
}

#[tokio::test]
async fn dropped_waits_do_not_exhaust_capacity() {
    let fx = Fixture::new();
    let executor = ActionExecutor::new(EngineConfig {
        max_pending_resumes: 1,
        ..EngineConfig::default()
    });
    let def = cal_com("saveVariableId");

    for url in ["https://cal.com/a", "https://cal.com/b", "https://cal.com/c"] {
        let outcome = executor
            .activate(&def, fx.request().with_option("url", url))
            .await
            .expect("abandoned waits are reclaimed");
        drop(outcome);
    }
}

#[tokio::test]
async fn panicking_stream_selector_is_caught_at_activate() {
    let fx = Fixture::new();
    let def = ActionDefinition::builder("chat")
        .server_stream(
            Arc::new(|_: &actions::Options| -> Option<String> { panic!("mapping lookup failed") }),
            Arc::new(MockStreamHandler::emitting(["x"])),
        )
        .build()
        .unwrap();

    let err = ActionExecutor::default().activate(&def, fx.request()).await.unwrap_err();
    assert!(matches!(err, EngineError::HandlerFault { .. }));
}

#[tokio::test]
async fn cancelled_wait_cannot_be_resumed() {
    let fx = Fixture::new();
    let executor = ActionExecutor::default();
    let activation_id = ActivationId::new();

    let Outcome::Embed(activation) = executor
        .activate(
            &cal_com("saveVariableId"),
            fx.request()
                .with_activation_id(activation_id)
                .with_option("url", "https://cal.com/me"),
        )
        .await
        .unwrap()
    else {
        panic!("expected an embed");
    };

    assert!(executor.cancel_wait(activation_id));
    assert!(activation.wait.unwrap().resumed().await.is_none());
    assert!(executor.resume(activation_id, json!({})).await.is_err());
    assert_eq!(fx.variables.write_count(), 0);
}

#[tokio::test]
async fn pending_waits_are_capped_by_config() {
    let fx = Fixture::new();
    let executor = ActionExecutor::new(EngineConfig {
        max_pending_resumes: 1,
        ..EngineConfig::default()
    });
    let def = cal_com("saveVariableId");

    executor
        .activate(&def, fx.request().with_option("url", "https://cal.com/a"))
        .await
        .unwrap();
    let err = executor
        .activate(&def, fx.request().with_option("url", "https://cal.com/b"))
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::ResumeCapacityExceeded { limit: 1, .. }));
}

// ============================================================
// Manifest binding end to end
// ============================================================

#[tokio::test]
async fn manifest_bound_definition_activates() {
    let fx = Fixture::new();
    let mut registry = HandlerRegistry::new();
    registry.register_client(
        "redirect",
        Arc::new(|ctx: &ClientContext| -> Result<ClientCode, ActionError> {
            let url = ctx.options.require_str("url")?;
            Ok(ClientCode::new("window.location.href = url").arg("url", url))
        }),
    );

    let manifest: ActionManifest = serde_json::from_value(json!({
        "id": "redirect",
        "options": [{ "key": "url", "kind": "string", "required": true }],
        "run": { "client": { "handler": "redirect" } }
    }))
    .unwrap();
    let def = manifest.bind(&registry).unwrap();

    let Outcome::Client(payload) = ActionExecutor::default()
        .activate(&def, fx.request().with_option("url", "https://typebot.io"))
        .await
        .unwrap()
    else {
        panic!("expected a client payload");
    };
    assert_eq!(payload.args["url"], json!("https://typebot.io"));
}
