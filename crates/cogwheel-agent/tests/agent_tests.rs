//! Tests for cogwheel-agent: tool registry, streamed replies, tool rounds, and the planner loop

use chrono::Utc;
use cogwheel_agent::*;
use cogwheel_core::{BrainConfig, Modality, ReplConfig, Signal};
use cogwheel_llm::*;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// One scripted provider response.
enum Reply {
    Deltas(Vec<StreamDelta>),
    Fail(fn() -> LlmError),
    /// Emits one text fragment, then never finishes.
    Hang,
}

/// Replays scripted rounds and records every request it saw.
struct ScriptedProvider {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl ScriptedProvider {
    fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self { replies: Mutex::new(replies.into()), requests: Mutex::new(Vec::new()) })
    }

    fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn user_prompt(&self, index: usize) -> String {
        let requests = self.requests();
        requests[index].messages.last().and_then(|m| m.content.clone()).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn default_model(&self) -> &str {
        "scripted-1"
    }

    async fn complete_stream(&self, request: LlmRequest, _cancel: Option<CancellationToken>) -> LlmResult<LlmStream> {
        self.requests.lock().unwrap().push(request);
        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            Some(Reply::Deltas(deltas)) => {
                Ok(Box::pin(futures::stream::iter(deltas.into_iter().map(Ok).collect::<Vec<_>>())))
            }
            Some(Reply::Fail(make)) => Err(make()),
            Some(Reply::Hang) => Ok(Box::pin(async_stream::stream! {
                yield Ok(StreamDelta::Text("thinking".into()));
                futures::future::pending::<()>().await;
            })),
            None => Err(LlmError::InvalidResponse("no scripted reply left".into())),
        }
    }
}

fn text_reply(parts: &[&str], input: u32, output: u32) -> Reply {
    let mut deltas: Vec<StreamDelta> = parts.iter().map(|p| StreamDelta::Text(p.to_string())).collect();
    deltas.push(StreamDelta::Done {
        stop_reason: Some("stop".into()),
        usage: Some(Usage { input_tokens: input, output_tokens: output }),
    });
    Reply::Deltas(deltas)
}

fn tool_reply(id: &str, name: &str, arguments: &str) -> Reply {
    Reply::Deltas(vec![
        StreamDelta::ToolCallStart { id: id.into(), name: name.into() },
        StreamDelta::ToolCallDelta { id: id.into(), arguments: arguments.into() },
        StreamDelta::ToolCallEnd { id: id.into() },
        StreamDelta::Done {
            stop_reason: Some("tool_calls".into()),
            usage: Some(Usage { input_tokens: 4, output_tokens: 1 }),
        },
    ])
}

#[derive(Default)]
struct Recorder {
    deltas: Vec<String>,
    finished: Vec<Usage>,
}

impl ResponseObserver for Recorder {
    fn on_delta(&mut self, text: &str) {
        self.deltas.push(text.to_string());
    }

    fn on_finish(&mut self, usage: &Usage) {
        self.finished.push(*usage);
    }
}

struct Echo {
    calls: Arc<Mutex<Vec<Value>>>,
}

#[async_trait::async_trait]
impl Tool for Echo {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the input back"
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object", "properties": {"text": {"type": "string"}}})
    }

    async fn execute(&self, args: Value) -> ToolResult {
        self.calls.lock().unwrap().push(args.clone());
        ToolResult::text(args["text"].as_str().unwrap_or_default())
    }
}

struct Sleeper;

#[async_trait::async_trait]
impl Tool for Sleeper {
    fn name(&self) -> &str {
        "sleep"
    }

    fn description(&self) -> &str {
        "Sleep for a long time"
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object"})
    }

    async fn execute(&self, _args: Value) -> ToolResult {
        tokio::time::sleep(Duration::from_secs(60)).await;
        ToolResult::text("woke")
    }
}

fn echo_registry() -> (Arc<ToolRegistry>, Arc<Mutex<Vec<Value>>>) {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let mut registry = ToolRegistry::new();
    registry.register(Echo { calls: calls.clone() });
    (Arc::new(registry), calls)
}

fn signal(description: &str) -> Signal {
    Signal {
        source_event_id: "test".into(),
        signal_type: "entity_attention".into(),
        modality: Modality::Sighted,
        kind: "player".into(),
        description: description.into(),
        metadata: Value::Null,
        timestamp: Utc::now(),
    }
}

fn brain_config() -> BrainConfig {
    BrainConfig { system_prompt: "You are a test bot.".into(), max_signals: 3, max_retries: 2, retry_backoff_ms: 1 }
}

fn brain(provider: Arc<ScriptedProvider>) -> (Brain, mpsc::UnboundedSender<Signal>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let engine = cogwheel_repl::ReplEngine::new(ReplConfig::default()).unwrap();
    let agent = CognitiveAgent::new(provider);
    (Brain::new(agent, engine, rx, brain_config()), tx)
}

// ===========================================================================
// Tool registry
// ===========================================================================

#[tokio::test]
async fn registry_lists_in_name_order_and_reports_missing() {
    let (echo, _) = echo_registry();
    let mut registry = ToolRegistry::new();
    registry.register(Sleeper);
    registry.register(Echo { calls: Arc::new(Mutex::new(Vec::new())) });
    assert_eq!(registry.len(), 2);
    assert_eq!(registry.list(), vec!["echo", "sleep"]);

    let defs = registry.definitions();
    assert_eq!(defs[0].name, "echo");
    assert_eq!(defs[0].description, "Echo the input back");

    let missing = echo.execute_cancellable("nope", json!({}), CancellationToken::new()).await;
    assert_eq!(missing, ToolResult::error("Tool not found: nope"));
    assert_eq!(missing.to_content_string(), "Error: Tool not found: nope");
}

#[tokio::test]
async fn cancelled_tool_reports_error() {
    let mut registry = ToolRegistry::new();
    registry.register(Sleeper);
    let token = CancellationToken::new();
    token.cancel();
    let result = registry.execute_cancellable("sleep", json!({}), token).await;
    assert_eq!(result, ToolResult::error("cancelled"));
}

// ===========================================================================
// Replies
// ===========================================================================

#[tokio::test]
async fn deltas_reach_observer_in_order() {
    let provider = ScriptedProvider::new(vec![text_reply(&["look", "At(", "'Alex')"], 12, 5)]);
    let agent = CognitiveAgent::new(provider.clone());
    let mut recorder = Recorder::default();

    let completion = agent
        .respond(CompletionRequest::new(vec![LlmMessage::user("hi")]), &mut recorder, None)
        .await
        .unwrap();

    assert_eq!(recorder.deltas, vec!["look", "At(", "'Alex')"]);
    assert_eq!(completion.text, "lookAt('Alex')");
    assert_eq!(completion.stop_reason, StopReason::Complete);
    assert_eq!(completion.tool_rounds, 0);
    assert_eq!(recorder.finished, vec![Usage { input_tokens: 12, output_tokens: 5 }]);

    let requests = provider.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].model, "");
    assert!(requests[0].tools.is_none());
    assert!(!requests[0].json_response);
}

#[tokio::test]
async fn json_flag_and_model_are_forwarded() {
    let provider = ScriptedProvider::new(vec![text_reply(&["{}"], 1, 1)]);
    let agent = CognitiveAgent::new(provider.clone()).with_model("small");

    agent
        .respond(CompletionRequest::new(vec![LlmMessage::user("hi")]).json(true), &mut NullObserver, None)
        .await
        .unwrap();

    let requests = provider.requests();
    assert!(requests[0].json_response);
    assert_eq!(requests[0].model, "small");
}

#[tokio::test]
async fn length_finish_is_reported() {
    let provider = ScriptedProvider::new(vec![Reply::Deltas(vec![
        StreamDelta::Text("partial".into()),
        StreamDelta::Done { stop_reason: Some("length".into()), usage: None },
    ])]);
    let agent = CognitiveAgent::new(provider);
    let completion = agent
        .respond(CompletionRequest::new(vec![LlmMessage::user("hi")]), &mut NullObserver, None)
        .await
        .unwrap();
    assert_eq!(completion.stop_reason, StopReason::Length);
    assert_eq!(completion.usage, Usage::default());
}

#[tokio::test]
async fn transport_failure_is_wrapped() {
    let provider = ScriptedProvider::new(vec![Reply::Fail(|| LlmError::AuthFailed("bad key".into()))]);
    let agent = CognitiveAgent::new(provider);
    let mut recorder = Recorder::default();

    let err = agent
        .respond(CompletionRequest::new(vec![LlmMessage::user("hi")]), &mut recorder, None)
        .await
        .unwrap_err();

    assert!(matches!(err, AgentError::Model(LlmError::AuthFailed(_))));
    assert!(!err.is_retryable());
    assert!(std::error::Error::source(&err).is_some());
    assert!(recorder.finished.is_empty());
}

#[tokio::test]
async fn stream_ending_without_done_is_a_failure() {
    let provider = ScriptedProvider::new(vec![Reply::Deltas(vec![StreamDelta::Text("const half = mo".into())])]);
    let agent = CognitiveAgent::new(provider);
    let mut recorder = Recorder::default();

    let err = agent
        .respond(CompletionRequest::new(vec![LlmMessage::user("hi")]), &mut recorder, None)
        .await
        .unwrap_err();

    assert!(matches!(err, AgentError::Model(LlmError::StreamError(_))));
    assert!(err.is_retryable());
    // Forwarded text is not retracted, but no completion is reported.
    assert_eq!(recorder.deltas, vec!["const half = mo"]);
    assert!(recorder.finished.is_empty());
}

#[tokio::test]
async fn truncated_reply_is_retried_not_run() {
    let provider = ScriptedProvider::new(vec![
        Reply::Deltas(vec![StreamDelta::Text("const half = mo".into())]),
        text_reply(&["const whole = 6 * 7\nwhole"], 1, 1),
    ]);
    let (mut brain, tx) = brain(provider.clone());
    tx.send(signal("a")).unwrap();

    let turn = brain.step(None).await.unwrap().unwrap();
    assert_eq!(turn.result.unwrap().unwrap(), "42");
    assert_eq!(provider.requests().len(), 2);
    assert!(brain.engine_mut().globals().unwrap().iter().all(|name| name != "half"));
}

#[tokio::test]
async fn cancellation_interrupts_a_hanging_stream() {
    let provider = ScriptedProvider::new(vec![Reply::Hang]);
    let agent = CognitiveAgent::new(provider);
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let mut recorder = Recorder::default();
    let err = agent
        .respond(CompletionRequest::new(vec![LlmMessage::user("hi")]), &mut recorder, Some(token))
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(recorder.deltas, vec!["thinking"]);
    assert!(recorder.finished.is_empty());
}

// ===========================================================================
// Tool rounds
// ===========================================================================

#[tokio::test]
async fn tool_round_runs_and_feeds_result_back() {
    let provider = ScriptedProvider::new(vec![
        tool_reply("call_1", "echo", r#"{"text":"pong"}"#),
        text_reply(&["done"], 6, 2),
    ]);
    let (registry, calls) = echo_registry();
    let agent = CognitiveAgent::new(provider.clone());
    let mut recorder = Recorder::default();

    let completion = agent
        .respond(
            CompletionRequest::new(vec![LlmMessage::user("ping")]).with_tools(registry),
            &mut recorder,
            None,
        )
        .await
        .unwrap();

    assert_eq!(completion.text, "done");
    assert_eq!(completion.tool_rounds, 1);
    assert_eq!(completion.stop_reason, StopReason::Complete);
    assert_eq!(completion.usage, Usage { input_tokens: 10, output_tokens: 3 });
    assert_eq!(recorder.finished.len(), 1);
    assert_eq!(*calls.lock().unwrap(), vec![json!({"text": "pong"})]);

    let requests = provider.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].tools.as_ref().map(Vec::len), Some(1));
    let second = &requests[1].messages;
    assert_eq!(second.len(), 3);
    assert_eq!(second[1].role, "assistant");
    assert_eq!(second[1].tool_calls[0].name, "echo");
    assert_eq!(second[2].role, "tool");
    assert_eq!(second[2].tool_call_id.as_deref(), Some("call_1"));
    assert_eq!(second[2].content.as_deref(), Some("pong"));
}

#[tokio::test]
async fn bad_tool_arguments_become_tool_errors() {
    let provider = ScriptedProvider::new(vec![tool_reply("call_1", "echo", "{not json"), text_reply(&["ok"], 1, 1)]);
    let (registry, calls) = echo_registry();
    let agent = CognitiveAgent::new(provider.clone());

    agent
        .respond(CompletionRequest::new(vec![LlmMessage::user("x")]).with_tools(registry), &mut NullObserver, None)
        .await
        .unwrap();

    assert!(calls.lock().unwrap().is_empty());
    let tool_message = provider.requests()[1].messages[2].content.clone().unwrap_or_default();
    assert!(tool_message.starts_with("Error: invalid arguments"));
}

#[tokio::test]
async fn tool_rounds_stop_at_registry_size() {
    let provider = ScriptedProvider::new(vec![
        tool_reply("call_1", "echo", r#"{"text":"a"}"#),
        tool_reply("call_2", "echo", r#"{"text":"b"}"#),
        tool_reply("call_3", "echo", r#"{"text":"c"}"#),
    ]);
    let (registry, calls) = echo_registry();
    let agent = CognitiveAgent::new(provider.clone());

    let completion = agent
        .respond(CompletionRequest::new(vec![LlmMessage::user("loop")]).with_tools(registry), &mut NullObserver, None)
        .await
        .unwrap();

    assert_eq!(completion.stop_reason, StopReason::ToolRoundLimit);
    assert_eq!(completion.tool_rounds, 1);
    assert_eq!(calls.lock().unwrap().len(), 1);
    assert_eq!(provider.requests().len(), 2);
}

// ===========================================================================
// Prompt assembly
// ===========================================================================

#[test]
fn prompt_lists_signals_last_result_and_globals() {
    let signals = [signal("Player Alex is nearby")];
    let last = LastResult {
        script: "lookAt('Alex')".into(),
        output: "true".into(),
        failed: false,
        actions: vec!["lookAt".into()],
    };
    let messages = build_messages("sys", signals.iter(), Some(&last), &["home".to_string()]);

    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, "system");
    assert_eq!(messages[0].content.as_deref(), Some("sys"));
    let user = messages[1].content.clone().unwrap_or_default();
    assert!(user.starts_with("Recent signals:\n"));
    assert!(user.contains("sighted/entity_attention: Player Alex is nearby"));
    assert!(user.contains("Last script:\nlookAt('Alex')\nActions: lookAt\nResult: true"));
    assert!(user.ends_with("Persistent variables: home"));
}

#[test]
fn prompt_marks_failures_and_empty_windows() {
    let last = LastResult {
        script: "boom()".into(),
        output: "ReferenceError: boom is not defined".into(),
        failed: true,
        actions: Vec::new(),
    };
    let messages = build_messages("sys", std::iter::empty(), Some(&last), &[]);
    let user = messages[1].content.clone().unwrap_or_default();
    assert!(user.contains("(none)"));
    assert!(user.contains("It failed: ReferenceError: boom is not defined"));
    assert!(!user.contains("Persistent variables"));
}

#[test]
fn scripts_from_plain_fenced_and_json_replies() {
    assert_eq!(script_from_reply("lookAt('Alex')", false).as_deref(), Some("lookAt('Alex')"));
    assert_eq!(script_from_reply("```js\nskip()\n```", false).as_deref(), Some("skip()"));
    assert_eq!(script_from_reply("   ", false), None);

    assert_eq!(script_from_reply(r#"{"script": "skip()"}"#, true).as_deref(), Some("skip()"));
    assert_eq!(
        script_from_reply("Here you go:\n```json\n{\"code\": \"chat('hi')\"}\n```", true).as_deref(),
        Some("chat('hi')")
    );
    assert_eq!(script_from_reply(r#"note {"script": "a()"} end"#, true).as_deref(), Some("a()"));
    assert_eq!(script_from_reply(r#"{"thought": "nothing"}"#, true), None);
    assert_eq!(script_from_reply("not json", true), None);
}

// ===========================================================================
// Brain
// ===========================================================================

#[tokio::test]
async fn step_without_signals_does_nothing() {
    let provider = ScriptedProvider::new(vec![]);
    let (mut brain, _tx) = brain(provider.clone());
    assert!(brain.step(None).await.unwrap().is_none());
    assert!(provider.requests().is_empty());
}

#[tokio::test]
async fn step_runs_script_and_feeds_result_forward() {
    let provider = ScriptedProvider::new(vec![
        text_reply(&["```js\nconst seen = 40 + 2\nseen\n```"], 1, 1),
        text_reply(&["seen + 1"], 1, 1),
    ]);
    let (mut brain, tx) = brain(provider.clone());

    tx.send(signal("Player Alex is nearby")).unwrap();
    let turn = brain.step(None).await.unwrap().unwrap();
    assert_eq!(turn.new_signals, 1);
    assert_eq!(turn.script.as_deref(), Some("const seen = 40 + 2\nseen"));
    assert_eq!(turn.result.unwrap().unwrap(), "42");
    assert_eq!(
        brain.last_result(),
        Some(&LastResult {
            script: "const seen = 40 + 2\nseen".into(),
            output: "42".into(),
            failed: false,
            actions: Vec::new(),
        })
    );

    // No new signals means no new turn.
    assert!(brain.step(None).await.unwrap().is_none());

    tx.send(signal("Took 2 damage (fall)")).unwrap();
    let turn = brain.step(None).await.unwrap().unwrap();
    assert_eq!(turn.result.unwrap().unwrap(), "43");

    let prompt = provider.user_prompt(1);
    assert!(prompt.contains("Player Alex is nearby"));
    assert!(prompt.contains("Took 2 damage (fall)"));
    assert!(prompt.contains("Result: 42"));
    assert!(prompt.contains("Persistent variables: seen"));
}

#[tokio::test]
async fn failing_script_is_recorded_not_fatal() {
    let provider = ScriptedProvider::new(vec![text_reply(&["missing()"], 1, 1), text_reply(&["1"], 1, 1)]);
    let (mut brain, tx) = brain(provider.clone());

    tx.send(signal("a")).unwrap();
    let turn = brain.step(None).await.unwrap().unwrap();
    assert!(matches!(turn.result, Some(Err(cogwheel_repl::ReplError::Exception { .. }))));
    assert!(brain.last_result().unwrap().failed);

    tx.send(signal("b")).unwrap();
    brain.step(None).await.unwrap().unwrap();
    assert!(provider.user_prompt(1).contains("It failed: ReferenceError"));
}

#[tokio::test]
async fn signal_window_keeps_most_recent() {
    let provider = ScriptedProvider::new(vec![text_reply(&["seen = 1"], 1, 1)]);
    let (mut brain, tx) = brain(provider.clone());
    for i in 0..5 {
        tx.send(signal(&format!("event {}", i))).unwrap();
    }
    let turn = brain.step(None).await.unwrap().unwrap();
    assert_eq!(turn.new_signals, 5);

    let descriptions: Vec<String> = brain.recent_signals().map(|s| s.description.clone()).collect();
    assert_eq!(descriptions, vec!["event 2", "event 3", "event 4"]);
    let prompt = provider.user_prompt(0);
    assert!(!prompt.contains("event 1"));
    assert!(prompt.contains("event 4"));
}

#[tokio::test]
async fn reply_without_script_records_nothing() {
    let provider = ScriptedProvider::new(vec![text_reply(&["  "], 1, 1)]);
    let (mut brain, tx) = brain(provider);
    tx.send(signal("a")).unwrap();
    let turn = brain.step(None).await.unwrap().unwrap();
    assert!(turn.script.is_none());
    assert!(turn.result.is_none());
    assert!(brain.last_result().is_none());
}

#[tokio::test]
async fn retryable_failures_are_retried() {
    let provider = ScriptedProvider::new(vec![
        Reply::Fail(|| LlmError::RateLimited("slow down".into())),
        Reply::Fail(|| LlmError::StreamError("reset".into())),
        text_reply(&["7 * 6"], 1, 1),
    ]);
    let (mut brain, tx) = brain(provider.clone());
    tx.send(signal("a")).unwrap();

    let turn = brain.step(None).await.unwrap().unwrap();
    assert_eq!(turn.result.unwrap().unwrap(), "42");
    assert_eq!(provider.requests().len(), 3);
}

#[tokio::test]
async fn retries_are_bounded_and_fatal_errors_are_not_retried() {
    let provider = ScriptedProvider::new(vec![
        Reply::Fail(|| LlmError::RateLimited("1".into())),
        Reply::Fail(|| LlmError::RateLimited("2".into())),
        Reply::Fail(|| LlmError::RateLimited("3".into())),
    ]);
    let (mut brain, tx) = brain(provider.clone());
    tx.send(signal("a")).unwrap();
    let err = brain.step(None).await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(provider.requests().len(), 3);

    let provider = ScriptedProvider::new(vec![Reply::Fail(|| LlmError::AuthFailed("no".into()))]);
    let (mut brain, tx) = self::brain(provider.clone());
    tx.send(signal("a")).unwrap();
    let err = brain.step(None).await.unwrap_err();
    assert!(!err.is_retryable());
    assert_eq!(provider.requests().len(), 1);
}

#[tokio::test]
async fn run_stops_when_senders_are_gone() {
    let provider = ScriptedProvider::new(vec![text_reply(&["const ran = true"], 1, 1)]);
    let (mut brain, tx) = brain(provider.clone());
    tx.send(signal("a")).unwrap();
    drop(tx);

    brain.run(CancellationToken::new()).await.unwrap();
    assert_eq!(provider.requests().len(), 1);
    assert_eq!(brain.engine_mut().evaluate("ran").unwrap(), "true");
}

#[tokio::test]
async fn run_survives_exhausted_retries_and_stops_on_cancel() {
    let provider = ScriptedProvider::new(vec![
        Reply::Fail(|| LlmError::RateLimited("1".into())),
        Reply::Fail(|| LlmError::RateLimited("2".into())),
        Reply::Fail(|| LlmError::RateLimited("3".into())),
        text_reply(&["const second = 2"], 1, 1),
    ]);
    let (brain, tx) = brain(provider.clone());
    let token = CancellationToken::new();

    let handle = tokio::spawn({
        let token = token.clone();
        let mut brain = brain;
        async move {
            let outcome = brain.run(token).await;
            (brain, outcome)
        }
    });

    tx.send(signal("first")).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    tx.send(signal("second")).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    token.cancel();

    let (mut brain, outcome) = handle.await.unwrap();
    outcome.unwrap();
    assert_eq!(provider.requests().len(), 4);
    assert_eq!(brain.engine_mut().evaluate("second").unwrap(), "2");
}

#[tokio::test]
async fn run_returns_fatal_errors() {
    let provider = ScriptedProvider::new(vec![Reply::Fail(|| LlmError::AuthFailed("no".into()))]);
    let (mut brain, tx) = brain(provider);
    tx.send(signal("a")).unwrap();
    let err = brain.run(CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, BrainError::Agent(AgentError::Model(LlmError::AuthFailed(_)))));
}

#[tokio::test]
async fn idle_turn_can_skip() {
    let provider = ScriptedProvider::new(vec![text_reply(&["skip()"], 1, 1), text_reply(&["1"], 1, 1)]);
    let (mut brain, tx) = brain(provider.clone());
    tx.send(signal("nothing much")).unwrap();

    let turn = brain.step(None).await.unwrap().unwrap();
    assert!(turn.result.unwrap().is_ok());
    assert_eq!(turn.actions.len(), 1);
    assert!(turn.actions[0].is_skip());
    assert_eq!(brain.last_result().unwrap().actions, vec!["skip".to_string()]);

    tx.send(signal("still nothing")).unwrap();
    brain.step(None).await.unwrap();
    assert!(provider.user_prompt(1).contains("Actions: skip"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn step_runs_on_a_multi_thread_runtime() {
    let provider = ScriptedProvider::new(vec![text_reply(&["while (true) {}"], 1, 1)]);
    let (tx, rx) = mpsc::unbounded_channel();
    let engine = cogwheel_repl::ReplEngine::new(ReplConfig { timeout_ms: 30, ..ReplConfig::default() }).unwrap();
    let mut brain = Brain::new(CognitiveAgent::new(provider), engine, rx, brain_config());
    tx.send(signal("a")).unwrap();

    let ticker = tokio::spawn(async {
        tokio::time::sleep(Duration::from_millis(5)).await;
        true
    });
    let turn = brain.step(None).await.unwrap().unwrap();
    assert!(matches!(turn.result, Some(Err(cogwheel_repl::ReplError::Timeout { .. }))));
    assert!(brain.last_result().unwrap().failed);
    assert!(ticker.await.unwrap());
}
