//! Cognitive agent - one streamed model reply per call
//!
//! Text fragments reach the observer in arrival order. When tools are
//! supplied the agent runs tool rounds (request, execute, re-request) up to
//! the number of registered tools. Any model failure, cancellation included,
//! is returned as `AgentError::Model`; text already forwarded stays forwarded.
//! A provider stream that ends without `Done` counts as a failure.

use crate::tool::{ToolRegistry, ToolResult};
use cogwheel_core::ModelConfig;
use cogwheel_llm::{
    AccumulatedToolCall, CancellationToken, LlmError, LlmMessage, LlmProvider, LlmRequest, LlmStream,
    StreamDelta, ToolCall, Usage,
};
use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, info};

/// Receives a reply as it streams.
pub trait ResponseObserver: Send {
    fn on_delta(&mut self, text: &str);

    /// Called once per successful reply with usage summed over all rounds.
    fn on_finish(&mut self, _usage: &Usage) {}
}

/// Discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullObserver;

impl ResponseObserver for NullObserver {
    fn on_delta(&mut self, _text: &str) {}
}

#[derive(Clone, Default)]
pub struct CompletionRequest {
    pub messages: Vec<LlmMessage>,
    /// Ask the model for a single JSON object.
    pub json_response: bool,
    pub tools: Option<Arc<ToolRegistry>>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<LlmMessage>) -> Self {
        Self { messages, ..Default::default() }
    }

    pub fn json(mut self, json_response: bool) -> Self {
        self.json_response = json_response;
        self
    }

    pub fn with_tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = Some(tools);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StopReason {
    Complete,
    Length,
    /// The model kept asking for tools after the round budget was spent.
    ToolRoundLimit,
    Other(String),
}

impl StopReason {
    fn from_finish(reason: Option<&str>) -> Self {
        match reason {
            None | Some("stop") | Some("end_turn") | Some("tool_calls") => StopReason::Complete,
            Some("length") | Some("max_tokens") => StopReason::Length,
            Some(other) => StopReason::Other(other.to_string()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Completion {
    pub text: String,
    pub usage: Usage,
    pub stop_reason: StopReason,
    pub tool_rounds: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("model request failed: {0}")]
    Model(#[source] LlmError),
}

impl AgentError {
    pub fn is_retryable(&self) -> bool {
        match self {
            AgentError::Model(e) => e.is_retryable(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, AgentError::Model(LlmError::Cancelled))
    }
}

/// What one streamed round produced.
struct Round {
    text: String,
    tool_calls: Vec<AccumulatedToolCall>,
    finish: Option<String>,
    usage: Usage,
}

pub struct CognitiveAgent {
    provider: Arc<dyn LlmProvider>,
    model: String,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
}

impl CognitiveAgent {
    /// Uses the provider's default model.
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider, model: String::new(), max_tokens: None, temperature: None }
    }

    pub fn from_config(provider: Arc<dyn LlmProvider>, config: &ModelConfig) -> Self {
        Self {
            provider,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    pub async fn respond(
        &self,
        request: CompletionRequest,
        observer: &mut dyn ResponseObserver,
        cancel: Option<CancellationToken>,
    ) -> Result<Completion, AgentError> {
        let CompletionRequest { mut messages, json_response, tools } = request;
        let definitions = tools.as_ref().map(|t| t.definitions()).filter(|d| !d.is_empty());
        let round_budget = tools.as_ref().map(|t| t.len()).unwrap_or(0);

        let mut text = String::new();
        let mut usage = Usage::default();
        let mut tool_rounds = 0;

        let stop_reason = loop {
            let llm_request = LlmRequest {
                model: self.model.clone(),
                messages: messages.clone(),
                tools: definitions.clone(),
                max_tokens: self.max_tokens,
                temperature: self.temperature,
                json_response,
            };

            let stream = self
                .provider
                .complete_stream(llm_request, cancel.clone())
                .await
                .map_err(AgentError::Model)?;
            let round = consume(stream, observer, cancel.as_ref()).await.map_err(AgentError::Model)?;
            text.push_str(&round.text);
            usage.add(&round.usage);

            let registry = match &tools {
                Some(registry) if !round.tool_calls.is_empty() => registry,
                _ => break StopReason::from_finish(round.finish.as_deref()),
            };
            if tool_rounds >= round_budget {
                debug!(rounds = tool_rounds, "tool round budget spent");
                break StopReason::ToolRoundLimit;
            }
            tool_rounds += 1;

            let calls: Vec<ToolCall> = round.tool_calls.iter().cloned().map(ToolCall::from).collect();
            messages.push(LlmMessage::assistant_with_tools(round.text, calls));

            for call in round.tool_calls {
                let token = cancel.clone().unwrap_or_else(CancellationToken::new);
                let result = match call.parse_arguments() {
                    Ok(args) => registry.execute_cancellable(&call.name, args, token).await,
                    Err(e) => ToolResult::error(format!("invalid arguments: {}", e)),
                };
                debug!(tool = %call.name, is_error = result.is_error(), "tool executed");
                messages.push(LlmMessage::tool_result(call.id, result.to_content_string()));
            }

            if cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
                return Err(AgentError::Model(LlmError::Cancelled));
            }
        };

        observer.on_finish(&usage);
        info!(
            chars = text.len(),
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            tool_rounds,
            "reply complete"
        );
        Ok(Completion { text, usage, stop_reason, tool_rounds })
    }
}

async fn consume(
    stream: LlmStream,
    observer: &mut dyn ResponseObserver,
    cancel: Option<&CancellationToken>,
) -> Result<Round, LlmError> {
    let cancel = cancel.cloned().unwrap_or_else(CancellationToken::new);
    let mut round = Round { text: String::new(), tool_calls: Vec::new(), finish: None, usage: Usage::default() };
    tokio::pin!(stream);

    loop {
        let delta = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LlmError::Cancelled),
            delta = stream.next() => delta,
        };
        // A stream must finish with Done; ending early is a transport failure.
        let Some(delta) = delta else {
            return Err(LlmError::StreamError("stream ended before completion".into()));
        };

        match delta? {
            StreamDelta::Text(fragment) => {
                observer.on_delta(&fragment);
                round.text.push_str(&fragment);
            }
            StreamDelta::ToolCallStart { id, name } => {
                round.tool_calls.push(AccumulatedToolCall { id, name, arguments: String::new() });
            }
            StreamDelta::ToolCallDelta { id, arguments } => {
                if let Some(call) = round.tool_calls.iter_mut().find(|c| c.id == id) {
                    call.arguments.push_str(&arguments);
                }
            }
            StreamDelta::ToolCallEnd { .. } => {}
            StreamDelta::Done { stop_reason, usage } => {
                round.finish = stop_reason;
                if let Some(usage) = usage {
                    round.usage = usage;
                }
                return Ok(round);
            }
        }
    }
}
