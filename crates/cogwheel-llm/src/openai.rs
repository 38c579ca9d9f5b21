//! OpenAI-compatible chat completions provider with SSE streaming

use crate::provider::{LlmError, LlmProvider, LlmResult, LlmStream};
use crate::types::{LlmMessage, LlmRequest, StreamDelta, Usage};
use cogwheel_core::ModelConfig;
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

pub struct OpenAiCompatProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiCompatProvider {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// Build from config; the credential is read from the configured env var.
    pub fn from_config(config: &ModelConfig) -> LlmResult<Self> {
        let api_key = config.api_key().map_err(|e| LlmError::AuthFailed(e.to_string()))?;
        Ok(Self::new(&config.base_url, api_key, &config.model))
    }

    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    /// Wire body for a request.
    pub fn request_body(&self, request: &LlmRequest) -> serde_json::Value {
        let model = if request.model.is_empty() { self.model.clone() } else { request.model.clone() };
        let body = ChatRequest {
            model,
            messages: request.messages.iter().map(ChatMessage::from).collect(),
            stream: true,
            stream_options: StreamOptions { include_usage: true },
            tools: request.tools.as_ref().filter(|t| !t.is_empty()).map(|tools| {
                tools
                    .iter()
                    .map(|t| ChatTool {
                        kind: "function",
                        function: ChatFunctionDef {
                            name: t.name.clone(),
                            description: t.description.clone(),
                            parameters: t.input_schema.clone(),
                        },
                    })
                    .collect()
            }),
            response_format: request.json_response.then_some(ResponseFormat { kind: "json_object" }),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };
        serde_json::to_value(body).unwrap_or_default()
    }
}

/// Map a non-success HTTP status to an error.
pub fn status_error(status: u16, body: String) -> LlmError {
    match status {
        401 | 403 => LlmError::AuthFailed(body),
        429 => LlmError::RateLimited(body),
        _ => LlmError::RequestFailed { status, body },
    }
}

#[async_trait::async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        "openai-compat"
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    async fn complete_stream(
        &self,
        request: LlmRequest,
        cancel: Option<CancellationToken>,
    ) -> LlmResult<LlmStream> {
        let body = self.request_body(&request);
        debug!(model = %body["model"], messages = request.messages.len(), "chat completion request");

        let send = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send();

        let response = match &cancel {
            Some(token) => tokio::select! {
                _ = token.cancelled() => return Err(LlmError::Cancelled),
                response = send => response?,
            },
            None => send.await?,
        };

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("chat completion error {}: {}", status, error_text);
            return Err(status_error(status.as_u16(), error_text));
        }

        Ok(Box::pin(parse_sse_stream(response.bytes_stream(), cancel)))
    }
}

/// Turn a raw SSE byte stream into deltas. Ends with `Done`, or with an error
/// if the stream is cut off, malformed, or cancelled.
pub fn parse_sse_stream<S, B, E>(
    bytes: S,
    cancel: Option<CancellationToken>,
) -> impl Stream<Item = LlmResult<StreamDelta>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: std::fmt::Display + Send,
{
    async_stream::stream! {
        let cancel = cancel.unwrap_or_else(CancellationToken::new);
        let events = bytes.eventsource();
        tokio::pin!(events);
        let mut state = ChunkState::default();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                next = events.next() => Some(next),
            };
            let Some(next) = next else {
                yield Err(LlmError::Cancelled);
                return;
            };
            let Some(event) = next else {
                break;
            };

            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    yield Err(LlmError::StreamError(e.to_string()));
                    return;
                }
            };

            let data = event.data.trim();
            if data.is_empty() {
                continue;
            }
            if data == "[DONE]" {
                for delta in state.finish() {
                    yield Ok(delta);
                }
                return;
            }

            match serde_json::from_str::<ChatChunk>(data) {
                Ok(chunk) => {
                    for delta in state.apply(chunk) {
                        yield Ok(delta);
                    }
                }
                Err(e) => {
                    yield Err(LlmError::InvalidResponse(format!("bad chunk: {}", e)));
                    return;
                }
            }
        }

        if state.finish_reason.is_some() {
            for delta in state.finish() {
                yield Ok(delta);
            }
        } else {
            yield Err(LlmError::StreamError("stream ended before completion".into()));
        }
    }
}

/// Tool calls arrive keyed by index; only the first fragment carries the id.
#[derive(Default)]
struct ChunkState {
    open: BTreeMap<u32, String>,
    finish_reason: Option<String>,
    usage: Option<Usage>,
}

impl ChunkState {
    fn apply(&mut self, chunk: ChatChunk) -> Vec<StreamDelta> {
        let mut out = Vec::new();

        if let Some(usage) = chunk.usage {
            self.usage = Some(Usage { input_tokens: usage.prompt_tokens, output_tokens: usage.completion_tokens });
        }

        for choice in chunk.choices.into_iter().filter(|c| c.index == 0) {
            if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
                out.push(StreamDelta::Text(text));
            }

            for call in choice.delta.tool_calls.unwrap_or_default() {
                let function = call.function.unwrap_or_default();
                if let Some(id) = call.id {
                    self.open.insert(call.index, id.clone());
                    out.push(StreamDelta::ToolCallStart { id, name: function.name.unwrap_or_default() });
                }
                if let Some(arguments) = function.arguments.filter(|a| !a.is_empty()) {
                    if let Some(id) = self.open.get(&call.index) {
                        out.push(StreamDelta::ToolCallDelta { id: id.clone(), arguments });
                    }
                }
            }

            if let Some(reason) = choice.finish_reason {
                out.extend(self.close_tool_calls());
                self.finish_reason = Some(reason);
            }
        }

        out
    }

    fn close_tool_calls(&mut self) -> Vec<StreamDelta> {
        std::mem::take(&mut self.open)
            .into_values()
            .map(|id| StreamDelta::ToolCallEnd { id })
            .collect()
    }

    fn finish(&mut self) -> Vec<StreamDelta> {
        let mut out = self.close_tool_calls();
        out.push(StreamDelta::Done { stop_reason: self.finish_reason.take(), usage: self.usage.take() });
        out
    }
}

// ============================================================
// Wire types
// ============================================================

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    stream_options: StreamOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ChatTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ChatToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl From<&LlmMessage> for ChatMessage {
    fn from(m: &LlmMessage) -> Self {
        let tool_calls = (!m.tool_calls.is_empty()).then(|| {
            m.tool_calls
                .iter()
                .map(|c| ChatToolCall {
                    id: c.id.clone(),
                    kind: "function",
                    function: ChatFunctionCall { name: c.name.clone(), arguments: c.arguments.clone() },
                })
                .collect()
        });
        Self {
            role: m.role.clone(),
            content: m.content.clone(),
            tool_calls,
            tool_call_id: m.tool_call_id.clone(),
        }
    }
}

#[derive(Serialize)]
struct ChatToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: &'static str,
    function: ChatFunctionCall,
}

#[derive(Serialize)]
struct ChatFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Serialize)]
struct ChatTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: ChatFunctionDef,
}

#[derive(Serialize)]
struct ChatFunctionDef {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    usage: Option<ChunkUsage>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    delta: ChunkDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct ChunkDelta {
    content: Option<String>,
    tool_calls: Option<Vec<ChunkToolCall>>,
}

#[derive(Deserialize)]
struct ChunkToolCall {
    #[serde(default)]
    index: u32,
    id: Option<String>,
    function: Option<ChunkFunction>,
}

#[derive(Deserialize, Default)]
struct ChunkFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Deserialize)]
struct ChunkUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}
