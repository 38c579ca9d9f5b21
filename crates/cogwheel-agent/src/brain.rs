//! Planner loop: signals in, one script per turn out
//!
//! Each step drains newly routed signals into a bounded window, asks the
//! agent for a script, and runs it. The outcome, failures included, is fed
//! into the next prompt. Only model errors abort a step.

use crate::agent::{AgentError, CognitiveAgent, Completion, CompletionRequest, ResponseObserver};
use crate::prompt::{build_messages, script_from_reply};
use crate::tool::ToolRegistry;
use cogwheel_core::{BrainConfig, Signal};
use cogwheel_llm::{CancellationToken, LlmError, Usage};
use cogwheel_repl::{ActionIntent, ReplEngine, ReplError};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum BrainError {
    #[error(transparent)]
    Agent(#[from] AgentError),
}

impl BrainError {
    pub fn is_retryable(&self) -> bool {
        match self {
            BrainError::Agent(e) => e.is_retryable(),
        }
    }
}

/// The previous script and what came of it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LastResult {
    pub script: String,
    pub output: String,
    pub failed: bool,
    /// Actions the script called, in order.
    pub actions: Vec<String>,
}

#[derive(Debug)]
pub struct Turn {
    /// Signals received since the previous turn.
    pub new_signals: usize,
    pub completion: Completion,
    pub script: Option<String>,
    pub result: Option<Result<String, ReplError>>,
    pub actions: Vec<ActionIntent>,
}

struct TraceObserver;

impl ResponseObserver for TraceObserver {
    fn on_delta(&mut self, text: &str) {
        tracing::trace!(len = text.len(), "reply delta");
    }

    fn on_finish(&mut self, usage: &Usage) {
        debug!(total_tokens = usage.total(), "reply finished");
    }
}

pub struct Brain {
    agent: CognitiveAgent,
    engine: ReplEngine,
    signals: mpsc::UnboundedReceiver<Signal>,
    config: BrainConfig,
    tools: Option<Arc<ToolRegistry>>,
    json_response: bool,
    recent: VecDeque<Signal>,
    unseen: usize,
    last: Option<LastResult>,
}

impl Brain {
    pub fn new(
        agent: CognitiveAgent,
        engine: ReplEngine,
        signals: mpsc::UnboundedReceiver<Signal>,
        config: BrainConfig,
    ) -> Self {
        Self {
            agent,
            engine,
            signals,
            config,
            tools: None,
            json_response: false,
            recent: VecDeque::new(),
            unseen: 0,
            last: None,
        }
    }

    pub fn with_tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_json_response(mut self, json_response: bool) -> Self {
        self.json_response = json_response;
        self
    }

    pub fn engine_mut(&mut self) -> &mut ReplEngine {
        &mut self.engine
    }

    pub fn last_result(&self) -> Option<&LastResult> {
        self.last.as_ref()
    }

    pub fn recent_signals(&self) -> impl Iterator<Item = &Signal> {
        self.recent.iter()
    }

    fn accept(&mut self, signal: Signal) {
        self.recent.push_back(signal);
        while self.recent.len() > self.config.max_signals.max(1) {
            self.recent.pop_front();
        }
        self.unseen += 1;
    }

    fn drain(&mut self) {
        while let Ok(signal) = self.signals.try_recv() {
            self.accept(signal);
        }
    }

    /// Run one turn if new signals arrived; `None` otherwise.
    pub async fn step(&mut self, cancel: Option<CancellationToken>) -> Result<Option<Turn>, BrainError> {
        self.drain();
        if self.unseen == 0 {
            return Ok(None);
        }
        let new_signals = std::mem::take(&mut self.unseen);

        let globals = self.engine.globals().unwrap_or_default();
        let messages = build_messages(&self.config.system_prompt, self.recent.iter(), self.last.as_ref(), &globals);
        let mut request = CompletionRequest::new(messages).json(self.json_response);
        if let Some(tools) = &self.tools {
            request = request.with_tools(Arc::clone(tools));
        }

        let completion = respond_with_retry(&self.agent, &self.config, request, cancel).await?;

        let Some(script) = script_from_reply(&completion.text, self.json_response) else {
            info!(new_signals, "planner replied without a script");
            return Ok(Some(Turn { new_signals, completion, script: None, result: None, actions: Vec::new() }));
        };

        let engine = &mut self.engine;
        let result = run_blocking(|| engine.evaluate(&script));
        let actions = self.engine.last_actions().to_vec();
        let (output, failed) = match &result {
            Ok(value) => (value.clone(), false),
            Err(e) => (e.to_string(), true),
        };
        if failed {
            warn!(error = %output, "planner script failed");
        } else {
            debug!(result = %output, "planner script ran");
        }
        self.last = Some(LastResult {
            script: script.clone(),
            output,
            failed,
            actions: actions.iter().map(|a| a.tool.clone()).collect(),
        });

        Ok(Some(Turn { new_signals, completion, script: Some(script), result: Some(result), actions }))
    }

    /// Step whenever signals arrive, until cancelled or every sender is gone.
    ///
    /// Retryable model failures that outlast their retries are logged and the
    /// loop keeps going; anything else ends it.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<(), BrainError> {
        info!("brain loop started");
        loop {
            let signal = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                signal = self.signals.recv() => signal,
            };
            let Some(signal) = signal else {
                break;
            };
            self.accept(signal);

            match self.step(Some(cancel.clone())).await {
                Ok(_) => {}
                Err(_) if cancel.is_cancelled() => break,
                Err(e) if e.is_retryable() => warn!("turn abandoned: {}", e),
                Err(e) => return Err(e),
            }
        }
        info!("brain loop stopped");
        Ok(())
    }
}

/// Linear backoff between attempts; only retryable model errors are repeated.
async fn respond_with_retry(
    agent: &CognitiveAgent,
    config: &BrainConfig,
    request: CompletionRequest,
    cancel: Option<CancellationToken>,
) -> Result<Completion, AgentError> {
    let mut attempt: u32 = 0;
    loop {
        let mut observer = TraceObserver;
        match agent.respond(request.clone(), &mut observer, cancel.clone()).await {
            Ok(completion) => return Ok(completion),
            Err(e) if e.is_retryable() && attempt < config.max_retries => {
                attempt += 1;
                let delay = Duration::from_millis(config.retry_backoff_ms.saturating_mul(u64::from(attempt)));
                warn!(attempt, delay_ms = delay.as_millis() as u64, "model call failed, retrying: {}", e);
                match &cancel {
                    Some(token) => tokio::select! {
                        _ = token.cancelled() => return Err(AgentError::Model(LlmError::Cancelled)),
                        _ = tokio::time::sleep(delay) => {}
                    },
                    None => tokio::time::sleep(delay).await,
                }
            }
            Err(e) => return Err(e),
        }
    }
}

/// Script evaluation blocks for up to the engine timeout. On a multi-thread
/// runtime the worker is handed off first so other tasks keep running.
fn run_blocking<R>(f: impl FnOnce() -> R) -> R {
    match Handle::try_current().map(|handle| handle.runtime_flavor()) {
        Ok(RuntimeFlavor::MultiThread) => tokio::task::block_in_place(f),
        _ => f(),
    }
}
