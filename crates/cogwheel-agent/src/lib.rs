//! Cogwheel Agent - model orchestration and the planner loop
//!
//! `CognitiveAgent` streams one reply (with optional tool rounds) from an
//! `LlmProvider`. `Brain` ties it to the signal channel and the script engine.

pub mod agent;
pub mod brain;
pub mod prompt;
pub mod tool;

pub use agent::{AgentError, CognitiveAgent, Completion, CompletionRequest, NullObserver, ResponseObserver, StopReason};
pub use brain::{Brain, BrainError, LastResult, Turn};
pub use prompt::{build_messages, script_from_reply};
pub use tool::{Tool, ToolRegistry, ToolResult};
