//! Cogwheel LLM - streaming model backends

pub mod openai;
pub mod provider;
pub mod types;

pub use openai::{parse_sse_stream, OpenAiCompatProvider};
pub use provider::{LlmError, LlmProvider, LlmResult, LlmStream};
pub use tokio_util::sync::CancellationToken;
pub use types::*;
