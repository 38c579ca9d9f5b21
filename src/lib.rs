//! Cogwheel - perception-to-action core for game-world agents
//!
//! Raw world callbacks enter a `PerceptionPipeline` and leave as routed
//! `Signal`s. The `Brain` folds conscious signals into a prompt, asks a
//! `CognitiveAgent` for a script and runs it in a sandboxed `ReplEngine`.

pub use cogwheel_agent as agent;
pub use cogwheel_core as core;
pub use cogwheel_llm as llm;
pub use cogwheel_perception as perception;
pub use cogwheel_repl as repl;

pub use cogwheel_agent::{Brain, CognitiveAgent};
pub use cogwheel_core::{Channel, CogwheelConfig, Signal};
pub use cogwheel_perception::PerceptionPipeline;
pub use cogwheel_repl::ReplEngine;
