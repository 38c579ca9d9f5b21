//! Cogwheel REPL - normalize planner scripts and run them in a persistent sandbox
//!
//! - normalizer: promotes top-level bindings onto `globalThis` and synthesizes
//!   an implicit return of the trailing expression
//! - engine: one QuickJS runtime per engine, wall-clock deadline enforced by
//!   the interrupt handler, host functions exposed as JSON-in/JSON-out globals
//! - actions: per-evaluation ledger of action calls, capped per turn
//! - render: bounded inspect-style rendering of result values

pub mod actions;
pub mod engine;
pub mod normalizer;
pub mod render;

pub use actions::ActionIntent;
pub use engine::{HostFunction, ReplEngine, ReplError};
pub use normalizer::{extract_script_candidate, normalize};
pub use render::Inspector;
