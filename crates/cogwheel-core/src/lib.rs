//! Cogwheel Core - Shared signal types, configuration, and error handling

pub mod config;
pub mod error;
pub mod types;

pub use config::{BrainConfig, CogwheelConfig, ModelConfig, PerceptionConfig, ReplConfig};
pub use error::{Error, Result};
pub use types::*;
