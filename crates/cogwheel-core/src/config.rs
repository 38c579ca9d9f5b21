//! Cogwheel configuration
//!
//! All tunable parameters in one place. Loaded from TOML at startup,
//! falls back to defaults if no config file exists.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CogwheelConfig {
    /// Perception pipeline parameters.
    pub perception: PerceptionConfig,
    /// Script sandbox parameters.
    pub repl: ReplConfig,
    /// Model backend selection.
    pub model: ModelConfig,
    /// Planner loop parameters.
    pub brain: BrainConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerceptionConfig {
    /// Entities further away than this are not perceived.
    pub max_distance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplConfig {
    /// Wall-clock budget per evaluation, in milliseconds.
    pub timeout_ms: u64,
    /// Nesting depth rendered before collapsing to `[Object]` / `[Array]`.
    pub max_depth: usize,
    /// Entries rendered per array or object before eliding the rest.
    pub max_items: usize,
    /// Hard cap on the rendered result length, in characters.
    pub max_chars: usize,
    /// Heap limit for the script runtime. 0 disables the limit.
    pub memory_limit_bytes: usize,
    /// Action calls one script may make. 0 disables the cap.
    pub max_actions_per_turn: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Base endpoint of an OpenAI-compatible API (without `/chat/completions`).
    pub base_url: String,
    /// Environment variable holding the credential.
    pub api_key_env: String,
    /// Model identifier sent with every request.
    pub model: String,
    /// Ask the backend for a JSON object response.
    pub json_response: bool,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrainConfig {
    /// System prompt prepended to every planner turn.
    pub system_prompt: String,
    /// Number of recent signals kept in the prompt window.
    pub max_signals: usize,
    /// Retries for retryable model failures per turn.
    pub max_retries: u32,
    /// Backoff between retries, multiplied by the attempt number.
    pub retry_backoff_ms: u64,
}

// ============================================================
// Defaults
// ============================================================

impl Default for PerceptionConfig {
    fn default() -> Self {
        Self { max_distance: 32.0 }
    }
}

impl Default for ReplConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 750,
            max_depth: 2,
            max_items: 100,
            max_chars: 4_000,
            memory_limit_bytes: 64 * 1024 * 1024,
            max_actions_per_turn: 5,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".into(),
            api_key_env: "OPENAI_API_KEY".into(),
            model: "gpt-4o-mini".into(),
            json_response: false,
            max_tokens: None,
            temperature: None,
        }
    }
}

impl Default for BrainConfig {
    fn default() -> Self {
        Self {
            system_prompt: "You control an agent in a game world. You perceive the world through \
                signals. Reply with a single JavaScript snippet that calls the available action \
                functions, directly or as use(name, params), at most five per turn. Variables you \
                declare persist between turns. Reply with skip() alone when nothing needs doing."
                .into(),
            max_signals: 20,
            max_retries: 2,
            retry_backoff_ms: 500,
        }
    }
}

// ============================================================
// Loading
// ============================================================

impl CogwheelConfig {
    /// Load config from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match Self::from_toml(&content) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {}, using defaults", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!("No config at {}, using defaults", path.display());
                Self::default()
            }
        }
    }

    pub fn from_toml(content: &str) -> crate::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Write the current config as TOML (for generating a default config file).
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }
}

impl ModelConfig {
    /// Resolve the credential from the configured environment variable.
    pub fn api_key(&self) -> crate::Result<String> {
        std::env::var(&self.api_key_env)
            .map_err(|_| crate::Error::config(format!("{} not set", self.api_key_env)))
    }
}
