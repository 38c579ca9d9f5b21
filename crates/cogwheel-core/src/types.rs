//! Core types for Cogwheel

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sensory channel a perception event arrives through.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Felt,
    Heard,
    Sighted,
    System,
}

impl Modality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Felt => "felt",
            Modality::Heard => "heard",
            Modality::Sighted => "sighted",
            Modality::System => "system",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named delivery destination for signals.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// The planner. Signals here end up in the model prompt.
    Conscious,
    /// Low-latency handlers that react without the model.
    Reflex,
    /// Bookkeeping and debug consumers.
    System,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Conscious, Channel::Reflex, Channel::System];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Conscious => "conscious",
            Channel::Reflex => "reflex",
            Channel::System => "system",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Channel {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "conscious" => Ok(Channel::Conscious),
            "reflex" => Ok(Channel::Reflex),
            // "debug" is the older name for the bookkeeping channel
            "system" | "debug" => Ok(Channel::System),
            other => Err(crate::Error::config(format!("unknown channel: {}", other))),
        }
    }
}

/// An elevated, routable notification derived from one raw world occurrence.
///
/// Signals are immutable once built; each subscribed sink receives its own clone.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Signal {
    pub source_event_id: String,
    #[serde(rename = "type")]
    pub signal_type: String,
    pub modality: Modality,
    pub kind: String,
    pub description: String,
    pub metadata: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl Signal {
    /// One-line rendering used when signals are folded into a prompt.
    pub fn summary_line(&self) -> String {
        format!(
            "[{}] {}/{}: {}",
            self.timestamp.format("%H:%M:%S%.3f"),
            self.modality,
            self.signal_type,
            self.description
        )
    }
}
