//! Cogwheel Perception - raw world callbacks in, routed signals out
//!
//! Pipeline per raw occurrence:
//! - match: every registered definition bound to the callback name
//! - filter / extract: definition closures turn positional args into a typed payload
//! - saliency: the pipeline-owned store decides whether the occurrence escalates
//! - route: the resulting Signal is delivered to each named channel's sinks

pub mod context;
pub mod definition;
pub mod events;
pub mod pipeline;
pub mod saliency;
pub mod sink;

pub use cogwheel_core::{Channel, Modality, Signal};
pub use context::{FixedContext, PerceptionContext, Position};
pub use events::stock_definitions;
pub use definition::{
    DefinitionInfo, Evaluation, EventDefinition, ExtractError, PerceptionEvent, Salience,
    SaliencyKey, SaliencyRule, SignalTemplate, SourceBinding,
};
pub use pipeline::{IngestReport, Outcome, PerceptionError, PerceptionPipeline};
pub use saliency::{KeySnapshot, Reading, SaliencyStore, DEFAULT_WINDOW};
pub use sink::{ChannelSink, Delivery, FnSink, Router, SignalSink, SinkError};
