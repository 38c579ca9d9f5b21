//! Perception event definitions
//!
//! A definition binds one raw callback name to a filter, a typed extractor,
//! an optional saliency rule, an optional signal template and a route list.
//! `EventDefinition<P>` keeps the payload type; the pipeline stores it behind
//! the object-safe `PerceptionEvent` trait.

use crate::context::PerceptionContext;
use crate::saliency::{Reading, SaliencyStore};
use crate::sink::panic_message;
use chrono::{DateTime, Utc};
use cogwheel_core::{Channel, Modality, Signal};
use serde::Serialize;
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

type FilterFn = Box<dyn Fn(&dyn PerceptionContext, &[Value]) -> bool + Send + Sync>;
type ExtractFn<P> = Box<dyn Fn(&dyn PerceptionContext, &[Value]) -> Result<P, ExtractError> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExtractError {
    #[error("missing argument {0}")]
    MissingArgument(usize),

    #[error("invalid argument {index}: {reason}")]
    InvalidArgument { index: usize, reason: String },

    #[error("{0}")]
    Other(String),

    #[error("panicked: {0}")]
    Panicked(String),
}

impl ExtractError {
    pub fn invalid(index: usize, reason: impl Into<String>) -> Self {
        Self::InvalidArgument { index, reason: reason.into() }
    }
}

/// Raw callback binding.
pub struct SourceBinding<P> {
    pub event: String,
    filter: Option<FilterFn>,
    extract: ExtractFn<P>,
}

impl<P> SourceBinding<P> {
    pub fn new<F>(event: impl Into<String>, extract: F) -> Self
    where
        F: Fn(&dyn PerceptionContext, &[Value]) -> Result<P, ExtractError> + Send + Sync + 'static,
    {
        Self { event: event.into(), filter: None, extract: Box::new(extract) }
    }

    pub fn filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&dyn PerceptionContext, &[Value]) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(filter));
        self
    }
}

pub enum SaliencyKey<P> {
    Fixed(String),
    Derived(Box<dyn Fn(&P) -> String + Send + Sync>),
}

pub enum Salience<P> {
    Constant(f64),
    Occurrences,
    Payload(Box<dyn Fn(&P) -> f64 + Send + Sync>),
}

pub struct SaliencyRule<P> {
    pub threshold: f64,
    pub key: SaliencyKey<P>,
    pub measure: Salience<P>,
    /// Trailing window for `Occurrences`; `None` counts for the store's lifetime.
    pub window: Option<Duration>,
}

impl<P> SaliencyRule<P> {
    /// Constant salience of 1.0 under a fixed key.
    pub fn fixed(key: impl Into<String>, threshold: f64) -> Self {
        Self { threshold, key: SaliencyKey::Fixed(key.into()), measure: Salience::Constant(1.0), window: None }
    }

    /// Constant salience of 1.0 under a key computed from the payload.
    pub fn derived<F>(key: F, threshold: f64) -> Self
    where
        F: Fn(&P) -> String + Send + Sync + 'static,
    {
        Self {
            threshold,
            key: SaliencyKey::Derived(Box::new(key)),
            measure: Salience::Constant(1.0),
            window: None,
        }
    }

    pub fn measured_by(mut self, measure: Salience<P>) -> Self {
        self.measure = measure;
        self
    }

    /// Count occurrences only within `window` of each other.
    pub fn within(mut self, window: Duration) -> Self {
        self.window = Some(window);
        self
    }

    fn key_for(&self, payload: &P) -> String {
        match &self.key {
            SaliencyKey::Fixed(k) => k.clone(),
            SaliencyKey::Derived(f) => f(payload),
        }
    }

    fn reading_for(&self, payload: &P) -> Reading {
        match &self.measure {
            Salience::Constant(v) => Reading::Value(*v),
            Salience::Occurrences => match self.window {
                Some(window) => Reading::Windowed(window),
                None => Reading::Occurrences,
            },
            Salience::Payload(f) => Reading::Value(f(payload)),
        }
    }
}

/// How a passing occurrence is turned into a Signal.
pub struct SignalTemplate<P> {
    pub signal_type: String,
    description: Box<dyn Fn(&P) -> String + Send + Sync>,
    metadata: Option<Box<dyn Fn(&P) -> Value + Send + Sync>>,
}

impl<P> SignalTemplate<P> {
    pub fn new<F>(signal_type: impl Into<String>, description: F) -> Self
    where
        F: Fn(&P) -> String + Send + Sync + 'static,
    {
        Self { signal_type: signal_type.into(), description: Box::new(description), metadata: None }
    }

    pub fn metadata<F>(mut self, metadata: F) -> Self
    where
        F: Fn(&P) -> Value + Send + Sync + 'static,
    {
        self.metadata = Some(Box::new(metadata));
        self
    }

    /// Use the serialized payload itself as metadata.
    pub fn payload_metadata(self) -> Self
    where
        P: Serialize,
    {
        self.metadata(|payload| serde_json::to_value(payload).unwrap_or(Value::Null))
    }
}

pub struct EventDefinition<P> {
    pub id: String,
    pub modality: Modality,
    pub kind: String,
    pub source: SourceBinding<P>,
    pub saliency: Option<SaliencyRule<P>>,
    pub signal: Option<SignalTemplate<P>>,
    pub routes: Vec<Channel>,
}

impl<P> EventDefinition<P> {
    pub fn new(id: impl Into<String>, modality: Modality, kind: impl Into<String>, source: SourceBinding<P>) -> Self {
        Self {
            id: id.into(),
            modality,
            kind: kind.into(),
            source,
            saliency: None,
            signal: None,
            routes: Vec::new(),
        }
    }

    pub fn saliency(mut self, rule: SaliencyRule<P>) -> Self {
        self.saliency = Some(rule);
        self
    }

    pub fn signal(mut self, template: SignalTemplate<P>) -> Self {
        self.signal = Some(template);
        self
    }

    /// Set the route list. Repeated channels are kept once, first position wins.
    pub fn routes(mut self, routes: impl IntoIterator<Item = Channel>) -> Self {
        self.routes.clear();
        for channel in routes {
            if !self.routes.contains(&channel) {
                self.routes.push(channel);
            }
        }
        self
    }
}

/// Static description of a registered definition.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct DefinitionInfo {
    pub id: String,
    pub modality: Modality,
    pub kind: String,
    pub source_event: String,
    pub signal_type: Option<String>,
    pub saliency_threshold: Option<f64>,
    pub saliency_window_ms: Option<u64>,
    pub routes: Vec<Channel>,
}

/// What one definition made of one raw occurrence.
#[derive(Clone, Debug, PartialEq)]
pub enum Evaluation {
    Filtered,
    Failed(ExtractError),
    Suppressed { key: String },
    /// Passed (or had no saliency rule) but carries no signal template.
    Observed,
    Signal(Signal),
}

/// Object-safe view of a definition, as stored by the pipeline.
pub trait PerceptionEvent: Send + Sync {
    fn id(&self) -> &str;

    fn info(&self) -> DefinitionInfo;

    fn source_event(&self) -> &str;

    fn routes(&self) -> &[Channel];

    fn evaluate(
        &self,
        ctx: &dyn PerceptionContext,
        args: &[Value],
        saliency: &mut SaliencyStore,
        now: DateTime<Utc>,
    ) -> Evaluation;
}

impl<P: Send + Sync + 'static> PerceptionEvent for EventDefinition<P> {
    fn id(&self) -> &str {
        &self.id
    }

    fn info(&self) -> DefinitionInfo {
        DefinitionInfo {
            id: self.id.clone(),
            modality: self.modality,
            kind: self.kind.clone(),
            source_event: self.source.event.clone(),
            signal_type: self.signal.as_ref().map(|s| s.signal_type.clone()),
            saliency_threshold: self.saliency.as_ref().map(|s| s.threshold),
            saliency_window_ms: self
                .saliency
                .as_ref()
                .and_then(|s| s.window)
                .map(|w| u64::try_from(w.as_millis()).unwrap_or(u64::MAX)),
            routes: self.routes.clone(),
        }
    }

    fn source_event(&self) -> &str {
        &self.source.event
    }

    fn routes(&self) -> &[Channel] {
        &self.routes
    }

    fn evaluate(
        &self,
        ctx: &dyn PerceptionContext,
        args: &[Value],
        saliency: &mut SaliencyStore,
        now: DateTime<Utc>,
    ) -> Evaluation {
        if let Some(filter) = &self.source.filter {
            match catch_unwind(AssertUnwindSafe(|| filter(ctx, args))) {
                Ok(true) => {}
                Ok(false) => return Evaluation::Filtered,
                Err(panic) => {
                    return Evaluation::Failed(ExtractError::Panicked(panic_message(panic.as_ref())))
                }
            }
        }

        let payload = match catch_unwind(AssertUnwindSafe(|| (self.source.extract)(ctx, args))) {
            Ok(Ok(payload)) => payload,
            Ok(Err(e)) => return Evaluation::Failed(e),
            Err(panic) => return Evaluation::Failed(ExtractError::Panicked(panic_message(panic.as_ref()))),
        };

        if let Some(rule) = &self.saliency {
            let key = rule.key_for(&payload);
            if !saliency.gate(&key, rule.reading_for(&payload), rule.threshold, now) {
                return Evaluation::Suppressed { key };
            }
        }

        let Some(template) = &self.signal else {
            return Evaluation::Observed;
        };

        let rendered = catch_unwind(AssertUnwindSafe(|| {
            let description = (template.description)(&payload);
            let metadata = template.metadata.as_ref().map(|m| m(&payload)).unwrap_or(Value::Null);
            (description, metadata)
        }));
        let (description, metadata) = match rendered {
            Ok(parts) => parts,
            Err(panic) => return Evaluation::Failed(ExtractError::Panicked(panic_message(panic.as_ref()))),
        };

        Evaluation::Signal(Signal {
            source_event_id: self.id.clone(),
            signal_type: template.signal_type.clone(),
            modality: self.modality,
            kind: self.kind.clone(),
            description,
            metadata,
            timestamp: now,
        })
    }
}
