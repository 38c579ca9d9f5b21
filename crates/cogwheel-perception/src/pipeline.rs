//! Perception pipeline - match, filter, extract, saliency-gate, route

use crate::context::PerceptionContext;
use crate::definition::{DefinitionInfo, Evaluation, ExtractError, PerceptionEvent};
use crate::saliency::{KeySnapshot, SaliencyStore};
use crate::sink::{Delivery, Router, SignalSink};
use chrono::{DateTime, Utc};
use cogwheel_core::{Channel, Signal};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, trace, warn};

#[derive(Debug, thiserror::Error)]
pub enum PerceptionError {
    #[error("duplicate event definition: {0}")]
    DuplicateDefinition(String),
}

/// Per-definition result of one raw occurrence.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    Filtered,
    Failed(ExtractError),
    Suppressed { key: String },
    Observed,
    Emitted { signal: Signal, delivery: Delivery },
}

#[derive(Clone, Debug, Default)]
pub struct IngestReport {
    pub event: String,
    /// `(definition id, outcome)` in registration order.
    pub outcomes: Vec<(String, Outcome)>,
}

impl IngestReport {
    pub fn signals(&self) -> impl Iterator<Item = &Signal> {
        self.outcomes.iter().filter_map(|(_, o)| match o {
            Outcome::Emitted { signal, .. } => Some(signal),
            _ => None,
        })
    }

    pub fn emitted(&self) -> usize {
        self.signals().count()
    }

    pub fn outcome(&self, definition_id: &str) -> Option<&Outcome> {
        self.outcomes.iter().find(|(id, _)| id == definition_id).map(|(_, o)| o)
    }
}

/// Owns the definitions, the saliency store and the router.
///
/// `ingest` takes `&mut self`: each raw occurrence is fully processed before
/// the next one starts.
#[derive(Default)]
pub struct PerceptionPipeline {
    definitions: Vec<Box<dyn PerceptionEvent>>,
    by_event: HashMap<String, Vec<usize>>,
    saliency: SaliencyStore,
    router: Router,
    context: Option<Arc<dyn PerceptionContext>>,
}

impl PerceptionPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, definition: impl PerceptionEvent + 'static) -> Result<(), PerceptionError> {
        self.register_boxed(Box::new(definition))
    }

    pub fn register_all(&mut self, definitions: Vec<Box<dyn PerceptionEvent>>) -> Result<(), PerceptionError> {
        for definition in definitions {
            self.register_boxed(definition)?;
        }
        Ok(())
    }

    fn register_boxed(&mut self, definition: Box<dyn PerceptionEvent>) -> Result<(), PerceptionError> {
        if self.definitions.iter().any(|d| d.id() == definition.id()) {
            return Err(PerceptionError::DuplicateDefinition(definition.id().to_string()));
        }

        debug!(id = definition.id(), event = definition.source_event(), "registered perception event");
        let index = self.definitions.len();
        self.by_event
            .entry(definition.source_event().to_string())
            .or_default()
            .push(index);
        self.definitions.push(definition);
        Ok(())
    }

    pub fn attach(&mut self, context: Arc<dyn PerceptionContext>) {
        debug!(self_name = context.self_name(), "perception attached");
        self.context = Some(context);
    }

    pub fn detach(&mut self) {
        self.context = None;
    }

    pub fn is_attached(&self) -> bool {
        self.context.is_some()
    }

    pub fn subscribe(&mut self, channel: Channel, sink: Arc<dyn SignalSink>) {
        self.router.subscribe(channel, sink);
    }

    pub fn subscriber_count(&self, channel: Channel) -> usize {
        self.router.subscriber_count(channel)
    }

    /// Process one raw callback occurrence.
    pub fn ingest(&mut self, event: &str, args: &[Value]) -> IngestReport {
        self.ingest_at(event, args, Utc::now())
    }

    /// Process an occurrence observed at `now`, e.g. when replaying a recording.
    pub fn ingest_at(&mut self, event: &str, args: &[Value], now: DateTime<Utc>) -> IngestReport {
        let mut report = IngestReport { event: event.to_string(), outcomes: Vec::new() };

        let Some(ctx) = self.context.clone() else {
            trace!(event, "perception detached, dropping callback");
            return report;
        };
        let Some(indices) = self.by_event.get(event) else {
            return report;
        };

        for &index in indices {
            let definition = &self.definitions[index];
            let evaluation = definition.evaluate(ctx.as_ref(), args, &mut self.saliency, now);

            let outcome = match evaluation {
                Evaluation::Filtered => Outcome::Filtered,
                Evaluation::Failed(e) => {
                    warn!(event, id = definition.id(), "perception definition failed: {}", e);
                    Outcome::Failed(e)
                }
                Evaluation::Suppressed { key } => Outcome::Suppressed { key },
                Evaluation::Observed => Outcome::Observed,
                Evaluation::Signal(signal) => {
                    let delivery = self.router.deliver(definition.routes(), &signal);
                    debug!(
                        id = %signal.source_event_id,
                        signal_type = %signal.signal_type,
                        delivered = delivery.delivered,
                        failed = delivery.failed,
                        "signal emitted"
                    );
                    Outcome::Emitted { signal, delivery }
                }
            };
            report.outcomes.push((definition.id().to_string(), outcome));
        }

        report
    }

    pub fn definitions(&self) -> Vec<DefinitionInfo> {
        self.definitions.iter().map(|d| d.info()).collect()
    }

    /// Distinct signal types that registered definitions can produce.
    pub fn signal_types(&self) -> Vec<String> {
        self.definitions
            .iter()
            .filter_map(|d| d.info().signal_type)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn saliency_snapshot(&self) -> Vec<KeySnapshot> {
        self.saliency.snapshot()
    }

    pub fn reset_saliency(&mut self) {
        self.saliency.reset();
    }
}
