//! Signal sinks and the per-channel router
//!
//! Delivery is synchronous. Each sink is isolated: an error or a panic in one
//! sink is logged and the remaining sinks still receive the signal.

use cogwheel_core::{Channel, Signal};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("receiver closed")]
    Closed,

    #[error("sink rejected signal: {0}")]
    Rejected(String),
}

/// A consumer subscribed to one channel.
pub trait SignalSink: Send + Sync {
    fn deliver(&self, signal: &Signal) -> Result<(), SinkError>;
}

/// Forwards signals into an unbounded tokio channel. Never blocks.
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Signal>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<Signal>) -> Self {
        Self { tx }
    }

    /// Create a sink together with the receiving end.
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<Signal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl SignalSink for ChannelSink {
    fn deliver(&self, signal: &Signal) -> Result<(), SinkError> {
        self.tx.send(signal.clone()).map_err(|_| SinkError::Closed)
    }
}

/// Adapts a plain closure into a sink.
pub struct FnSink<F>(pub F);

impl<F> SignalSink for FnSink<F>
where
    F: Fn(&Signal) + Send + Sync,
{
    fn deliver(&self, signal: &Signal) -> Result<(), SinkError> {
        (self.0)(signal);
        Ok(())
    }
}

/// Result of delivering one signal across its routes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Default)]
pub struct Router {
    subscribers: HashMap<Channel, Vec<Arc<dyn SignalSink>>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, channel: Channel, sink: Arc<dyn SignalSink>) {
        self.subscribers.entry(channel).or_default().push(sink);
    }

    pub fn subscriber_count(&self, channel: Channel) -> usize {
        self.subscribers.get(&channel).map(Vec::len).unwrap_or(0)
    }

    /// Deliver to every sink of every route, routes in order, sinks in subscription order.
    pub fn deliver(&self, routes: &[Channel], signal: &Signal) -> Delivery {
        let mut delivery = Delivery::default();

        for channel in routes {
            let Some(sinks) = self.subscribers.get(channel) else {
                continue;
            };
            for sink in sinks {
                match catch_unwind(AssertUnwindSafe(|| sink.deliver(signal))) {
                    Ok(Ok(())) => delivery.delivered += 1,
                    Ok(Err(e)) => {
                        delivery.failed += 1;
                        warn!(channel = %channel, source = %signal.source_event_id, "sink failed: {}", e);
                    }
                    Err(panic) => {
                        delivery.failed += 1;
                        warn!(
                            channel = %channel,
                            source = %signal.source_event_id,
                            "sink panicked: {}",
                            panic_message(panic.as_ref())
                        );
                    }
                }
            }
        }

        delivery
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
