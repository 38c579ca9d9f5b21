//! Per-evaluation action ledger
//!
//! Every call to an exposed action (directly, through `use`, or `skip`) is
//! recorded for the running evaluation. A script may make at most
//! `limit` calls, and `skip()` must be the only call when it is made.

use crate::engine::HostFunction;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

pub const SKIP: &str = "skip";

/// One action call made by a script.
#[derive(Clone, Debug, PartialEq)]
pub struct ActionIntent {
    pub tool: String,
    pub args: Vec<Value>,
}

impl ActionIntent {
    pub fn is_skip(&self) -> bool {
        self.tool == SKIP
    }
}

pub(crate) struct ActionLedger {
    limit: usize,
    tools: RwLock<HashMap<String, HostFunction>>,
    taken: Mutex<Vec<ActionIntent>>,
}

impl ActionLedger {
    /// `limit` of 0 means uncapped.
    pub(crate) fn new(limit: usize) -> Self {
        Self { limit, tools: RwLock::new(HashMap::new()), taken: Mutex::new(Vec::new()) }
    }

    pub(crate) fn register(&self, name: &str, function: HostFunction) {
        if let Ok(mut tools) = self.tools.write() {
            tools.insert(name.to_string(), function);
        }
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<HostFunction> {
        self.tools.read().ok()?.get(name).cloned()
    }

    /// Record a call, or explain why the script may not make it.
    pub(crate) fn record(&self, tool: &str, args: &[Value]) -> Result<(), String> {
        let mut taken = self.taken.lock().map_err(|_| "action ledger poisoned".to_string())?;
        if self.limit > 0 && taken.len() >= self.limit {
            return Err(format!("Action limit exceeded: max {} actions per turn", self.limit));
        }
        let mixes_skip = if tool == SKIP { !taken.is_empty() } else { taken.iter().any(ActionIntent::is_skip) };
        if mixes_skip {
            return Err("skip() cannot be mixed with other tool calls in the same script".to_string());
        }
        taken.push(ActionIntent { tool: tool.to_string(), args: args.to_vec() });
        Ok(())
    }

    /// Clear and return the calls recorded so far.
    pub(crate) fn take(&self) -> Vec<ActionIntent> {
        self.taken.lock().map(|mut taken| std::mem::take(&mut *taken)).unwrap_or_default()
    }
}
