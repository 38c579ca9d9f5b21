//! Saliency store - per-key dedup state owned by one pipeline
//!
//! An occurrence passes the gate when its salience exceeds the value recorded
//! at the key's last pass by at least the rule's threshold. Unseen keys start
//! at 0.0. Entries are never evicted; `reset` clears everything.
//!
//! Windowed readings count occurrences in 20 ms slots over a trailing window.
//! Slots older than the window expire, and a pass empties the window, so the
//! count measures a burst rather than a lifetime total.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

pub const SLOT_MS: i64 = 20;

/// Window used by the stock occurrence rules.
pub const DEFAULT_WINDOW: Duration = Duration::from_millis(2_000);

/// How the salience of one occurrence is obtained.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Reading {
    /// A value computed from the occurrence itself.
    Value(f64),
    /// The running count of occurrences seen for the key, this one included.
    Occurrences,
    /// Occurrences within the trailing window since the key last passed.
    Windowed(Duration),
}

#[derive(Clone, Debug, Default)]
struct KeyState {
    recorded: f64,
    occurrences: u64,
    fired: u64,
    last_fired: Option<DateTime<Utc>>,
    window_ms: Option<u64>,
    /// `(slot, count)`, oldest first.
    slots: VecDeque<(i64, u64)>,
}

impl KeyState {
    /// Add one occurrence at `now` and return the count still inside `window`.
    fn count_in_window(&mut self, now: DateTime<Utc>, window: Duration) -> u64 {
        let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);
        let span = ((window_ms.saturating_add(SLOT_MS / 2)) / SLOT_MS).max(1);
        let slot = now.timestamp_millis().div_euclid(SLOT_MS);

        while self.slots.front().is_some_and(|(s, _)| *s <= slot.saturating_sub(span)) {
            self.slots.pop_front();
        }
        match self.slots.back_mut() {
            // Clock went backwards: keep counting in the newest slot.
            Some((last, count)) if *last >= slot => *count += 1,
            _ => self.slots.push_back((slot, 1)),
        }

        self.window_ms = Some(u64::try_from(window_ms).unwrap_or(u64::MAX));
        self.window_count()
    }

    fn window_count(&self) -> u64 {
        self.slots.iter().map(|(_, count)| count).sum()
    }
}

/// Debug view of one key.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct KeySnapshot {
    pub key: String,
    pub recorded: f64,
    pub occurrences: u64,
    pub fired: u64,
    pub last_fired: Option<DateTime<Utc>>,
    /// Set once the key has been gated with a windowed reading.
    pub window_ms: Option<u64>,
    /// Occurrences in the window as of the last gate.
    pub window_count: u64,
}

#[derive(Debug, Default)]
pub struct SaliencyStore {
    entries: HashMap<String, KeyState>,
}

impl SaliencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count the occurrence under `key` and decide whether it escalates.
    pub fn gate(&mut self, key: &str, reading: Reading, threshold: f64, now: DateTime<Utc>) -> bool {
        let state = self.entries.entry(key.to_string()).or_default();
        state.occurrences += 1;

        let (salience, baseline) = match reading {
            Reading::Value(v) => (v, state.recorded),
            Reading::Occurrences => (state.occurrences as f64, state.recorded),
            Reading::Windowed(window) => (state.count_in_window(now, window) as f64, 0.0),
        };

        if salience - baseline >= threshold {
            if matches!(reading, Reading::Windowed(_)) {
                state.slots.clear();
            }
            state.recorded = salience;
            state.fired += 1;
            state.last_fired = Some(now);
            true
        } else {
            false
        }
    }

    pub fn occurrences(&self, key: &str) -> u64 {
        self.entries.get(key).map(|s| s.occurrences).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn reset(&mut self) {
        self.entries.clear();
    }

    /// All keys, sorted by name.
    pub fn snapshot(&self) -> Vec<KeySnapshot> {
        let mut out: Vec<KeySnapshot> = self
            .entries
            .iter()
            .map(|(key, s)| KeySnapshot {
                key: key.clone(),
                recorded: s.recorded,
                occurrences: s.occurrences,
                fired: s.fired,
                last_fired: s.last_fired,
                window_ms: s.window_ms,
                window_count: s.window_count(),
            })
            .collect();
        out.sort_by(|a, b| a.key.cmp(&b.key));
        out
    }
}
