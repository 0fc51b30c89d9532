//! # Counter Aggregator
//!
//! Per-key unread counts seeded from a snapshot and advanced by live events.
//!
//! Until the baseline of the current epoch is loaded, increments are buffered
//! in arrival order and resets are remembered, so that the baseline can be
//! merged without losing or double counting anything:
//!
//! ```text
//! count(key) = baseline_or_last_reset + increments_since_that_point
//! ```
//!
//! - **Version**: 1.1.0
//! - **Since**: 1.0.0
//!
//! ## Changelog
//! - 1.1.0: Resync epochs and the badge total watch
//! - 1.0.0: Initial release

use log::{debug, warn};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

#[derive(Debug, Default)]
struct CounterState {
    counts: HashMap<String, u64>,
    baseline_loaded: bool,
    /// Increments received before the baseline, in arrival order
    pending: Vec<String>,
    /// Keys reset before the baseline; their baseline value is overridden with 0
    reset_keys: HashSet<String>,
    epoch: u64,
}

impl CounterState {
    fn total(&self) -> u64 {
        self.counts.values().sum()
    }
}

pub struct CounterAggregator {
    state: Mutex<CounterState>,
    total_tx: watch::Sender<u64>,
}

impl Default for CounterAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl CounterAggregator {
    pub fn new() -> Self {
        let (total_tx, _) = watch::channel(0);
        Self {
            state: Mutex::new(CounterState::default()),
            total_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CounterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish_total(&self, state: &CounterState) {
        let total = state.total();
        self.total_tx.send_if_modified(|current| {
            if *current == total {
                false
            } else {
                *current = total;
                true
            }
        });
    }

    /// Count one new unread item for `key`
    pub fn increment(&self, key: &str) {
        let mut state = self.lock();
        if state.baseline_loaded {
            *state.counts.entry(key.to_string()).or_insert(0) += 1;
            self.publish_total(&state);
        } else {
            state.pending.push(key.to_string());
        }
    }

    /// Mark everything for `key` read. Wins over every increment and baseline
    /// value that came before it.
    pub fn reset(&self, key: &str) {
        let mut state = self.lock();
        state.counts.insert(key.to_string(), 0);
        if !state.baseline_loaded {
            state.pending.retain(|pending| pending != key);
            state.reset_keys.insert(key.to_string());
        }
        self.publish_total(&state);
        debug!("Reset unread count for {}", key);
    }

    pub fn get(&self, key: &str) -> u64 {
        self.lock().counts.get(key).copied().unwrap_or(0)
    }

    /// Copy of every count
    pub fn get_all(&self) -> HashMap<String, u64> {
        self.lock().counts.clone()
    }

    pub fn total(&self) -> u64 {
        self.lock().total()
    }

    /// Seed the current epoch from a snapshot.
    ///
    /// Replaces the counts, zeroes keys reset since the epoch began, then
    /// replays buffered increments in arrival order. Returns `false` (and
    /// changes nothing) if this epoch already has a baseline.
    pub fn load_baseline(&self, baseline: HashMap<String, u64>) -> bool {
        let mut state = self.lock();
        if state.baseline_loaded {
            warn!(
                "Ignoring second baseline for epoch {} ({} keys)",
                state.epoch,
                baseline.len()
            );
            return false;
        }

        let resets: Vec<String> = state.reset_keys.drain().collect();
        let pending = std::mem::take(&mut state.pending);
        let replayed = pending.len();

        state.counts = baseline;
        for key in resets {
            state.counts.insert(key, 0);
        }
        for key in pending {
            *state.counts.entry(key).or_insert(0) += 1;
        }
        state.baseline_loaded = true;
        self.publish_total(&state);

        debug!(
            "Loaded baseline for epoch {} ({} keys, {} buffered increments)",
            state.epoch,
            state.counts.len(),
            replayed
        );
        true
    }

    /// Start a new epoch. Counts stay visible (stale) until the next baseline.
    pub fn begin_resync(&self) -> u64 {
        let mut state = self.lock();
        state.epoch += 1;
        state.baseline_loaded = false;
        state.pending.clear();
        state.reset_keys.clear();
        state.epoch
    }

    pub fn is_baseline_loaded(&self) -> bool {
        self.lock().baseline_loaded
    }

    pub fn epoch(&self) -> u64 {
        self.lock().epoch
    }

    /// Increments waiting for the baseline
    pub fn buffered_len(&self) -> usize {
        self.lock().pending.len()
    }

    /// Running total, for badge display
    pub fn subscribe_total(&self) -> watch::Receiver<u64> {
        self.total_tx.subscribe()
    }
}
