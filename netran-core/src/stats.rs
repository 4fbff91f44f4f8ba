//! Named-counter statistics shared between a primitive and its readers.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

/// Point-in-time snapshot of named counters, sorted by name.
pub type Counters = BTreeMap<String, u64>;

/// Thread-safe counter board.
///
/// A primitive keeps one clone and writes to it from its worker thread; the
/// worker and orchestrator keep other clones and read snapshots at any time.
#[derive(Debug, Clone, Default)]
pub struct StatsBoard {
    counters: Arc<RwLock<Counters>>,
}

impl StatsBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites a counter.
    pub fn set(&self, name: &str, value: u64) {
        let mut counters = self.counters.write();
        match counters.get_mut(name) {
            Some(slot) => *slot = value,
            None => {
                counters.insert(name.to_owned(), value);
            }
        }
    }

    /// Adds `delta` to a counter, creating it at zero if missing.
    pub fn add(&self, name: &str, delta: u64) {
        let mut counters = self.counters.write();
        match counters.get_mut(name) {
            Some(slot) => *slot = slot.saturating_add(delta),
            None => {
                counters.insert(name.to_owned(), delta);
            }
        }
    }

    /// Applies several additions under one write lock.
    pub fn add_all(&self, deltas: &[(&str, u64)]) {
        let mut counters = self.counters.write();
        for &(name, delta) in deltas {
            let slot = counters.entry(name.to_owned()).or_insert(0);
            *slot = slot.saturating_add(delta);
        }
    }

    pub fn get(&self, name: &str) -> Option<u64> {
        self.counters.read().get(name).copied()
    }

    pub fn snapshot(&self) -> Counters {
        self.counters.read().clone()
    }
}
