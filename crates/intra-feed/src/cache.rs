//! Tier-aware quote cache.
//!
//! One entry per tracked instrument behind a `DashMap`, each guarded by
//! its own lock so a tier change never stalls concurrent readers of
//! other instruments. Freshness is measured against the tier's refresh
//! cadence using monotonic time.

use dashmap::DashMap;
use intra_core::{DataPriority, InstrumentId, QuoteSnapshot};
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::debug;

struct CacheEntry {
    snapshot: Option<QuoteSnapshot>,
    refreshed_at: Option<Instant>,
    priority: DataPriority,
    history: VecDeque<QuoteSnapshot>,
}

impl CacheEntry {
    fn new(priority: DataPriority) -> Self {
        Self {
            snapshot: None,
            refreshed_at: None,
            priority,
            history: VecDeque::new(),
        }
    }

    fn is_fresh(&self) -> bool {
        match self.refreshed_at {
            Some(at) => at.elapsed() < self.priority.refresh_cadence(),
            None => false,
        }
    }
}

type Entry = Arc<RwLock<CacheEntry>>;

/// Short-lived quote cache with per-instrument history rings.
pub struct QuoteCache {
    entries: DashMap<InstrumentId, Entry>,
    history_len: usize,
}

impl QuoteCache {
    pub fn new(history_len: usize) -> Self {
        Self {
            entries: DashMap::new(),
            history_len,
        }
    }

    /// Start tracking an instrument. Idempotent; an existing entry keeps
    /// its data and only adopts the new tier.
    pub fn track(&self, instrument: InstrumentId, priority: DataPriority) {
        match self.entries.entry(instrument) {
            dashmap::mapref::entry::Entry::Occupied(occupied) => {
                occupied.get().write().priority = priority;
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(Arc::new(RwLock::new(CacheEntry::new(priority))));
            }
        }
    }

    pub fn untrack(&self, instrument: &InstrumentId) {
        if self.entries.remove(instrument).is_some() {
            debug!(%instrument, "instrument untracked");
        }
    }

    pub fn is_tracked(&self, instrument: &InstrumentId) -> bool {
        self.entries.contains_key(instrument)
    }

    /// Change an instrument's tier. Idempotent; no-op when untracked.
    pub fn set_priority(&self, instrument: &InstrumentId, priority: DataPriority) {
        if let Some(entry) = self.entries.get(instrument) {
            let mut guard = entry.write();
            if guard.priority != priority {
                debug!(%instrument, from = %guard.priority, to = %priority, "tier changed");
                guard.priority = priority;
            }
        }
    }

    pub fn priority(&self, instrument: &InstrumentId) -> Option<DataPriority> {
        self.entries.get(instrument).map(|e| e.read().priority)
    }

    /// Snapshot if younger than the tier cadence.
    pub fn fresh(&self, instrument: &InstrumentId) -> Option<QuoteSnapshot> {
        let entry = self.entries.get(instrument)?;
        let guard = entry.read();
        if guard.is_fresh() {
            guard.snapshot.clone()
        } else {
            None
        }
    }

    /// Last snapshot regardless of age.
    pub fn last_known(&self, instrument: &InstrumentId) -> Option<QuoteSnapshot> {
        let entry = self.entries.get(instrument)?;
        let guard = entry.read();
        guard.snapshot.clone()
    }

    /// Store a polled snapshot, resetting the TTL clock.
    pub fn store(&self, snapshot: QuoteSnapshot) {
        self.store_inner(snapshot);
    }

    /// Store a stream push. Pushes always win over TTL: the entry is
    /// refreshed unconditionally, even for instruments tracked at a
    /// poll-only tier.
    pub fn apply_push(&self, snapshot: QuoteSnapshot) {
        self.store_inner(snapshot);
    }

    fn store_inner(&self, snapshot: QuoteSnapshot) {
        let Some(entry) = self.entries.get(&snapshot.instrument) else {
            return;
        };
        let mut guard = entry.write();
        guard.refreshed_at = Some(Instant::now());
        if self.history_len > 0 {
            if guard.history.len() == self.history_len {
                guard.history.pop_front();
            }
            guard.history.push_back(snapshot.clone());
        }
        guard.snapshot = Some(snapshot);
    }

    /// Recent snapshots, oldest first.
    pub fn history(&self, instrument: &InstrumentId) -> Vec<QuoteSnapshot> {
        self.entries
            .get(instrument)
            .map(|e| e.read().history.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn tracked(&self) -> Vec<InstrumentId> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
