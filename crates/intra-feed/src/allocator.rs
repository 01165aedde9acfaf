//! Live-stream slot allocator.
//!
//! The broker allows a fixed number of concurrent stream registrations
//! (41 on the production endpoint). Slots are bound per (instrument,
//! channel); a critical instrument takes two (ticks + book), a high-tier
//! instrument one. The allocator is pure bookkeeping behind one mutex;
//! callers execute the subscribe/unsubscribe side effects described by
//! the returned decisions.

use intra_core::{ChannelKind, DataPriority, InstrumentId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Allocator configuration.
#[derive(Debug, Clone)]
pub struct AllocatorConfig {
    /// Hard cap on bound slots (external protocol limit).
    pub capacity: usize,
    /// How much a challenger must beat the weakest bound score by to
    /// force an emergency substitution.
    pub eviction_margin: f64,
    /// Freeze on positive score nudges after an eviction, to damp
    /// substitution oscillation.
    pub score_cooldown: Duration,
    /// Score assigned to instruments never seen before.
    pub baseline_score: f64,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            capacity: 41,
            eviction_margin: 5.0,
            score_cooldown: Duration::from_secs(300),
            baseline_score: 50.0,
        }
    }
}

/// Outcome of a slot request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotDecision {
    /// Bound; caller subscribes the listed channels.
    Granted { channels: Vec<ChannelKind> },
    /// Bound after evicting lower-scoring instruments; caller
    /// unsubscribes the victims' channels first.
    Evicted {
        victims: Vec<(InstrumentId, Vec<ChannelKind>)>,
        channels: Vec<ChannelKind>,
    },
    /// No slot available; caller falls back to polled access.
    Denied,
}

/// One bound instrument as seen from outside.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotView {
    pub instrument: InstrumentId,
    pub tier: DataPriority,
    pub channels: Vec<ChannelKind>,
    pub score: f64,
}

/// Channel changes produced by a rebalance, in safe execution order:
/// all evictions precede all admissions, so the bound count never
/// exceeds capacity mid-transition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RebalanceOutcome {
    pub evicted: Vec<(InstrumentId, Vec<ChannelKind>)>,
    pub admitted: Vec<(InstrumentId, Vec<ChannelKind>)>,
}

struct Binding {
    tier: DataPriority,
    channels: Vec<ChannelKind>,
}

struct ScoreEntry {
    score: f64,
    frozen_until: Option<Instant>,
}

struct AllocState {
    bindings: HashMap<InstrumentId, Binding>,
    scores: HashMap<InstrumentId, ScoreEntry>,
    used: usize,
}

impl AllocState {
    fn score_of(&self, instrument: &InstrumentId, baseline: f64) -> f64 {
        self.scores
            .get(instrument)
            .map(|s| s.score)
            .unwrap_or(baseline)
    }

    /// Weakest bound instrument by score.
    fn weakest(&self, baseline: f64) -> Option<(InstrumentId, f64)> {
        self.bindings
            .keys()
            .map(|id| (id.clone(), self.score_of(id, baseline)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }

    fn unbind(&mut self, instrument: &InstrumentId) -> Option<Vec<ChannelKind>> {
        let binding = self.bindings.remove(instrument)?;
        self.used -= binding.channels.len();
        Some(binding.channels)
    }

    fn bind(&mut self, instrument: InstrumentId, tier: DataPriority) -> Vec<ChannelKind> {
        let channels: Vec<ChannelKind> = tier.channels().to_vec();
        self.used += channels.len();
        self.bindings.insert(
            instrument,
            Binding {
                tier,
                channels: channels.clone(),
            },
        );
        channels
    }
}

/// Fixed-pool subscription allocator.
pub struct SlotAllocator {
    config: AllocatorConfig,
    state: Mutex<AllocState>,
}

impl SlotAllocator {
    pub fn new(config: AllocatorConfig) -> Self {
        Self {
            config,
            state: Mutex::new(AllocState {
                bindings: HashMap::new(),
                scores: HashMap::new(),
                used: 0,
            }),
        }
    }

    /// Request live slots for an instrument at a stream-eligible tier.
    ///
    /// `priority_score` updates the requester's performance score first,
    /// unless the score is frozen after a recent eviction (the cooldown
    /// that damps substitution oscillation). Grants from free capacity
    /// when possible; otherwise attempts an emergency substitution
    /// against the weakest bound instruments. Each victim must score
    /// below `requester - eviction_margin`, and victims are only
    /// committed once enough slots are covered, so a denied request has
    /// no side effects.
    pub fn request_slot(
        &self,
        instrument: &InstrumentId,
        tier: DataPriority,
        priority_score: Option<f64>,
    ) -> SlotDecision {
        let cost = tier.slot_cost();
        if cost == 0 {
            debug!(%instrument, %tier, "tier not stream eligible");
            return SlotDecision::Denied;
        }

        let mut state = self.state.lock();

        if let Some(score) = priority_score {
            let now = Instant::now();
            let entry = state
                .scores
                .entry(instrument.clone())
                .or_insert(ScoreEntry {
                    score: self.config.baseline_score,
                    frozen_until: None,
                });
            let frozen = entry.frozen_until.is_some_and(|until| now < until);
            if !frozen {
                entry.score = score.clamp(0.0, 100.0);
            }
        }

        // Already bound at this tier: idempotent grant.
        if let Some(binding) = state.bindings.get(instrument) {
            if binding.tier == tier {
                return SlotDecision::Granted {
                    channels: binding.channels.clone(),
                };
            }
            // Tier change: release the old binding and fall through.
            state.unbind(instrument);
        }

        let requester_score = state.score_of(instrument, self.config.baseline_score);
        let free = self.config.capacity - state.used;

        if free >= cost {
            let channels = state.bind(instrument.clone(), tier);
            debug_assert!(state.used <= self.config.capacity);
            return SlotDecision::Granted { channels };
        }

        // Emergency substitution: pick victims weakest-first, commit only
        // if the whole plan clears the margin.
        let mut victims: Vec<(InstrumentId, f64)> = Vec::new();
        let mut reclaimable = free;
        while reclaimable < cost {
            let candidate = {
                let taken: Vec<&InstrumentId> = victims.iter().map(|(id, _)| id).collect();
                state
                    .bindings
                    .keys()
                    .filter(|id| !taken.contains(id))
                    .map(|id| (id.clone(), state.score_of(id, self.config.baseline_score)))
                    .min_by(|a, b| a.1.total_cmp(&b.1))
            };
            let Some((victim, victim_score)) = candidate else {
                return SlotDecision::Denied;
            };
            if requester_score < victim_score + self.config.eviction_margin {
                return SlotDecision::Denied;
            }
            reclaimable += state.bindings[&victim].channels.len();
            victims.push((victim, victim_score));
        }

        let now = Instant::now();
        let mut evicted = Vec::with_capacity(victims.len());
        for (victim, victim_score) in victims {
            let channels = state.unbind(&victim).unwrap_or_default();
            state.scores.insert(
                victim.clone(),
                ScoreEntry {
                    score: victim_score,
                    frozen_until: Some(now + self.config.score_cooldown),
                },
            );
            info!(%victim, challenger = %instrument, "emergency slot substitution");
            evicted.push((victim, channels));
        }

        let channels = state.bind(instrument.clone(), tier);
        debug_assert!(state.used <= self.config.capacity);
        SlotDecision::Evicted {
            victims: evicted,
            channels,
        }
    }

    /// Release all slots held by an instrument. Returns the channels
    /// that were bound (empty when it held none).
    pub fn release(&self, instrument: &InstrumentId) -> Vec<ChannelKind> {
        let mut state = self.state.lock();
        state.unbind(instrument).unwrap_or_default()
    }

    /// Reconcile bindings against the target composition for the active
    /// profile: `desired` is the ranked candidate list, best first, each
    /// with its target tier.
    ///
    /// Instruments bound but absent from `desired` are evicted;
    /// remaining candidates are admitted in rank order while capacity
    /// lasts. Evictions are listed before admissions so executing the
    /// outcome in order keeps the bound count under the cap throughout.
    pub fn rebalance(&self, desired: &[(InstrumentId, DataPriority)]) -> RebalanceOutcome {
        let mut state = self.state.lock();
        let mut outcome = RebalanceOutcome::default();

        let target: HashMap<&InstrumentId, DataPriority> = desired
            .iter()
            .filter(|(_, tier)| tier.stream_eligible())
            .map(|(id, tier)| (id, *tier))
            .collect();

        // Phase 1: evict stale or re-tiered bindings.
        let bound: Vec<InstrumentId> = state.bindings.keys().cloned().collect();
        for instrument in bound {
            let keep = target
                .get(&instrument)
                .is_some_and(|tier| state.bindings[&instrument].tier == *tier);
            if !keep {
                if let Some(channels) = state.unbind(&instrument) {
                    outcome.evicted.push((instrument, channels));
                }
            }
        }

        // Phase 2: admit the top-ranked candidates that fit.
        for (instrument, tier) in desired {
            if !tier.stream_eligible() || state.bindings.contains_key(instrument) {
                continue;
            }
            let cost = tier.slot_cost();
            if state.used + cost > self.config.capacity {
                continue;
            }
            let channels = state.bind(instrument.clone(), *tier);
            outcome.admitted.push((instrument.clone(), channels));
        }

        debug_assert!(state.used <= self.config.capacity);
        if !outcome.evicted.is_empty() || !outcome.admitted.is_empty() {
            info!(
                evicted = outcome.evicted.len(),
                admitted = outcome.admitted.len(),
                used = state.used,
                capacity = self.config.capacity,
                "slot rebalance"
            );
        }
        outcome
    }

    /// Nudge an instrument's performance score from realized outcomes.
    /// Positive nudges are ignored while the score is frozen after an
    /// eviction.
    pub fn record_outcome(&self, instrument: &InstrumentId, delta: f64) {
        let mut state = self.state.lock();
        let baseline = self.config.baseline_score;
        let entry = state
            .scores
            .entry(instrument.clone())
            .or_insert(ScoreEntry {
                score: baseline,
                frozen_until: None,
            });

        if delta > 0.0 {
            if let Some(until) = entry.frozen_until {
                if Instant::now() < until {
                    return;
                }
                entry.frozen_until = None;
            }
        }
        entry.score = (entry.score + delta).clamp(0.0, 100.0);
    }

    pub fn score(&self, instrument: &InstrumentId) -> f64 {
        self.state
            .lock()
            .score_of(instrument, self.config.baseline_score)
    }

    pub fn bound(&self) -> Vec<SlotView> {
        let state = self.state.lock();
        state
            .bindings
            .iter()
            .map(|(id, binding)| SlotView {
                instrument: id.clone(),
                tier: binding.tier,
                channels: binding.channels.clone(),
                score: state.score_of(id, self.config.baseline_score),
            })
            .collect()
    }

    pub fn used(&self) -> usize {
        self.state.lock().used
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    pub fn weakest_bound(&self) -> Option<(InstrumentId, f64)> {
        self.state.lock().weakest(self.config.baseline_score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u32) -> InstrumentId {
        InstrumentId::new(format!("{n:06}")).unwrap()
    }

    fn allocator(capacity: usize) -> SlotAllocator {
        SlotAllocator::new(AllocatorConfig {
            capacity,
            eviction_margin: 5.0,
            score_cooldown: Duration::from_secs(300),
            baseline_score: 50.0,
        })
    }

    #[test]
    fn test_grant_from_free_capacity() {
        let alloc = allocator(4);
        let decision = alloc.request_slot(&id(1), DataPriority::Critical, None);
        assert!(matches!(decision, SlotDecision::Granted { ref channels } if channels.len() == 2));
        assert_eq!(alloc.used(), 2);
    }

    #[test]
    fn test_capacity_never_exceeded() {
        let alloc = allocator(5);
        for n in 0..10 {
            alloc.request_slot(&id(n), DataPriority::High, None);
            assert!(alloc.used() <= 5);
        }
        assert_eq!(alloc.used(), 5);
    }

    #[test]
    fn test_poll_tier_denied() {
        let alloc = allocator(5);
        assert_eq!(
            alloc.request_slot(&id(1), DataPriority::Medium, None),
            SlotDecision::Denied
        );
        assert_eq!(alloc.used(), 0);
    }

    #[test]
    fn test_release_frees_exactly_held_slots() {
        let alloc = allocator(5);
        alloc.request_slot(&id(1), DataPriority::Critical, None);
        alloc.request_slot(&id(2), DataPriority::High, None);
        assert_eq!(alloc.used(), 3);

        let freed = alloc.release(&id(1));
        assert_eq!(freed.len(), 2);
        assert_eq!(alloc.used(), 1);

        // Releasing again frees nothing
        assert!(alloc.release(&id(1)).is_empty());
        assert_eq!(alloc.used(), 1);
    }

    #[test]
    fn test_idempotent_regrant() {
        let alloc = allocator(5);
        alloc.request_slot(&id(1), DataPriority::High, None);
        alloc.request_slot(&id(1), DataPriority::High, None);
        assert_eq!(alloc.used(), 1);
    }

    #[test]
    fn test_emergency_substitution_needs_margin() {
        let alloc = allocator(1);
        alloc.request_slot(&id(1), DataPriority::High, None);

        // Equal score: denied (margin not cleared)
        assert_eq!(
            alloc.request_slot(&id(2), DataPriority::High, None),
            SlotDecision::Denied
        );

        // Challenger clears the margin: weakest is evicted
        alloc.record_outcome(&id(2), 10.0); // 60 vs bound 50, margin 5
        let decision = alloc.request_slot(&id(2), DataPriority::High, None);
        let SlotDecision::Evicted { victims, .. } = decision else {
            panic!("expected eviction, got {decision:?}");
        };
        assert_eq!(victims[0].0, id(1));
        assert_eq!(alloc.used(), 1);
    }

    #[test]
    fn test_substitution_may_evict_multiple_victims() {
        let alloc = allocator(2);
        alloc.request_slot(&id(1), DataPriority::High, None);
        alloc.request_slot(&id(2), DataPriority::High, None);

        alloc.record_outcome(&id(3), 30.0); // 80 vs 50+5
        let decision = alloc.request_slot(&id(3), DataPriority::Critical, None);
        let SlotDecision::Evicted { victims, channels } = decision else {
            panic!("expected eviction");
        };
        assert_eq!(victims.len(), 2);
        assert_eq!(channels.len(), 2);
        assert_eq!(alloc.used(), 2);
    }

    #[test]
    fn test_denied_substitution_has_no_side_effects() {
        let alloc = allocator(2);
        alloc.request_slot(&id(1), DataPriority::High, None);
        alloc.request_slot(&id(2), DataPriority::High, None);
        alloc.record_outcome(&id(2), 40.0); // strong second binding

        // Challenger beats id(1) but not id(2); needs both slots → denied
        alloc.record_outcome(&id(3), 20.0);
        assert_eq!(
            alloc.request_slot(&id(3), DataPriority::Critical, None),
            SlotDecision::Denied
        );
        assert_eq!(alloc.used(), 2);
        assert_eq!(alloc.bound().len(), 2);
    }

    #[test]
    fn test_eviction_freezes_positive_nudges() {
        let alloc = allocator(1);
        alloc.request_slot(&id(1), DataPriority::High, None);
        alloc.record_outcome(&id(2), 10.0);
        alloc.request_slot(&id(2), DataPriority::High, None); // evicts id(1)

        let before = alloc.score(&id(1));
        alloc.record_outcome(&id(1), 10.0); // frozen, ignored
        assert_eq!(alloc.score(&id(1)), before);

        alloc.record_outcome(&id(1), -10.0); // negative still applies
        assert_eq!(alloc.score(&id(1)), before - 10.0);
    }

    #[test]
    fn test_request_score_drives_substitution() {
        let alloc = allocator(1);
        alloc.request_slot(&id(1), DataPriority::High, None);

        // Carrying a strong score evicts the baseline-scored holder.
        let decision = alloc.request_slot(&id(2), DataPriority::High, Some(70.0));
        assert!(matches!(decision, SlotDecision::Evicted { .. }));

        // The evicted instrument's score is frozen: re-requesting with a
        // high claimed score right away cannot oscillate back in.
        let decision = alloc.request_slot(&id(1), DataPriority::High, Some(95.0));
        assert_eq!(decision, SlotDecision::Denied);
        assert_eq!(alloc.score(&id(1)), 50.0);
    }

    #[test]
    fn test_rebalance_evicts_then_admits_within_cap() {
        let alloc = allocator(3);
        alloc.request_slot(&id(1), DataPriority::High, None);
        alloc.request_slot(&id(2), DataPriority::High, None);
        alloc.request_slot(&id(3), DataPriority::High, None);
        assert_eq!(alloc.used(), 3);

        // New profile: id(4) critical + id(2) high; id(1)/id(3) gone
        let outcome = alloc.rebalance(&[
            (id(4), DataPriority::Critical),
            (id(2), DataPriority::High),
        ]);

        let evicted: Vec<_> = outcome.evicted.iter().map(|(i, _)| i.clone()).collect();
        assert!(evicted.contains(&id(1)));
        assert!(evicted.contains(&id(3)));
        assert_eq!(outcome.admitted.len(), 1);
        assert_eq!(outcome.admitted[0].0, id(4));
        assert_eq!(alloc.used(), 3); // 2 (critical) + 1 (high)
    }

    #[test]
    fn test_rebalance_respects_rank_under_pressure() {
        let alloc = allocator(3);
        // Desired wants more than fits: 2+2 critical slots into 3
        let outcome = alloc.rebalance(&[
            (id(1), DataPriority::Critical),
            (id(2), DataPriority::Critical),
            (id(3), DataPriority::High),
        ]);
        // Top-ranked critical admitted, second skipped, high fits
        let admitted: Vec<_> = outcome.admitted.iter().map(|(i, _)| i.clone()).collect();
        assert_eq!(admitted, vec![id(1), id(3)]);
        assert_eq!(alloc.used(), 3);
    }

    #[test]
    fn test_rebalance_retiers_bound_instrument() {
        let alloc = allocator(4);
        alloc.request_slot(&id(1), DataPriority::High, None);

        let outcome = alloc.rebalance(&[(id(1), DataPriority::Critical)]);
        assert_eq!(outcome.evicted.len(), 1);
        assert_eq!(outcome.admitted.len(), 1);
        assert_eq!(alloc.used(), 2);
        let views = alloc.bound();
        assert_eq!(views[0].tier, DataPriority::Critical);
    }
}
