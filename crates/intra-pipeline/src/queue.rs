//! Bounded priority queue for candidate signals.
//!
//! Ordered by ensemble score (high first), ties broken older-first so a
//! strong signal is never starved by a newer equal one. Under
//! backpressure the weakest queued entry is dropped to admit a stronger
//! arrival; weaker arrivals are rejected outright.

use intra_strategy::TradeSignal;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Result of a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Queue was full; the weakest entry was dropped to make room.
    ReplacedLowest,
    /// Queue was full and the arrival ranked below everything queued.
    RejectedFull,
}

struct Ranked(TradeSignal);

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked {}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        // Score descending; on a tie the older signal ranks higher.
        self.0
            .ensemble_score
            .cmp(&other.0.ensemble_score)
            .then_with(|| other.0.created_at.cmp(&self.0.created_at))
    }
}

/// The shared signal queue.
pub struct SignalQueue {
    heap: Mutex<BinaryHeap<Ranked>>,
    capacity: usize,
    notify: Notify,
    dropped: AtomicU64,
}

impl SignalQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Push a candidate, applying admission control when full.
    pub fn push(&self, signal: TradeSignal) -> PushOutcome {
        let outcome = {
            let mut heap = self.heap.lock();
            if heap.len() < self.capacity {
                heap.push(Ranked(signal));
                PushOutcome::Queued
            } else {
                let incoming = Ranked(signal);
                let mut items = std::mem::take(&mut *heap).into_vec();
                let weakest = items
                    .iter()
                    .enumerate()
                    .min_by(|(_, a), (_, b)| a.cmp(b))
                    .map(|(i, _)| i);
                match weakest {
                    Some(index) if incoming > items[index] => {
                        items.swap_remove(index);
                        items.push(incoming);
                        *heap = BinaryHeap::from(items);
                        self.dropped.fetch_add(1, AtomicOrdering::Relaxed);
                        PushOutcome::ReplacedLowest
                    }
                    _ => {
                        *heap = BinaryHeap::from(items);
                        self.dropped.fetch_add(1, AtomicOrdering::Relaxed);
                        PushOutcome::RejectedFull
                    }
                }
            }
        };

        if outcome != PushOutcome::RejectedFull {
            self.notify.notify_one();
        } else {
            debug!("signal rejected, queue full of stronger candidates");
        }
        outcome
    }

    /// Take the highest-priority signal, waiting until one is available
    /// or shutdown is signalled.
    pub async fn pop(&self, token: &CancellationToken) -> Option<TradeSignal> {
        loop {
            let notified = self.notify.notified();
            if let Some(ranked) = self.heap.lock().pop() {
                return Some(ranked.0);
            }
            tokio::select! {
                () = notified => {}
                () = token.cancelled() => return None,
            }
        }
    }

    /// Non-blocking take, for drains and tests.
    pub fn try_pop(&self) -> Option<TradeSignal> {
        self.heap.lock().pop().map(|ranked| ranked.0)
    }

    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.lock().is_empty()
    }

    /// Signals dropped or rejected under backpressure since startup.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(AtomicOrdering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};
    use intra_core::{InstrumentId, OrderSide, Price};
    use intra_strategy::StrategyId;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn signal(code: u32, score: Decimal, age_secs: i64) -> TradeSignal {
        TradeSignal {
            instrument: InstrumentId::new(format!("{code:06}")).unwrap(),
            strategy: StrategyId::Momentum,
            side: OrderSide::Buy,
            strength: score,
            ensemble_score: score,
            price_at_signal: Price::new(dec!(10000)),
            created_at: Utc::now() - ChronoDuration::seconds(age_secs),
        }
    }

    #[test]
    fn test_pop_order_is_score_desc() {
        let queue = SignalQueue::new(10);
        queue.push(signal(1, dec!(60), 0));
        queue.push(signal(2, dec!(90), 0));
        queue.push(signal(3, dec!(75), 0));

        assert_eq!(queue.try_pop().unwrap().ensemble_score, dec!(90));
        assert_eq!(queue.try_pop().unwrap().ensemble_score, dec!(75));
        assert_eq!(queue.try_pop().unwrap().ensemble_score, dec!(60));
        assert!(queue.try_pop().is_none());
    }

    #[test]
    fn test_score_tie_pops_older_first() {
        let queue = SignalQueue::new(10);
        queue.push(signal(1, dec!(70), 5));
        queue.push(signal(2, dec!(70), 30)); // older
        queue.push(signal(3, dec!(70), 1));

        assert_eq!(queue.try_pop().unwrap().instrument.as_str(), "000002");
        assert_eq!(queue.try_pop().unwrap().instrument.as_str(), "000001");
        assert_eq!(queue.try_pop().unwrap().instrument.as_str(), "000003");
    }

    #[test]
    fn test_full_queue_drops_weakest_for_stronger() {
        let queue = SignalQueue::new(2);
        assert_eq!(queue.push(signal(1, dec!(50), 0)), PushOutcome::Queued);
        assert_eq!(queue.push(signal(2, dec!(70), 0)), PushOutcome::Queued);

        assert_eq!(
            queue.push(signal(3, dec!(80), 0)),
            PushOutcome::ReplacedLowest
        );
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dropped_count(), 1);

        // The 50-score entry is gone
        assert_eq!(queue.try_pop().unwrap().ensemble_score, dec!(80));
        assert_eq!(queue.try_pop().unwrap().ensemble_score, dec!(70));
    }

    #[test]
    fn test_full_queue_rejects_weaker() {
        let queue = SignalQueue::new(2);
        queue.push(signal(1, dec!(70), 0));
        queue.push(signal(2, dec!(80), 0));

        assert_eq!(
            queue.push(signal(3, dec!(40), 0)),
            PushOutcome::RejectedFull
        );
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn test_pop_wakes_on_push() {
        use std::sync::Arc;

        let queue = Arc::new(SignalQueue::new(4));
        let token = CancellationToken::new();

        let waiter = {
            let queue = queue.clone();
            let token = token.clone();
            tokio::spawn(async move { queue.pop(&token).await })
        };

        tokio::task::yield_now().await;
        queue.push(signal(1, dec!(66), 0));

        let popped = waiter.await.unwrap().unwrap();
        assert_eq!(popped.ensemble_score, dec!(66));
    }

    #[tokio::test]
    async fn test_pop_returns_none_on_shutdown() {
        use std::sync::Arc;

        let queue = Arc::new(SignalQueue::new(4));
        let token = CancellationToken::new();
        token.cancel();
        assert!(queue.pop(&token).await.is_none());
    }
}
