//! Analysis worker pool.
//!
//! Each worker owns a disjoint slice of the watched set, re-dealt every
//! reshuffle period so no instrument is stuck with a lagging worker.
//! Workers only produce signals; they never touch orders or positions.

use crate::queue::SignalQueue;
use intra_feed::HybridFeed;
use intra_persistence::{Record, SignalRecord};
use intra_scheduler::ActiveProfile;
use intra_strategy::EnsembleCombiner;
use intra_telemetry::DailyStats;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of analysis workers.
    pub workers: usize,
    /// Scan cadence per worker.
    pub scan_interval: Duration,
    /// How often the instrument-to-worker deal is reshuffled.
    pub reshuffle_period: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            scan_interval: Duration::from_secs(2),
            reshuffle_period: Duration::from_secs(300),
        }
    }
}

/// Deterministic worker assignment: all workers agree on the deal for a
/// given round without coordination.
fn assigned_to(instrument: &intra_core::InstrumentId, round: u64, workers: usize, index: usize) -> bool {
    let mut hasher = DefaultHasher::new();
    instrument.hash(&mut hasher);
    round.hash(&mut hasher);
    (hasher.finish() as usize) % workers == index
}

/// Spawn the worker pool.
pub fn spawn_workers(
    config: WorkerConfig,
    feed: Arc<HybridFeed>,
    combiner: Arc<EnsembleCombiner>,
    profile_rx: watch::Receiver<ActiveProfile>,
    queue: Arc<SignalQueue>,
    stats: Arc<DailyStats>,
    record_tx: mpsc::Sender<Record>,
    token: CancellationToken,
) -> Vec<JoinHandle<()>> {
    let workers = config.workers.max(1);
    (0..workers)
        .map(|index| {
            let config = config.clone();
            let feed = feed.clone();
            let combiner = combiner.clone();
            let profile_rx = profile_rx.clone();
            let queue = queue.clone();
            let stats = stats.clone();
            let record_tx = record_tx.clone();
            let token = token.clone();
            tokio::spawn(async move {
                run_worker(
                    index, workers, config, feed, combiner, profile_rx, queue, stats, record_tx,
                    token,
                )
                .await;
            })
        })
        .collect()
}

#[allow(clippy::too_many_arguments)]
async fn run_worker(
    index: usize,
    workers: usize,
    config: WorkerConfig,
    feed: Arc<HybridFeed>,
    combiner: Arc<EnsembleCombiner>,
    profile_rx: watch::Receiver<ActiveProfile>,
    queue: Arc<SignalQueue>,
    stats: Arc<DailyStats>,
    record_tx: mpsc::Sender<Record>,
    token: CancellationToken,
) {
    info!(worker = index, "analysis worker started");
    let mut ticker = tokio::time::interval(config.scan_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = token.cancelled() => {
                info!(worker = index, "analysis worker shutting down");
                return;
            }
            _ = ticker.tick() => {}
        }

        let profile = profile_rx.borrow().clone();
        let Some(profile) = profile.profile().cloned() else {
            continue; // idle window: nothing to scan
        };

        // Wall-clock round: every worker computes the same deal.
        let round =
            chrono::Utc::now().timestamp() as u64 / config.reshuffle_period.as_secs().max(1);

        for instrument in feed.tracked() {
            if !assigned_to(&instrument, round, workers, index) {
                continue;
            }
            if token.is_cancelled() {
                return;
            }

            // One bad instrument must not take the rest of the subset
            // down with it.
            let quote = match feed.quote(&instrument).await {
                Ok(quote) => quote,
                Err(e) => {
                    warn!(worker = index, %instrument, ?e, "scan skipped");
                    continue;
                }
            };
            if quote.stale {
                debug!(worker = index, %instrument, "stale quote, not signalling");
                continue;
            }

            let history = feed.history(&instrument);
            let Some(signal) = combiner.evaluate(&quote, &history, &profile.weights) else {
                continue;
            };

            debug!(
                worker = index,
                %instrument,
                side = %signal.side,
                score = %signal.ensemble_score,
                "signal enqueued"
            );
            stats.record_signal();
            let record = Record::Signal(SignalRecord {
                created_at: signal.created_at,
                instrument: signal.instrument.to_string(),
                strategy: signal.strategy.as_str().to_string(),
                side: signal.side.to_string(),
                strength: signal.strength,
                ensemble_score: signal.ensemble_score,
            });
            if record_tx.try_send(record).is_err() {
                debug!("record channel full, signal record dropped");
            }
            queue.push(signal);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use intra_core::InstrumentId;

    fn id(n: u32) -> InstrumentId {
        InstrumentId::new(format!("{n:06}")).unwrap()
    }

    #[test]
    fn test_deal_is_disjoint_and_complete() {
        let workers = 4;
        for round in [0u64, 1, 17] {
            for n in 0..100 {
                let owners: Vec<usize> = (0..workers)
                    .filter(|&w| assigned_to(&id(n), round, workers, w))
                    .collect();
                assert_eq!(owners.len(), 1, "instrument must have exactly one owner");
            }
        }
    }

    #[test]
    fn test_deal_changes_across_rounds() {
        let workers = 4;
        let moved = (0..100)
            .filter(|&n| {
                let owner_a = (0..workers).find(|&w| assigned_to(&id(n), 1, workers, w));
                let owner_b = (0..workers).find(|&w| assigned_to(&id(n), 2, workers, w));
                owner_a != owner_b
            })
            .count();
        // A reshuffle should move a meaningful share of instruments.
        assert!(moved > 20, "only {moved} instruments moved");
    }
}
