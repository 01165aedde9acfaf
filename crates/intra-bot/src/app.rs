//! Application wiring.
//!
//! Builds every component, connects the channels between them, and
//! spawns the task set:
//!
//! ```text
//! stream ─> ingest ─> feed cache           scheduler ─> workers ─> queue
//!              └────> fills ─> order monitor ─> outcomes      │
//!                                                             v
//! exit monitor ──────────────exit requests──────────────> executor ─> broker
//! ```
//!
//! Shutdown is cooperative: one cancellation token fans out to every
//! task and `shutdown()` waits for all of them to drain.

use crate::config::Settings;
use crate::control::ControlHandle;
use crate::error::AppResult;
use intra_broker::{
    spawn_stream, DynBroker, RateLimiter, RestBroker, StreamHandle,
};
use intra_core::{DataPriority, FillEvent, InstrumentId};
use intra_feed::{spawn_ingest, HybridFeed, SlotAllocator, SlotDecision};
use intra_orders::{OrderOutcome, OrderPurpose, PendingOrderMonitor};
use intra_persistence::{
    spawn_recorder, JsonLinesWriter, PositionRecord, Record, TradeRecord,
};
use intra_pipeline::{spawn_workers, Executor, ExecutorDeps, SignalQueue};
use intra_position::PositionTrackerHandle;
use intra_risk::{spawn_exit_monitor, ThresholdTable, TradeGate};
use intra_scheduler::{spawn_scheduler, ActiveProfile, SchedulerHandle};
use intra_strategy::{default_strategies, EnsembleCombiner};
use intra_telemetry::DailyStats;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const REBALANCE_INTERVAL: Duration = Duration::from_secs(300);

/// The assembled engine.
pub struct App {
    control: ControlHandle,
    token: CancellationToken,
    joins: Vec<JoinHandle<()>>,
}

impl App {
    /// Build against the real REST broker and start all tasks.
    pub async fn start(settings: Settings) -> AppResult<App> {
        let broker: DynBroker = Arc::new(RestBroker::new(settings.rest_config())?);
        Self::start_with_broker(settings, broker).await
    }

    /// Build against an injected broker client (tests use a mock).
    pub async fn start_with_broker(settings: Settings, broker: DynBroker) -> AppResult<App> {
        settings.validate()?;

        let token = CancellationToken::new();
        let mut joins = Vec::new();

        let limiter = Arc::new(RateLimiter::new(settings.rate_limits()));
        let feed = Arc::new(HybridFeed::new(
            broker.clone(),
            limiter.clone(),
            settings.feed_config(),
        ));
        let allocator = Arc::new(SlotAllocator::new(settings.allocator_config()));
        let stats = Arc::new(DailyStats::new());
        let thresholds = settings.threshold_table()?;

        // Push transport into the feed; fills split off to the order path.
        let (event_tx, event_rx) = mpsc::channel(1024);
        let (stream, stream_join) = spawn_stream(settings.stream_config(), event_tx, token.clone());
        joins.push(stream_join);
        let (fill_tx, fill_rx) = mpsc::channel(128);
        joins.push(spawn_ingest(feed.clone(), event_rx, fill_tx, token.clone()));

        let (scheduler, scheduler_join) = spawn_scheduler(settings.profile_table()?, token.clone());
        joins.push(scheduler_join);

        let (positions, tracker_join) = intra_position::spawn_position_tracker(128);
        joins.push(tracker_join);

        let (record_tx, record_rx) = mpsc::channel(1024);
        let writer = JsonLinesWriter::new(
            settings.persistence.data_dir.clone(),
            settings.persistence.buffer_size,
        );
        joins.push(spawn_recorder(writer, record_rx, token.clone()));

        let (outcome_tx, outcome_rx) = mpsc::channel(128);
        let orders = PendingOrderMonitor::new(
            settings.order_monitor_config(),
            broker.clone(),
            outcome_tx,
        );
        joins.push(orders.clone().spawn(token.clone()));
        joins.push(spawn_fill_router(orders.clone(), fill_rx, token.clone()));

        let queue = Arc::new(SignalQueue::new(settings.pipeline.queue_capacity));
        let combiner = Arc::new(EnsembleCombiner::new(
            default_strategies(),
            settings.ensemble_config(),
        ));
        joins.extend(spawn_workers(
            settings.worker_config(),
            feed.clone(),
            combiner,
            scheduler.subscribe(),
            queue.clone(),
            stats.clone(),
            record_tx.clone(),
            token.clone(),
        ));

        let gate = TradeGate::new(settings.risk_config(), positions.clone(), stats.clone());
        let (exit_tx, exit_rx) = mpsc::channel(32);
        joins.push(spawn_exit_monitor(
            feed.clone(),
            positions.clone(),
            exit_tx,
            Duration::from_secs(settings.risk.exit_check_interval_secs),
            token.clone(),
        ));

        let (pause_tx, pause_rx) = watch::channel(false);
        let pause_tx = Arc::new(pause_tx);
        let executor = Executor::new(
            settings.executor_config(),
            ExecutorDeps {
                feed: feed.clone(),
                broker: broker.clone(),
                limiter: limiter.clone(),
                gate,
                positions: positions.clone(),
                orders: orders.clone(),
                stats: stats.clone(),
                queue: queue.clone(),
            },
            pause_rx,
            exit_rx,
        );
        joins.push(tokio::spawn(executor.run(token.clone())));

        joins.push(spawn_outcome_router(
            outcome_rx,
            positions.clone(),
            feed.clone(),
            allocator.clone(),
            stream.clone(),
            stats.clone(),
            thresholds,
            record_tx,
            token.clone(),
        ));

        joins.push(spawn_rebalancer(
            scheduler.clone(),
            allocator.clone(),
            feed.clone(),
            stream,
            positions.clone(),
            token.clone(),
        ));

        let control = ControlHandle::new(
            pause_tx,
            token.clone(),
            scheduler,
            positions,
            stats,
            limiter,
            allocator,
            queue,
            broker,
        );

        info!("engine started");
        Ok(App {
            control,
            token,
            joins,
        })
    }

    pub fn control(&self) -> ControlHandle {
        self.control.clone()
    }

    /// Block until shutdown is requested from anywhere.
    pub async fn wait(&self) {
        self.token.cancelled().await;
    }

    /// Cancel everything and wait for all tasks to drain.
    pub async fn shutdown(self) {
        self.token.cancel();
        for join in self.joins {
            let _ = join.await;
        }
        info!("engine stopped");
    }
}

/// Routes execution notices from the stream into the order monitor.
fn spawn_fill_router(
    orders: Arc<PendingOrderMonitor>,
    mut fill_rx: mpsc::Receiver<FillEvent>,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = token.cancelled() => return,
                fill = fill_rx.recv() => {
                    let Some(fill) = fill else { return };
                    orders.on_fill(fill).await;
                }
            }
        }
    })
}

/// Applies order outcomes to positions, stats, scores, and records.
#[allow(clippy::too_many_arguments)]
fn spawn_outcome_router(
    mut outcome_rx: mpsc::Receiver<OrderOutcome>,
    positions: PositionTrackerHandle,
    feed: Arc<HybridFeed>,
    allocator: Arc<SlotAllocator>,
    stream: StreamHandle,
    stats: Arc<DailyStats>,
    thresholds: ThresholdTable,
    record_tx: mpsc::Sender<Record>,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let outcome = tokio::select! {
                () = token.cancelled() => return,
                outcome = outcome_rx.recv() => match outcome {
                    Some(outcome) => outcome,
                    None => return,
                },
            };

            match outcome {
                OrderOutcome::Filled { order, fill } => {
                    stats.record_order_filled();
                    let (strategy, exit_reason) = match &order.purpose {
                        OrderPurpose::Entry { strategy } => (Some(*strategy), None),
                        OrderPurpose::Exit { reason } => (None, Some(*reason)),
                    };
                    let _ = record_tx
                        .send(Record::Trade(TradeRecord {
                            filled_at: fill.filled_at,
                            instrument: fill.instrument.to_string(),
                            side: fill.side.to_string(),
                            qty: fill.qty.inner(),
                            price: fill.price.inner(),
                            order_id: fill.order_id.to_string(),
                            strategy: strategy.map(|s| s.as_str().to_string()),
                            exit_reason: exit_reason.map(|r| r.as_str().to_string()),
                        }))
                        .await;

                    match order.purpose {
                        OrderPurpose::Entry { strategy } => {
                            positions
                                .open(
                                    fill.clone(),
                                    Some(strategy),
                                    thresholds.for_strategy(Some(strategy)),
                                )
                                .await;
                            // A held position is watched as closely as
                            // the stream allows.
                            feed.track(fill.instrument.clone(), DataPriority::Critical);
                            allocator.record_outcome(&fill.instrument, 2.0);
                            claim_live_slots(&allocator, &stream, &fill.instrument).await;
                        }
                        OrderPurpose::Exit { reason } => {
                            let Some(closed) = positions.close(fill.clone()).await else {
                                warn!(instrument = %fill.instrument, "exit fill without position");
                                continue;
                            };
                            stats.record_trade_closed(closed.realized_pnl);
                            let won = closed.realized_pnl >= rust_decimal::Decimal::ZERO;
                            allocator.record_outcome(
                                &fill.instrument,
                                if won { 5.0 } else { -5.0 },
                            );
                            let _ = record_tx
                                .send(Record::Position(PositionRecord {
                                    instrument: closed.position.instrument.to_string(),
                                    qty: closed.exit_qty.inner(),
                                    entry_price: closed.position.entry_price.inner(),
                                    exit_price: closed.exit_price.inner(),
                                    entry_at: closed.position.entry_at,
                                    closed_at: closed.closed_at,
                                    strategy: closed
                                        .position
                                        .strategy
                                        .map(|s| s.as_str().to_string()),
                                    exit_reason: Some(reason.as_str().to_string()),
                                    realized_pnl: closed.realized_pnl,
                                    pnl_pct: closed.pnl_pct,
                                }))
                                .await;
                        }
                    }
                }
                OrderOutcome::Cancelled { order } => {
                    stats.record_order_cancelled();
                    if let OrderPurpose::Exit { .. } = order.purpose {
                        // The exit order died; let the monitor fire again.
                        positions.clear_exit(order.request.instrument.clone()).await;
                    }
                }
                OrderOutcome::UnmatchedFill(fill) => {
                    warn!(
                        order_id = %fill.order_id,
                        instrument = %fill.instrument,
                        "fill for an order not submitted by this process"
                    );
                }
            }
        }
    })
}

/// Bind critical-tier stream slots for a freshly opened position,
/// falling back to polled access when the allocator denies.
async fn claim_live_slots(
    allocator: &SlotAllocator,
    stream: &StreamHandle,
    instrument: &InstrumentId,
) {
    match allocator.request_slot(instrument, DataPriority::Critical, None) {
        SlotDecision::Granted { channels } => {
            for channel in channels {
                let _ = stream.subscribe(instrument.clone(), channel).await;
            }
        }
        SlotDecision::Evicted { victims, channels } => {
            for (victim, victim_channels) in victims {
                for channel in victim_channels {
                    let _ = stream.unsubscribe(victim.clone(), channel).await;
                }
            }
            for channel in channels {
                let _ = stream.subscribe(instrument.clone(), channel).await;
            }
        }
        SlotDecision::Denied => {
            warn!(%instrument, "no live slot for position, watching via polls");
        }
    }
}

/// Keeps slots and feed tiers aligned with the active profile: on every
/// scheduler transition and on a fixed interval.
fn spawn_rebalancer(
    scheduler: SchedulerHandle,
    allocator: Arc<SlotAllocator>,
    feed: Arc<HybridFeed>,
    stream: StreamHandle,
    positions: PositionTrackerHandle,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let notify = scheduler.rebalance_notify();
        let mut ticker = tokio::time::interval(REBALANCE_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            apply_active_profile(&scheduler.active(), &allocator, &feed, &stream, &positions)
                .await;

            tokio::select! {
                () = token.cancelled() => return,
                () = notify.notified() => {}
                _ = ticker.tick() => {}
            }
        }
    })
}

/// Reconcile tracked instruments, tiers, and stream slots with the
/// active profile. Held positions always stay tracked at critical tier.
async fn apply_active_profile(
    active: &ActiveProfile,
    allocator: &SlotAllocator,
    feed: &HybridFeed,
    stream: &StreamHandle,
    positions: &PositionTrackerHandle,
) {
    let mut desired: Vec<(InstrumentId, DataPriority)> = Vec::new();

    for position in positions.snapshot() {
        desired.push((position.instrument, DataPriority::Critical));
    }

    if let Some(profile) = active.profile() {
        // Watchlist rank refined by live performance scores; config
        // order breaks ties (sort is stable).
        let mut candidates: Vec<(usize, &InstrumentId)> =
            profile.watchlist.iter().enumerate().collect();
        candidates.sort_by(|a, b| {
            allocator
                .score(b.1)
                .total_cmp(&allocator.score(a.1))
                .then(a.0.cmp(&b.0))
        });

        for (rank, (_, instrument)) in candidates.into_iter().enumerate() {
            if desired.iter().any(|(id, _)| id == instrument) {
                continue;
            }
            desired.push((instrument.clone(), profile.tier_plan.tier_for_rank(rank)));
        }
    }

    let outcome = allocator.rebalance(&desired);
    for (instrument, channels) in outcome.evicted {
        for channel in channels {
            if stream.unsubscribe(instrument.clone(), channel).await.is_err() {
                warn!("stream handle closed during rebalance");
                return;
            }
        }
    }
    for (instrument, channels) in outcome.admitted {
        for channel in channels {
            if stream.subscribe(instrument.clone(), channel).await.is_err() {
                warn!("stream handle closed during rebalance");
                return;
            }
        }
    }

    // Align feed tracking with the wanted tiers and drop strays.
    let desired_tiers: HashMap<&InstrumentId, DataPriority> =
        desired.iter().map(|(id, tier)| (id, *tier)).collect();
    for (instrument, tier) in &desired {
        feed.track(instrument.clone(), *tier);
    }
    for instrument in feed.tracked() {
        if !desired_tiers.contains_key(&instrument) && !positions.has_position(&instrument) {
            allocator.release(&instrument);
            feed.untrack(&instrument);
        }
    }
}
