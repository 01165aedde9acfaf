//! The control surface.
//!
//! Thread-safe query/command API consumed by the remote-control channel
//! (the transport itself lives outside this crate). Queries read shared
//! handles and never touch the trading hot path; `pause` stops order
//! submission while analysis and position protection keep running.

use intra_broker::{BrokerResult, DynBroker, RateLimiter, RateSnapshot};
use intra_core::AccountBalance;
use intra_feed::SlotAllocator;
use intra_pipeline::SignalQueue;
use intra_position::PositionTrackerHandle;
use intra_scheduler::SchedulerHandle;
use intra_telemetry::{DailyStats, DailySummary};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// One open position as reported to operators.
#[derive(Debug, Clone, Serialize)]
pub struct PositionView {
    pub instrument: String,
    pub qty: u64,
    pub entry_price: Decimal,
    pub last_price: Decimal,
    pub profit_pct: Decimal,
    pub strategy: Option<String>,
    pub holding_secs: i64,
    pub exiting: bool,
}

/// System health snapshot for the `status` command.
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub paused: bool,
    pub active_profile: String,
    pub open_positions: usize,
    pub slots_used: usize,
    pub slot_capacity: usize,
    pub queue_depth: usize,
    pub signals_dropped: u64,
    pub rate: RateSnapshot,
}

/// Cloneable operator handle.
#[derive(Clone)]
pub struct ControlHandle {
    pause_tx: Arc<watch::Sender<bool>>,
    token: CancellationToken,
    scheduler: SchedulerHandle,
    positions: PositionTrackerHandle,
    stats: Arc<DailyStats>,
    limiter: Arc<RateLimiter>,
    allocator: Arc<SlotAllocator>,
    queue: Arc<SignalQueue>,
    broker: DynBroker,
}

impl ControlHandle {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        pause_tx: Arc<watch::Sender<bool>>,
        token: CancellationToken,
        scheduler: SchedulerHandle,
        positions: PositionTrackerHandle,
        stats: Arc<DailyStats>,
        limiter: Arc<RateLimiter>,
        allocator: Arc<SlotAllocator>,
        queue: Arc<SignalQueue>,
        broker: DynBroker,
    ) -> Self {
        Self {
            pause_tx,
            token,
            scheduler,
            positions,
            stats,
            limiter,
            allocator,
            queue,
            broker,
        }
    }

    /// Stop submitting new entry orders. Analysis and exits continue.
    pub fn pause(&self) {
        info!("trading paused by operator");
        let _ = self.pause_tx.send(true);
    }

    pub fn resume(&self) {
        info!("trading resumed by operator");
        let _ = self.pause_tx.send(false);
    }

    pub fn is_paused(&self) -> bool {
        *self.pause_tx.borrow()
    }

    /// Begin graceful shutdown: all periodic tasks drain and stop.
    pub fn shutdown(&self) {
        info!("shutdown requested by operator");
        self.token.cancel();
    }

    pub fn status(&self) -> SystemStatus {
        SystemStatus {
            paused: self.is_paused(),
            active_profile: self.scheduler.active().name().to_string(),
            open_positions: self.positions.count(),
            slots_used: self.allocator.used(),
            slot_capacity: self.allocator.capacity(),
            queue_depth: self.queue.len(),
            signals_dropped: self.queue.dropped_count(),
            rate: self.limiter.snapshot(),
        }
    }

    /// Account balance straight from the broker, rate-limited like any
    /// other remote call.
    pub async fn balance(&self) -> BrokerResult<AccountBalance> {
        self.limiter.acquire().await;
        self.broker.get_balance().await
    }

    pub fn positions(&self) -> Vec<PositionView> {
        self.positions
            .snapshot()
            .into_iter()
            .map(|p| PositionView {
                instrument: p.instrument.to_string(),
                qty: p.qty.inner(),
                entry_price: p.entry_price.inner(),
                last_price: p.last_price.inner(),
                profit_pct: p.profit_pct(),
                strategy: p.strategy.map(|s| s.as_str().to_string()),
                holding_secs: p.holding().num_seconds(),
                exiting: p.exiting,
            })
            .collect()
    }

    pub fn today_summary(&self) -> DailySummary {
        self.stats.summary()
    }
}
