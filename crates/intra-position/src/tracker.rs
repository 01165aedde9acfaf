//! The position tracker actor.
//!
//! Authoritative position state lives in the actor's `HashMap`, updated
//! strictly by message order, so the executor (fills) and the risk
//! monitor (marks, exit flags) can never race each other. A `DashMap`
//! mirror gives the hot path synchronous reads without a channel
//! round-trip; it may briefly lag the actor but never shows a position
//! the actor has already closed as open with stale size.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use intra_core::{FillEvent, InstrumentId, Price, ProtectiveThresholds, Qty};
use intra_strategy::StrategyId;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// An open position.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub instrument: InstrumentId,
    pub qty: Qty,
    pub entry_price: Price,
    pub entry_at: DateTime<Utc>,
    /// Originating strategy; None when the entry came from outside the
    /// pipeline (e.g. an account sync).
    pub strategy: Option<StrategyId>,
    /// Exit parameters inherited from the originating strategy.
    pub thresholds: ProtectiveThresholds,
    /// Latest marked price.
    pub last_price: Price,
    /// Highest profit percentage seen since entry (trailing peak).
    pub peak_profit_pct: Decimal,
    /// An exit order is in flight; suppresses duplicate exits.
    pub exiting: bool,
}

impl Position {
    fn from_fill(
        fill: &FillEvent,
        strategy: Option<StrategyId>,
        thresholds: ProtectiveThresholds,
    ) -> Self {
        Self {
            instrument: fill.instrument.clone(),
            qty: fill.qty,
            entry_price: fill.price,
            entry_at: fill.filled_at,
            strategy,
            thresholds,
            last_price: fill.price,
            peak_profit_pct: Decimal::ZERO,
            exiting: false,
        }
    }

    /// Current profit vs entry, percent.
    pub fn profit_pct(&self) -> Decimal {
        self.last_price
            .pct_from(self.entry_price)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn holding(&self) -> chrono::Duration {
        Utc::now() - self.entry_at
    }

    pub fn unrealized_pnl(&self) -> Decimal {
        (self.last_price.inner() - self.entry_price.inner()) * Decimal::from(self.qty.inner())
    }

    pub fn notional(&self) -> Decimal {
        self.qty.notional(self.entry_price)
    }
}

/// Result of closing (part of) a position.
#[derive(Debug, Clone, PartialEq)]
pub struct ClosedPosition {
    pub position: Position,
    pub exit_qty: Qty,
    pub exit_price: Price,
    pub realized_pnl: Decimal,
    pub pnl_pct: Decimal,
    pub closed_at: DateTime<Utc>,
}

enum TrackerMsg {
    Open {
        fill: FillEvent,
        strategy: Option<StrategyId>,
        thresholds: ProtectiveThresholds,
    },
    Close {
        fill: FillEvent,
        reply: oneshot::Sender<Option<ClosedPosition>>,
    },
    Mark {
        instrument: InstrumentId,
        price: Price,
    },
    BeginExit {
        instrument: InstrumentId,
        reply: oneshot::Sender<bool>,
    },
    ClearExit {
        instrument: InstrumentId,
    },
    Shutdown,
}

/// Cloneable handle to the tracker actor.
#[derive(Clone)]
pub struct PositionTrackerHandle {
    tx: mpsc::Sender<TrackerMsg>,
    cache: Arc<DashMap<InstrumentId, Position>>,
}

impl PositionTrackerHandle {
    /// Record a confirmed buy fill. Repeated buy fills on the same
    /// instrument average into one position.
    pub async fn open(
        &self,
        fill: FillEvent,
        strategy: Option<StrategyId>,
        thresholds: ProtectiveThresholds,
    ) {
        let _ = self
            .tx
            .send(TrackerMsg::Open {
                fill,
                strategy,
                thresholds,
            })
            .await;
    }

    /// Record a confirmed sell fill. Returns the closed portion, or
    /// None when no matching position exists.
    pub async fn close(&self, fill: FillEvent) -> Option<ClosedPosition> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(TrackerMsg::Close { fill, reply }).await.ok()?;
        rx.await.ok().flatten()
    }

    /// Mark a position to the latest price, updating the trailing peak.
    pub async fn mark(&self, instrument: InstrumentId, price: Price) {
        let _ = self.tx.send(TrackerMsg::Mark { instrument, price }).await;
    }

    /// Claim the exit for a position. Returns true exactly once per
    /// open position until the flag is cleared: the in-flight dedup
    /// for the risk monitor.
    pub async fn begin_exit(&self, instrument: InstrumentId) -> bool {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(TrackerMsg::BeginExit { instrument, reply })
            .await
            .is_err()
        {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Release the exit claim (exit order rejected or cancelled).
    pub async fn clear_exit(&self, instrument: InstrumentId) {
        let _ = self.tx.send(TrackerMsg::ClearExit { instrument }).await;
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(TrackerMsg::Shutdown).await;
    }

    // --- Synchronous reads from the cache ---

    pub fn get(&self, instrument: &InstrumentId) -> Option<Position> {
        self.cache.get(instrument).map(|p| p.clone())
    }

    pub fn has_position(&self, instrument: &InstrumentId) -> bool {
        self.cache.contains_key(instrument)
    }

    pub fn count(&self) -> usize {
        self.cache.len()
    }

    pub fn snapshot(&self) -> Vec<Position> {
        self.cache.iter().map(|p| p.clone()).collect()
    }

    /// Sum of unrealized PnL across open positions.
    pub fn total_unrealized_pnl(&self) -> Decimal {
        self.cache.iter().map(|p| p.unrealized_pnl()).sum()
    }
}

struct TrackerTask {
    rx: mpsc::Receiver<TrackerMsg>,
    positions: HashMap<InstrumentId, Position>,
    cache: Arc<DashMap<InstrumentId, Position>>,
}

impl TrackerTask {
    async fn run(mut self) {
        debug!("position tracker started");
        while let Some(msg) = self.rx.recv().await {
            match msg {
                TrackerMsg::Open {
                    fill,
                    strategy,
                    thresholds,
                } => self.on_open(fill, strategy, thresholds),
                TrackerMsg::Close { fill, reply } => {
                    let _ = reply.send(self.on_close(&fill));
                }
                TrackerMsg::Mark { instrument, price } => self.on_mark(&instrument, price),
                TrackerMsg::BeginExit { instrument, reply } => {
                    let _ = reply.send(self.on_begin_exit(&instrument));
                }
                TrackerMsg::ClearExit { instrument } => {
                    if let Some(position) = self.positions.get_mut(&instrument) {
                        position.exiting = false;
                        self.mirror(&instrument);
                    }
                }
                TrackerMsg::Shutdown => break,
            }
        }
        debug!("position tracker terminated");
    }

    fn mirror(&self, instrument: &InstrumentId) {
        match self.positions.get(instrument) {
            Some(position) => {
                self.cache.insert(instrument.clone(), position.clone());
            }
            None => {
                self.cache.remove(instrument);
            }
        }
    }

    fn on_open(
        &mut self,
        fill: FillEvent,
        strategy: Option<StrategyId>,
        thresholds: ProtectiveThresholds,
    ) {
        match self.positions.get_mut(&fill.instrument) {
            Some(existing) => {
                // Average in the new fill.
                let old_notional = existing.qty.notional(existing.entry_price);
                let add_notional = fill.qty.notional(fill.price);
                let total_qty = existing.qty + fill.qty;
                existing.entry_price = Price::new(
                    (old_notional + add_notional) / Decimal::from(total_qty.inner()),
                );
                existing.qty = total_qty;
                existing.last_price = fill.price;
                info!(
                    instrument = %fill.instrument,
                    qty = %total_qty,
                    avg_entry = %existing.entry_price,
                    "position increased"
                );
            }
            None => {
                let position = Position::from_fill(&fill, strategy, thresholds);
                info!(
                    instrument = %position.instrument,
                    qty = %position.qty,
                    entry = %position.entry_price,
                    strategy = position.strategy.map(|s| s.as_str()).unwrap_or("unknown"),
                    "position opened"
                );
                self.positions.insert(fill.instrument.clone(), position);
            }
        }
        self.mirror(&fill.instrument);
    }

    fn on_close(&mut self, fill: &FillEvent) -> Option<ClosedPosition> {
        let Some(position) = self.positions.get_mut(&fill.instrument) else {
            warn!(instrument = %fill.instrument, "sell fill without open position");
            return None;
        };

        let exit_qty = fill.qty.min(position.qty);
        let realized_pnl = (fill.price.inner() - position.entry_price.inner())
            * Decimal::from(exit_qty.inner());
        let pnl_pct = fill
            .price
            .pct_from(position.entry_price)
            .unwrap_or(Decimal::ZERO);

        let closed = ClosedPosition {
            position: position.clone(),
            exit_qty,
            exit_price: fill.price,
            realized_pnl,
            pnl_pct,
            closed_at: fill.filled_at,
        };

        if exit_qty >= position.qty {
            info!(
                instrument = %fill.instrument,
                pnl = %realized_pnl,
                pnl_pct = %pnl_pct,
                "position closed"
            );
            self.positions.remove(&fill.instrument);
        } else {
            position.qty = position.qty - exit_qty;
            position.exiting = false;
            info!(
                instrument = %fill.instrument,
                remaining = %position.qty,
                "position reduced"
            );
        }
        self.mirror(&fill.instrument);
        Some(closed)
    }

    fn on_mark(&mut self, instrument: &InstrumentId, price: Price) {
        if let Some(position) = self.positions.get_mut(instrument) {
            position.last_price = price;
            let profit = position.profit_pct();
            if profit > position.peak_profit_pct {
                position.peak_profit_pct = profit;
            }
            self.mirror(instrument);
        }
    }

    fn on_begin_exit(&mut self, instrument: &InstrumentId) -> bool {
        let Some(position) = self.positions.get_mut(instrument) else {
            return false;
        };
        if position.exiting {
            return false;
        }
        position.exiting = true;
        self.mirror(instrument);
        true
    }
}

/// Spawn the tracker actor. `buffer` is the command channel depth.
pub fn spawn_position_tracker(buffer: usize) -> (PositionTrackerHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(buffer);
    let cache = Arc::new(DashMap::new());
    let task = TrackerTask {
        rx,
        positions: HashMap::new(),
        cache: cache.clone(),
    };
    let join = tokio::spawn(task.run());
    (PositionTrackerHandle { tx, cache }, join)
}
