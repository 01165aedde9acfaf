//! The pending-order monitor.
//!
//! Per-order state machine:
//!
//! ```text
//! SUBMITTED --timeout--> ADJUSTING --timeout (bounded)--> FORCED_MARKET --> FILLED | CANCELLED
//! ```
//!
//! The buy side defaults to price adjustment (chase the market in small
//! steps), the sell side to immediate market conversion (an exit wants
//! certainty of fill, not price). The force-market ceiling bounds the
//! total time an order may stay unfilled regardless of the adjustment
//! budget.

use dashmap::DashMap;
use intra_broker::{BrokerError, DynBroker};
use intra_core::{
    FillEvent, OrderId, OrderRequest, OrderSide, OrderState, Price, TimeoutAction,
};
use intra_risk::ExitReason;
use intra_strategy::StrategyId;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Escalation timing and actions.
#[derive(Debug, Clone)]
pub struct OrderMonitorConfig {
    /// Timeout for the initial submission.
    pub submit_timeout: Duration,
    /// Shorter timeout after each price adjustment.
    pub adjust_timeout: Duration,
    /// Price-adjusted resubmissions before forcing market.
    pub max_adjustments: u32,
    /// Nudge toward the market per adjustment, percent.
    pub adjust_step_pct: Decimal,
    /// Hard ceiling on total unfilled time before market conversion.
    pub force_market_after: Duration,
    pub buy_timeout_action: TimeoutAction,
    pub sell_timeout_action: TimeoutAction,
    /// Cadence of the escalation check.
    pub check_interval: Duration,
}

impl Default for OrderMonitorConfig {
    fn default() -> Self {
        Self {
            submit_timeout: Duration::from_secs(300),
            adjust_timeout: Duration::from_secs(60),
            max_adjustments: 3,
            adjust_step_pct: dec!(0.3),
            force_market_after: Duration::from_secs(600),
            buy_timeout_action: TimeoutAction::PriceAdjust,
            sell_timeout_action: TimeoutAction::MarketOrder,
            check_interval: Duration::from_secs(5),
        }
    }
}

/// Why this order exists; routed back with the outcome so fills update
/// the right state.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderPurpose {
    Entry { strategy: StrategyId },
    Exit { reason: ExitReason },
}

/// One live order under monitoring.
#[derive(Debug, Clone)]
pub struct TrackedOrder {
    pub order_id: OrderId,
    pub request: OrderRequest,
    pub purpose: OrderPurpose,
    pub state: OrderState,
    /// Remaining unfilled quantity.
    pub remaining: intra_core::Qty,
    pub first_submitted: Instant,
    pub last_submitted: Instant,
    pub adjustments: u32,
}

/// Terminal report emitted for every tracked order.
#[derive(Debug, Clone)]
pub enum OrderOutcome {
    Filled {
        order: TrackedOrder,
        fill: FillEvent,
    },
    Cancelled {
        order: TrackedOrder,
    },
    /// A fill arrived for an order this process never registered
    /// (e.g. a manual order on the same account).
    UnmatchedFill(FillEvent),
}

enum Escalation {
    Adjust,
    ForceMarket,
}

/// The monitor. Orders are registered by the executor; all timeout
/// handling runs on the periodic task.
pub struct PendingOrderMonitor {
    config: OrderMonitorConfig,
    broker: DynBroker,
    orders: DashMap<OrderId, TrackedOrder>,
    outcome_tx: mpsc::Sender<OrderOutcome>,
}

impl PendingOrderMonitor {
    pub fn new(
        config: OrderMonitorConfig,
        broker: DynBroker,
        outcome_tx: mpsc::Sender<OrderOutcome>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            broker,
            orders: DashMap::new(),
            outcome_tx,
        })
    }

    /// Start tracking a freshly acknowledged order.
    pub fn register(&self, order_id: OrderId, request: OrderRequest, purpose: OrderPurpose) {
        let now = Instant::now();
        let remaining = request.qty;
        debug!(%order_id, instrument = %request.instrument, side = %request.side, "order registered");
        self.orders.insert(
            order_id.clone(),
            TrackedOrder {
                order_id,
                request,
                purpose,
                state: OrderState::Submitted,
                remaining,
                first_submitted: now,
                last_submitted: now,
                adjustments: 0,
            },
        );
    }

    pub fn pending_count(&self) -> usize {
        self.orders.len()
    }

    pub fn get(&self, order_id: &OrderId) -> Option<TrackedOrder> {
        self.orders.get(order_id).map(|o| o.clone())
    }

    /// Route an execution notice. Emits `Filled` (and stops tracking on
    /// a complete fill) or `UnmatchedFill`.
    pub async fn on_fill(&self, fill: FillEvent) {
        let Some(mut entry) = self.orders.get_mut(&fill.order_id) else {
            warn!(order_id = %fill.order_id, "fill for unknown order");
            let _ = self.outcome_tx.send(OrderOutcome::UnmatchedFill(fill)).await;
            return;
        };

        entry.remaining = entry.remaining - fill.qty;
        let complete = entry.remaining.is_zero();
        let mut order = entry.clone();
        drop(entry);

        if complete {
            order.state = OrderState::Filled;
            self.orders.remove(&fill.order_id);
            info!(order_id = %fill.order_id, "order filled");
        } else {
            debug!(order_id = %fill.order_id, remaining = %order.remaining, "partial fill");
        }
        let _ = self.outcome_tx.send(OrderOutcome::Filled { order, fill }).await;
    }

    /// Spawn the periodic escalation task.
    pub fn spawn(self: Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.check_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!("pending-order monitor started");
            loop {
                tokio::select! {
                    () = token.cancelled() => {
                        info!(pending = self.pending_count(), "pending-order monitor shutting down");
                        return;
                    }
                    _ = ticker.tick() => {
                        self.escalate_due().await;
                    }
                }
            }
        })
    }

    /// One escalation pass over all live orders.
    pub async fn escalate_due(&self) {
        let now = Instant::now();
        // Collect first: never hold map guards across awaits.
        let due: Vec<(OrderId, TrackedOrder)> = self
            .orders
            .iter()
            .filter_map(|entry| {
                self.plan_for(entry.value(), now)
                    .map(|_| (entry.key().clone(), entry.value().clone()))
            })
            .collect();

        for (order_id, order) in due {
            let Some(plan) = self.plan_for(&order, now) else {
                continue;
            };
            match plan {
                Escalation::Adjust => self.adjust(order_id, order).await,
                Escalation::ForceMarket => self.force_market(order_id, order).await,
            }
        }
    }

    /// Escalation decision for one order, or None when nothing is due.
    fn plan_for(&self, order: &TrackedOrder, now: Instant) -> Option<Escalation> {
        if order.state.is_terminal() || order.state == OrderState::ForcedMarket {
            return None;
        }

        let timer = match order.state {
            OrderState::Submitted => self.config.submit_timeout,
            OrderState::Adjusting => self.config.adjust_timeout,
            _ => return None,
        };
        if now.duration_since(order.last_submitted) < timer {
            return None;
        }

        let action = match order.request.side {
            OrderSide::Buy => self.config.buy_timeout_action,
            OrderSide::Sell => self.config.sell_timeout_action,
        };
        let budget_spent = order.adjustments >= self.config.max_adjustments;
        let past_ceiling =
            now.duration_since(order.first_submitted) >= self.config.force_market_after;

        if action == TimeoutAction::MarketOrder || budget_spent || past_ceiling {
            Some(Escalation::ForceMarket)
        } else {
            Some(Escalation::Adjust)
        }
    }

    /// Cancel and resubmit one step closer to the market.
    async fn adjust(&self, order_id: OrderId, order: TrackedOrder) {
        let Some(current_price) = order.request.limit_price else {
            return;
        };
        if !self.cancel_current(&order_id).await {
            return;
        }

        let new_price = self.stepped_price(current_price, order.request.side);
        let new_request = OrderRequest::limit(
            order.request.instrument.clone(),
            order.request.side,
            order.remaining,
            new_price,
        );

        match self.broker.submit_order(&new_request).await {
            Ok(ack) => {
                let now = Instant::now();
                let mut updated = order;
                info!(
                    old_id = %order_id,
                    new_id = %ack.order_id,
                    price = %new_price,
                    adjustment = updated.adjustments + 1,
                    "order price adjusted"
                );
                self.orders.remove(&order_id);
                updated.order_id = ack.order_id.clone();
                updated.request = new_request;
                updated.state = OrderState::Adjusting;
                updated.adjustments += 1;
                updated.last_submitted = now;
                self.orders.insert(ack.order_id, updated);
            }
            Err(e) => self.abort_order(order_id, order, e).await,
        }
    }

    /// Cancel and resubmit as a market order.
    async fn force_market(&self, order_id: OrderId, order: TrackedOrder) {
        if !self.cancel_current(&order_id).await {
            return;
        }

        let new_request = OrderRequest::market(
            order.request.instrument.clone(),
            order.request.side,
            order.remaining,
        );

        match self.broker.submit_order(&new_request).await {
            Ok(ack) => {
                let now = Instant::now();
                let mut updated = order;
                warn!(
                    old_id = %order_id,
                    new_id = %ack.order_id,
                    instrument = %updated.request.instrument,
                    "forced market conversion"
                );
                self.orders.remove(&order_id);
                updated.order_id = ack.order_id.clone();
                updated.request = new_request;
                updated.state = OrderState::ForcedMarket;
                updated.last_submitted = now;
                self.orders.insert(ack.order_id, updated);
            }
            Err(e) => self.abort_order(order_id, order, e).await,
        }
    }

    /// Cancel the live order. Returns false when escalation must stop
    /// for this tick (cancel raced a fill, or a transient error left
    /// the order for the next pass).
    async fn cancel_current(&self, order_id: &OrderId) -> bool {
        match self.broker.cancel_order(order_id).await {
            Ok(()) => true,
            Err(BrokerError::Rejected(reason)) => {
                // Most likely filled while we were deciding; the fill
                // notice will resolve this entry.
                debug!(%order_id, reason, "cancel rejected, awaiting fill notice");
                false
            }
            Err(e) => {
                warn!(%order_id, ?e, "cancel failed, retrying next pass");
                false
            }
        }
    }

    /// Resubmission was rejected after a successful cancel: the order is
    /// dead. Report and roll back tracking.
    async fn abort_order(&self, order_id: OrderId, order: TrackedOrder, error: BrokerError) {
        warn!(%order_id, ?error, "resubmission failed, order cancelled");
        self.orders.remove(&order_id);
        let mut cancelled = order;
        cancelled.state = OrderState::Cancelled;
        let _ = self
            .outcome_tx
            .send(OrderOutcome::Cancelled { order: cancelled })
            .await;
    }

    /// One escalation step toward the market, guaranteed to move at
    /// least one tick after snapping.
    fn stepped_price(&self, current: Price, side: OrderSide) -> Price {
        let step = self.config.adjust_step_pct / dec!(100);
        let raw = match side {
            OrderSide::Buy => current.inner() * (Decimal::ONE + step),
            OrderSide::Sell => current.inner() * (Decimal::ONE - step),
        };
        let snapped = Price::new(raw).snap_to_tick();
        match side {
            OrderSide::Buy if snapped <= current => {
                Price::new(current.inner() + current.tick_size())
            }
            OrderSide::Sell if snapped >= current => {
                Price::new(current.inner() - current.tick_size()).snap_to_tick()
            }
            _ => snapped,
        }
    }
}
