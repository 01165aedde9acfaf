//! The sequential executor.
//!
//! The only task in the process that submits orders. It drains two
//! sources with a strict preference (exit requests from the risk
//! monitor first, then ranked entry signals) so account state is only
//! ever mutated from here and the risk path is never starved by a
//! burst of signals. Pause stops new entries; protective exits keep
//! flowing.

use crate::queue::SignalQueue;
use intra_broker::{DynBroker, RateLimiter};
use intra_core::{OrderRequest, OrderSide};
use intra_feed::HybridFeed;
use intra_orders::{OrderPurpose, PendingOrderMonitor};
use intra_position::{Position, PositionTrackerHandle};
use intra_risk::{ExitReason, ExitRequest, TradeGate};
use intra_strategy::TradeSignal;
use intra_telemetry::DailyStats;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Executor configuration.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Signals older than this are discarded undelivered.
    pub max_signal_age: Duration,
    /// Maximum tolerated drift from the signal-time price, percent.
    pub price_band_pct: Decimal,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_signal_age: Duration::from_secs(60),
            price_band_pct: Decimal::ONE,
        }
    }
}

/// Shared handles the executor drives.
pub struct ExecutorDeps {
    pub feed: Arc<HybridFeed>,
    pub broker: DynBroker,
    pub limiter: Arc<RateLimiter>,
    pub gate: TradeGate,
    pub positions: PositionTrackerHandle,
    pub orders: Arc<PendingOrderMonitor>,
    pub stats: Arc<DailyStats>,
    pub queue: Arc<SignalQueue>,
}

/// The single order-submitting task.
pub struct Executor {
    config: ExecutorConfig,
    deps: ExecutorDeps,
    pause_rx: watch::Receiver<bool>,
    exit_rx: mpsc::Receiver<ExitRequest>,
}

impl Executor {
    pub fn new(
        config: ExecutorConfig,
        deps: ExecutorDeps,
        pause_rx: watch::Receiver<bool>,
        exit_rx: mpsc::Receiver<ExitRequest>,
    ) -> Self {
        Self {
            config,
            deps,
            pause_rx,
            exit_rx,
        }
    }

    pub async fn run(mut self, token: CancellationToken) {
        info!("executor started");
        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => {
                    info!("executor shutting down");
                    return;
                }
                exit = self.exit_rx.recv() => {
                    match exit {
                        Some(request) => self.handle_exit(request).await,
                        None => return,
                    }
                }
                signal = self.deps.queue.pop(&token) => {
                    match signal {
                        Some(signal) => self.handle_signal(signal).await,
                        None => return,
                    }
                }
            }
        }
    }

    async fn handle_signal(&self, signal: TradeSignal) {
        if signal.is_expired(self.config.max_signal_age) {
            debug!(
                instrument = %signal.instrument,
                age_ms = signal.age().num_milliseconds(),
                "signal expired, discarded"
            );
            return;
        }
        if *self.pause_rx.borrow() {
            debug!(instrument = %signal.instrument, "paused, signal discarded");
            return;
        }

        match signal.side {
            OrderSide::Buy => self.execute_entry(signal).await,
            OrderSide::Sell => self.execute_signal_exit(signal).await,
        }
    }

    async fn execute_entry(&self, signal: TradeSignal) {
        // Revalidate against a fresh quote before committing money.
        let quote = match self.deps.feed.quote(&signal.instrument).await {
            Ok(quote) if !quote.stale => quote,
            Ok(_) => {
                debug!(instrument = %signal.instrument, "stale quote, entry skipped");
                return;
            }
            Err(e) => {
                warn!(instrument = %signal.instrument, ?e, "no quote, entry skipped");
                return;
            }
        };

        let drift = quote
            .last_price
            .pct_from(signal.price_at_signal)
            .unwrap_or(Decimal::ZERO)
            .abs();
        if drift > self.config.price_band_pct {
            info!(
                instrument = %signal.instrument,
                drift_pct = %drift,
                "price moved outside band, signal discarded"
            );
            return;
        }

        self.deps.limiter.acquire().await;
        let balance = match self.deps.broker.get_balance().await {
            Ok(balance) => balance,
            Err(e) => {
                warn!(?e, "balance unavailable, entry skipped");
                return;
            }
        };

        let entry_price = if quote.has_valid_book() {
            quote.ask
        } else {
            quote.last_price
        };
        let qty = self.deps.gate.size_position(entry_price, &balance);
        if qty.is_zero() {
            debug!(instrument = %signal.instrument, "budget sizes to zero shares");
            return;
        }

        if let Err(reason) = self.deps.gate.can_buy(
            &signal.instrument,
            qty,
            entry_price,
            &balance,
            quote.range_pct(),
        ) {
            info!(instrument = %signal.instrument, %reason, "entry rejected");
            return;
        }

        let request =
            OrderRequest::limit(signal.instrument.clone(), OrderSide::Buy, qty, entry_price);
        self.deps.limiter.acquire().await;
        match self.deps.broker.submit_order(&request).await {
            Ok(ack) => {
                info!(
                    instrument = %signal.instrument,
                    order_id = %ack.order_id,
                    %qty,
                    price = %entry_price,
                    score = %signal.ensemble_score,
                    "entry order submitted"
                );
                self.deps.orders.register(
                    ack.order_id,
                    request,
                    OrderPurpose::Entry {
                        strategy: signal.strategy,
                    },
                );
                self.deps.stats.record_order_submitted();
            }
            Err(e) => {
                // No silent retry: escalation is the order monitor's
                // job and it only manages acknowledged orders.
                warn!(instrument = %signal.instrument, ?e, "entry submission failed");
            }
        }
    }

    /// A sell vote only matters against a held position.
    async fn execute_signal_exit(&self, signal: TradeSignal) {
        if !self.deps.positions.has_position(&signal.instrument) {
            debug!(instrument = %signal.instrument, "sell signal without position, discarded");
            return;
        }
        if !self.deps.positions.begin_exit(signal.instrument.clone()).await {
            return;
        }
        let Some(position) = self.deps.positions.get(&signal.instrument) else {
            return;
        };
        self.submit_exit(position, ExitReason::SignalExit).await;
    }

    /// Exit requests bypass the pause gate: protection keeps working
    /// while entries are suspended.
    async fn handle_exit(&self, request: ExitRequest) {
        self.submit_exit(request.position, request.reason).await;
    }

    async fn submit_exit(&self, position: Position, reason: ExitReason) {
        // A stale quote is still good enough to price an exit; the
        // order monitor converts to market if it does not fill.
        let price = match self.deps.feed.quote(&position.instrument).await {
            Ok(quote) if quote.has_valid_book() => quote.bid,
            Ok(quote) => quote.last_price,
            Err(_) => position.last_price,
        };

        let request =
            OrderRequest::limit(position.instrument.clone(), OrderSide::Sell, position.qty, price);

        self.deps.limiter.acquire().await;
        match self.deps.broker.submit_order(&request).await {
            Ok(ack) => {
                info!(
                    instrument = %position.instrument,
                    order_id = %ack.order_id,
                    %reason,
                    "exit order submitted"
                );
                self.deps
                    .orders
                    .register(ack.order_id, request, OrderPurpose::Exit { reason });
                self.deps.stats.record_order_submitted();
            }
            Err(e) => {
                warn!(instrument = %position.instrument, ?e, "exit submission failed");
                self.deps.positions.clear_exit(position.instrument.clone()).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use intra_broker::{MockBrokerClient, RateLimits, StreamEvent};
    use intra_core::{
        AccountBalance, DataPriority, FillEvent, InstrumentId, OrderAck, OrderId, Price,
        ProtectiveThresholds, Qty, QuoteSnapshot,
    };
    use intra_feed::FeedConfig;
    use intra_position::spawn_position_tracker;
    use intra_risk::RiskConfig;
    use intra_strategy::StrategyId;
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;

    fn id() -> InstrumentId {
        InstrumentId::new("005930").unwrap()
    }

    fn quote(last: Decimal) -> QuoteSnapshot {
        QuoteSnapshot {
            instrument: id(),
            last_price: Price::new(last),
            prev_close: Price::new(dec!(70000)),
            day_high: Price::new(last),
            day_low: Price::new(dec!(69500)),
            volume: 100_000,
            bid: Price::new(last - dec!(100)),
            ask: Price::new(last),
            received_at: Utc::now(),
            stale: false,
        }
    }

    fn signal(score: Decimal, price_at_signal: Decimal) -> TradeSignal {
        TradeSignal {
            instrument: id(),
            strategy: StrategyId::Momentum,
            side: OrderSide::Buy,
            strength: score,
            ensemble_score: score,
            price_at_signal: Price::new(price_at_signal),
            created_at: Utc::now(),
        }
    }

    struct Fixture {
        queue: Arc<SignalQueue>,
        exit_tx: mpsc::Sender<ExitRequest>,
        pause_tx: watch::Sender<bool>,
        positions: PositionTrackerHandle,
        submissions: Arc<Mutex<Vec<OrderRequest>>>,
        token: CancellationToken,
        join: tokio::task::JoinHandle<()>,
    }

    async fn fixture(last_price: Decimal) -> Fixture {
        let submissions: Arc<Mutex<Vec<OrderRequest>>> = Arc::new(Mutex::new(Vec::new()));

        let mut broker = MockBrokerClient::new();
        broker.expect_get_balance().returning(|| {
            Ok(AccountBalance {
                available_cash: dec!(10_000_000),
                total_equity: dec!(10_000_000),
            })
        });
        let captured = submissions.clone();
        let counter = Arc::new(Mutex::new(0u32));
        broker.expect_submit_order().returning(move |request| {
            captured.lock().push(request.clone());
            let mut n = counter.lock();
            *n += 1;
            Ok(OrderAck {
                order_id: OrderId::new(format!("ord-{}", *n)),
            })
        });
        broker.expect_cancel_order().returning(|_| Ok(()));
        let broker: DynBroker = Arc::new(broker);

        let limiter = Arc::new(RateLimiter::new(RateLimits::default()));
        let feed = Arc::new(HybridFeed::new(
            broker.clone(),
            limiter.clone(),
            FeedConfig::default(),
        ));
        feed.track(id(), DataPriority::Critical);
        feed.apply_event(&StreamEvent::Quote(quote(last_price)));

        let (positions, _tracker_join) = spawn_position_tracker(32);
        let stats = Arc::new(DailyStats::new());
        let gate = TradeGate::new(RiskConfig::default(), positions.clone(), stats.clone());
        let (outcome_tx, _outcome_rx) = mpsc::channel(32);
        let orders = PendingOrderMonitor::new(Default::default(), broker.clone(), outcome_tx);

        let queue = Arc::new(SignalQueue::new(32));
        let (exit_tx, exit_rx) = mpsc::channel(8);
        let (pause_tx, pause_rx) = watch::channel(false);
        let token = CancellationToken::new();

        let executor = Executor::new(
            ExecutorConfig::default(),
            ExecutorDeps {
                feed,
                broker,
                limiter,
                gate,
                positions: positions.clone(),
                orders,
                stats,
                queue: queue.clone(),
            },
            pause_rx,
            exit_rx,
        );
        let join = tokio::spawn(executor.run(token.clone()));

        Fixture {
            queue,
            exit_tx,
            pause_tx,
            positions,
            submissions,
            token,
            join,
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_buy_signal_becomes_limit_order() {
        let fx = fixture(dec!(70000)).await;

        fx.queue.push(signal(dec!(80), dec!(70000)));
        settle().await;

        let submitted = fx.submissions.lock().clone();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].side, OrderSide::Buy);
        // Budget 2M / ask 70,000 = 28 shares
        assert_eq!(submitted[0].qty.inner(), 28);

        fx.token.cancel();
        fx.join.await.unwrap();
    }

    #[tokio::test]
    async fn test_expired_signal_never_submits() {
        let fx = fixture(dec!(70000)).await;

        let mut old = signal(dec!(80), dec!(70000));
        old.created_at = Utc::now() - chrono::Duration::seconds(120);
        fx.queue.push(old);
        settle().await;

        assert!(fx.submissions.lock().is_empty());
        fx.token.cancel();
        fx.join.await.unwrap();
    }

    #[tokio::test]
    async fn test_price_drift_discards_signal() {
        // Signal priced at 68,000; market now 70,000 (+2.9% > 1% band)
        let fx = fixture(dec!(70000)).await;

        fx.queue.push(signal(dec!(80), dec!(68000)));
        settle().await;

        assert!(fx.submissions.lock().is_empty());
        fx.token.cancel();
        fx.join.await.unwrap();
    }

    #[tokio::test]
    async fn test_pause_blocks_entries_but_not_exits() {
        let fx = fixture(dec!(70000)).await;
        fx.pause_tx.send(true).unwrap();

        fx.queue.push(signal(dec!(80), dec!(70000)));
        settle().await;
        assert!(fx.submissions.lock().is_empty());

        // Seed a position and push an exit request: it must flow.
        fx.positions
            .open(
                FillEvent {
                    order_id: OrderId::new("seed"),
                    instrument: id(),
                    side: OrderSide::Buy,
                    qty: Qty::new(10),
                    price: Price::new(dec!(70000)),
                    filled_at: Utc::now(),
                },
                Some(StrategyId::Momentum),
                ProtectiveThresholds::conservative(),
            )
            .await;
        settle().await;
        let position = fx.positions.get(&id()).unwrap();

        fx.exit_tx
            .send(ExitRequest {
                position,
                reason: ExitReason::StopLoss,
            })
            .await
            .unwrap();
        settle().await;

        let submitted = fx.submissions.lock().clone();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].side, OrderSide::Sell);

        fx.token.cancel();
        fx.join.await.unwrap();
    }

    #[tokio::test]
    async fn test_sell_signal_without_position_discarded() {
        let fx = fixture(dec!(70000)).await;

        let mut sell = signal(dec!(80), dec!(70000));
        sell.side = OrderSide::Sell;
        fx.queue.push(sell);
        settle().await;

        assert!(fx.submissions.lock().is_empty());
        fx.token.cancel();
        fx.join.await.unwrap();
    }
}
