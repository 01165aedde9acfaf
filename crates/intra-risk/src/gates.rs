//! Pre-trade gating.
//!
//! Every candidate buy passes through `can_buy` before the executor
//! touches the broker. First failing check wins; the reason is logged
//! and the signal discarded, never retried.

use intra_core::{AccountBalance, InstrumentId, Price, Qty};
use intra_position::PositionTrackerHandle;
use intra_telemetry::DailyStats;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Why a candidate order was rejected.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RejectReason {
    MaxPositions { open: usize, max: usize },
    AlreadyHolding,
    InsufficientCash { notional: Decimal, budget: Decimal },
    DailyLossBreached { day_pnl: Decimal, limit: Decimal },
    VolatilityCeiling { observed: Decimal, ceiling: Decimal },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MaxPositions { open, max } => {
                write!(f, "position limit reached ({open}/{max})")
            }
            Self::AlreadyHolding => write!(f, "already holding this instrument"),
            Self::InsufficientCash { notional, budget } => {
                write!(f, "order notional {notional} exceeds budget {budget}")
            }
            Self::DailyLossBreached { day_pnl, limit } => {
                write!(f, "daily loss limit breached ({day_pnl} <= -{limit})")
            }
            Self::VolatilityCeiling { observed, ceiling } => {
                write!(f, "volatility {observed}% above ceiling {ceiling}%")
            }
        }
    }
}

/// Pre-trade gate configuration.
#[derive(Debug, Clone)]
pub struct RiskConfig {
    /// Maximum concurrently open positions.
    pub max_positions: usize,
    /// Budget per position as a percentage of available cash.
    pub position_size_pct: Decimal,
    /// Daily loss cap in won (positive number).
    pub daily_loss_limit: Decimal,
    /// Session high-low band ceiling, percent.
    pub volatility_ceiling_pct: Decimal,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_positions: 10,
            position_size_pct: Decimal::from(20),
            daily_loss_limit: Decimal::from(500_000),
            volatility_ceiling_pct: Decimal::from(8),
        }
    }
}

/// The pre-trade check.
pub struct TradeGate {
    config: RiskConfig,
    positions: PositionTrackerHandle,
    stats: Arc<DailyStats>,
}

impl TradeGate {
    pub fn new(
        config: RiskConfig,
        positions: PositionTrackerHandle,
        stats: Arc<DailyStats>,
    ) -> Self {
        Self {
            config,
            positions,
            stats,
        }
    }

    /// Gate a candidate buy. Checks run in fixed order and the first
    /// failure is returned.
    pub fn can_buy(
        &self,
        instrument: &InstrumentId,
        qty: Qty,
        price: Price,
        balance: &AccountBalance,
        volatility_pct: Decimal,
    ) -> Result<(), RejectReason> {
        let open = self.positions.count();
        if open >= self.config.max_positions {
            return Err(RejectReason::MaxPositions {
                open,
                max: self.config.max_positions,
            });
        }

        if self.positions.has_position(instrument) {
            return Err(RejectReason::AlreadyHolding);
        }

        let notional = qty.notional(price);
        let budget = self.position_budget(balance);
        if notional > budget {
            return Err(RejectReason::InsufficientCash { notional, budget });
        }

        // Realized plus unrealized: a day under water stops adding risk.
        let day_pnl = self.stats.realized_pnl() + self.positions.total_unrealized_pnl();
        if day_pnl <= -self.config.daily_loss_limit {
            return Err(RejectReason::DailyLossBreached {
                day_pnl,
                limit: self.config.daily_loss_limit,
            });
        }

        if volatility_pct > self.config.volatility_ceiling_pct {
            return Err(RejectReason::VolatilityCeiling {
                observed: volatility_pct,
                ceiling: self.config.volatility_ceiling_pct,
            });
        }

        debug!(%instrument, %qty, %price, "pre-trade gate passed");
        Ok(())
    }

    /// Cash budget for one new position.
    pub fn position_budget(&self, balance: &AccountBalance) -> Decimal {
        balance.available_cash * self.config.position_size_pct / Decimal::from(100)
    }

    /// Shares affordable within the per-position budget at `price`.
    pub fn size_position(&self, price: Price, balance: &AccountBalance) -> Qty {
        if !price.is_positive() {
            return Qty::ZERO;
        }
        let shares = (self.position_budget(balance) / price.inner())
            .floor()
            .to_u64()
            .unwrap_or(0);
        Qty::new(shares)
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use intra_core::{FillEvent, OrderId, OrderSide, ProtectiveThresholds};
    use intra_position::spawn_position_tracker;
    use rust_decimal_macros::dec;

    fn id(n: u32) -> InstrumentId {
        InstrumentId::new(format!("{n:06}")).unwrap()
    }

    fn balance(cash: Decimal) -> AccountBalance {
        AccountBalance {
            available_cash: cash,
            total_equity: cash,
        }
    }

    fn buy_fill(instrument: InstrumentId, qty: u64, price: Decimal) -> FillEvent {
        FillEvent {
            order_id: OrderId::new("ord"),
            instrument,
            side: OrderSide::Buy,
            qty: Qty::new(qty),
            price: Price::new(price),
            filled_at: Utc::now(),
        }
    }

    async fn settle() {
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    fn gate(config: RiskConfig, positions: PositionTrackerHandle) -> TradeGate {
        TradeGate::new(config, positions, Arc::new(DailyStats::new()))
    }

    #[tokio::test]
    async fn test_clean_order_passes() {
        let (positions, _join) = spawn_position_tracker(16);
        let gate = gate(RiskConfig::default(), positions);

        let result = gate.can_buy(
            &id(1),
            Qty::new(10),
            Price::new(dec!(70000)),
            &balance(dec!(10_000_000)),
            dec!(3),
        );
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_max_positions_rejects_regardless_of_anything() {
        let (positions, _join) = spawn_position_tracker(16);
        for n in 0..10 {
            positions
                .open(
                    buy_fill(id(n), 1, dec!(10000)),
                    None,
                    ProtectiveThresholds::conservative(),
                )
                .await;
        }
        settle().await;

        let gate = gate(RiskConfig::default(), positions);
        let result = gate.can_buy(
            &id(99),
            Qty::new(1),
            Price::new(dec!(10000)),
            &balance(dec!(100_000_000)),
            dec!(1),
        );
        assert_eq!(
            result,
            Err(RejectReason::MaxPositions { open: 10, max: 10 })
        );
    }

    #[tokio::test]
    async fn test_duplicate_instrument_rejected() {
        let (positions, _join) = spawn_position_tracker(16);
        positions
            .open(
                buy_fill(id(1), 10, dec!(70000)),
                None,
                ProtectiveThresholds::conservative(),
            )
            .await;
        settle().await;

        let gate = gate(RiskConfig::default(), positions);
        let result = gate.can_buy(
            &id(1),
            Qty::new(10),
            Price::new(dec!(70000)),
            &balance(dec!(100_000_000)),
            dec!(1),
        );
        assert_eq!(result, Err(RejectReason::AlreadyHolding));
    }

    #[tokio::test]
    async fn test_oversized_order_rejected() {
        let (positions, _join) = spawn_position_tracker(16);
        let gate = gate(RiskConfig::default(), positions);

        // Budget = 10M * 20% = 2M; order = 100 * 70,000 = 7M
        let result = gate.can_buy(
            &id(1),
            Qty::new(100),
            Price::new(dec!(70000)),
            &balance(dec!(10_000_000)),
            dec!(1),
        );
        assert!(matches!(result, Err(RejectReason::InsufficientCash { .. })));
    }

    #[tokio::test]
    async fn test_daily_loss_blocks_new_entries() {
        let (positions, _join) = spawn_position_tracker(16);
        let stats = Arc::new(DailyStats::new());
        stats.record_trade_closed(dec!(-600_000));
        let gate = TradeGate::new(RiskConfig::default(), positions, stats);

        let result = gate.can_buy(
            &id(1),
            Qty::new(1),
            Price::new(dec!(10000)),
            &balance(dec!(10_000_000)),
            dec!(1),
        );
        assert!(matches!(result, Err(RejectReason::DailyLossBreached { .. })));
    }

    #[tokio::test]
    async fn test_volatility_ceiling_rejects() {
        let (positions, _join) = spawn_position_tracker(16);
        let gate = gate(RiskConfig::default(), positions);

        let result = gate.can_buy(
            &id(1),
            Qty::new(1),
            Price::new(dec!(10000)),
            &balance(dec!(10_000_000)),
            dec!(12),
        );
        assert!(matches!(result, Err(RejectReason::VolatilityCeiling { .. })));
    }

    #[tokio::test]
    async fn test_size_position_floors_shares() {
        let (positions, _join) = spawn_position_tracker(16);
        let gate = gate(RiskConfig::default(), positions);

        // Budget 2M / 70,000 = 28.57 -> 28 shares
        let qty = gate.size_position(Price::new(dec!(70000)), &balance(dec!(10_000_000)));
        assert_eq!(qty.inner(), 28);

        assert_eq!(gate.size_position(Price::ZERO, &balance(dec!(1))).inner(), 0);
    }
}
