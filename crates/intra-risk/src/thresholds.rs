//! Per-strategy protective threshold sets.
//!
//! Each strategy trades a different horizon, so its positions get their
//! own stop/target/trailing parameters. Unknown origin falls back to
//! the conservative default.

use intra_core::ProtectiveThresholds;
use intra_strategy::StrategyId;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::time::Duration;

/// Lookup from originating strategy to exit parameters.
#[derive(Debug, Clone)]
pub struct ThresholdTable {
    by_strategy: HashMap<StrategyId, ProtectiveThresholds>,
    fallback: ProtectiveThresholds,
}

impl ThresholdTable {
    pub fn new(
        by_strategy: HashMap<StrategyId, ProtectiveThresholds>,
        fallback: ProtectiveThresholds,
    ) -> Self {
        Self {
            by_strategy,
            fallback,
        }
    }

    /// Thresholds for a position's originating strategy.
    pub fn for_strategy(&self, strategy: Option<StrategyId>) -> ProtectiveThresholds {
        strategy
            .and_then(|id| self.by_strategy.get(&id).copied())
            .unwrap_or(self.fallback)
    }
}

impl Default for ThresholdTable {
    /// Production defaults tuned per strategy horizon.
    fn default() -> Self {
        let mut by_strategy = HashMap::new();
        by_strategy.insert(
            StrategyId::GapTrading,
            ProtectiveThresholds {
                stop_loss_pct: dec!(-3.5),
                take_profit_pct: dec!(5.5),
                trailing_trigger_pct: dec!(3.0),
                trailing_gap_pct: dec!(1.5),
                min_holding: Duration::from_secs(45 * 60),
                time_exit_multiple: dec!(2.5),
                time_exit_min_profit_pct: dec!(0.3),
                emergency_drop_pct: dec!(-10.0),
            },
        );
        by_strategy.insert(
            StrategyId::VolumeBreakout,
            ProtectiveThresholds {
                stop_loss_pct: dec!(-4.5),
                take_profit_pct: dec!(7.5),
                trailing_trigger_pct: dec!(3.5),
                trailing_gap_pct: dec!(2.0),
                min_holding: Duration::from_secs(60 * 60),
                time_exit_multiple: dec!(2.5),
                time_exit_min_profit_pct: dec!(0.3),
                emergency_drop_pct: dec!(-10.0),
            },
        );
        by_strategy.insert(
            StrategyId::Momentum,
            ProtectiveThresholds {
                stop_loss_pct: dec!(-3.0),
                take_profit_pct: dec!(6.5),
                trailing_trigger_pct: dec!(3.5),
                trailing_gap_pct: dec!(1.8),
                min_holding: Duration::from_secs(45 * 60),
                time_exit_multiple: dec!(2.5),
                time_exit_min_profit_pct: dec!(0.3),
                emergency_drop_pct: dec!(-10.0),
            },
        );
        Self::new(by_strategy, ProtectiveThresholds::conservative())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_strategy_gets_own_set() {
        let table = ThresholdTable::default();
        let gap = table.for_strategy(Some(StrategyId::GapTrading));
        assert_eq!(gap.stop_loss_pct, dec!(-3.5));

        let volume = table.for_strategy(Some(StrategyId::VolumeBreakout));
        assert_eq!(volume.take_profit_pct, dec!(7.5));
    }

    #[test]
    fn test_unknown_origin_gets_conservative() {
        let table = ThresholdTable::default();
        let fallback = table.for_strategy(None);
        assert_eq!(fallback, ProtectiveThresholds::conservative());
    }
}
