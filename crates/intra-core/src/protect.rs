//! Protective thresholds carried by every open position.
//!
//! Each strategy gets its own stop/target/trailing parameters; a
//! position whose originating strategy is unknown falls back to the
//! conservative default set.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exit parameters for one position, percentages relative to entry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProtectiveThresholds {
    /// Hard stop, negative (e.g. -3.0 = cut at -3%).
    pub stop_loss_pct: Decimal,
    /// Hard target, positive.
    pub take_profit_pct: Decimal,
    /// Trailing stop arms once profit reaches this.
    pub trailing_trigger_pct: Decimal,
    /// Armed trailing stop fires after this retrace from the peak.
    pub trailing_gap_pct: Decimal,
    /// Minimum hold before trailing/time exits apply.
    pub min_holding: Duration,
    /// Time exit fires past `min_holding * time_exit_multiple` when the
    /// position shows at least `time_exit_min_profit_pct`.
    pub time_exit_multiple: Decimal,
    pub time_exit_min_profit_pct: Decimal,
    /// Immediate exit on a move at least this adverse, any hold time.
    pub emergency_drop_pct: Decimal,
}

impl ProtectiveThresholds {
    /// Conservative set used when the originating strategy is unknown.
    pub fn conservative() -> Self {
        Self {
            stop_loss_pct: dec!(-3.0),
            take_profit_pct: dec!(5.0),
            trailing_trigger_pct: dec!(2.5),
            trailing_gap_pct: dec!(1.2),
            min_holding: Duration::from_secs(30 * 60),
            time_exit_multiple: dec!(2.5),
            time_exit_min_profit_pct: dec!(0.3),
            emergency_drop_pct: dec!(-10.0),
        }
    }
}

impl Default for ProtectiveThresholds {
    fn default() -> Self {
        Self::conservative()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conservative_defaults_sane() {
        let t = ProtectiveThresholds::conservative();
        assert!(t.stop_loss_pct < Decimal::ZERO);
        assert!(t.take_profit_pct > Decimal::ZERO);
        assert!(t.trailing_gap_pct < t.trailing_trigger_pct);
        assert!(t.emergency_drop_pct < t.stop_loss_pct);
    }
}
