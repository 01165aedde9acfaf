//! Exit-condition evaluation for open positions.
//!
//! Conditions are checked in strict priority order and exactly one
//! reason fires per pass: stop-loss, take-profit, time-based exit,
//! trailing stop, then the emergency backstop. A zero stop or target
//! threshold disables that individual check.

use intra_position::Position;
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;

/// Why a position is being closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    TimeLimit,
    TrailingStop,
    EmergencyStop,
    /// The ensemble voted to sell a held instrument.
    SignalExit,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StopLoss => "stop_loss",
            Self::TakeProfit => "take_profit",
            Self::TimeLimit => "time_limit",
            Self::TrailingStop => "trailing_stop",
            Self::EmergencyStop => "emergency_stop",
            Self::SignalExit => "signal_exit",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// First matching exit condition for a marked position, if any.
///
/// The caller marks the position to the latest price before evaluating;
/// `profit_pct` and `peak_profit_pct` are read as-is.
pub fn evaluate_exit(position: &Position) -> Option<ExitReason> {
    let t = &position.thresholds;
    let profit = position.profit_pct();
    let held_secs = position.holding().num_seconds();
    let min_hold_secs = t.min_holding.as_secs() as i64;

    // 1. Hard stop-loss: fires before anything else is even looked at.
    if t.stop_loss_pct < Decimal::ZERO && profit <= t.stop_loss_pct {
        return Some(ExitReason::StopLoss);
    }

    // 2. Hard take-profit.
    if t.take_profit_pct > Decimal::ZERO && profit >= t.take_profit_pct {
        return Some(ExitReason::TakeProfit);
    }

    // 3. Time-based exit: held well past the strategy horizon with at
    //    least the minimum profit banked.
    let time_limit_secs = {
        use rust_decimal::prelude::ToPrimitive;
        (Decimal::from(min_hold_secs) * t.time_exit_multiple)
            .to_i64()
            .unwrap_or(i64::MAX)
    };
    if held_secs >= time_limit_secs && profit >= t.time_exit_min_profit_pct {
        return Some(ExitReason::TimeLimit);
    }

    // 4. Trailing stop: armed once the peak reached the trigger, fires
    //    on retrace from that peak.
    if held_secs >= min_hold_secs
        && position.peak_profit_pct >= t.trailing_trigger_pct
        && position.peak_profit_pct - profit >= t.trailing_gap_pct
    {
        return Some(ExitReason::TrailingStop);
    }

    // 5. Emergency backstop for sharp adverse moves, any hold time.
    if profit <= t.emergency_drop_pct {
        return Some(ExitReason::EmergencyStop);
    }

    None
}
