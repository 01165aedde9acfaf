//! Daily trading statistics.
//!
//! Single owner of the day's counters: signal/order/fill counts, wins
//! and losses, realized PnL. Feeds both the daily-loss risk gate and
//! the today-summary control query. Counters roll over automatically on
//! the first record of a new (KST) session date.

use chrono::{FixedOffset, NaiveDate, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Serialize;

const KST_OFFSET_SECS: i32 = 9 * 3600;

fn session_date() -> NaiveDate {
    let offset = FixedOffset::east_opt(KST_OFFSET_SECS).expect("fixed offset is valid");
    Utc::now().with_timezone(&offset).date_naive()
}

#[derive(Debug, Clone, Serialize)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub signals_generated: u64,
    pub orders_submitted: u64,
    pub orders_filled: u64,
    pub orders_cancelled: u64,
    pub trades_closed: u64,
    pub wins: u64,
    pub losses: u64,
    pub realized_pnl: Decimal,
}

impl DailySummary {
    fn new(date: NaiveDate) -> Self {
        Self {
            date,
            signals_generated: 0,
            orders_submitted: 0,
            orders_filled: 0,
            orders_cancelled: 0,
            trades_closed: 0,
            wins: 0,
            losses: 0,
            realized_pnl: Decimal::ZERO,
        }
    }

    pub fn win_rate(&self) -> Option<Decimal> {
        if self.trades_closed == 0 {
            return None;
        }
        Some(Decimal::from(self.wins) / Decimal::from(self.trades_closed) * Decimal::from(100))
    }
}

/// Thread-safe day counters.
pub struct DailyStats {
    inner: Mutex<DailySummary>,
}

impl DailyStats {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(DailySummary::new(session_date())),
        }
    }

    fn with_today<R>(&self, f: impl FnOnce(&mut DailySummary) -> R) -> R {
        let mut inner = self.inner.lock();
        let today = session_date();
        if inner.date != today {
            *inner = DailySummary::new(today);
        }
        f(&mut inner)
    }

    pub fn record_signal(&self) {
        self.with_today(|day| day.signals_generated += 1);
    }

    pub fn record_order_submitted(&self) {
        self.with_today(|day| day.orders_submitted += 1);
    }

    pub fn record_order_filled(&self) {
        self.with_today(|day| day.orders_filled += 1);
    }

    pub fn record_order_cancelled(&self) {
        self.with_today(|day| day.orders_cancelled += 1);
    }

    /// Record a closed trade with its realized PnL.
    pub fn record_trade_closed(&self, pnl: Decimal) {
        self.with_today(|day| {
            day.trades_closed += 1;
            day.realized_pnl += pnl;
            if pnl >= Decimal::ZERO {
                day.wins += 1;
            } else {
                day.losses += 1;
            }
        });
    }

    /// Today's realized PnL.
    pub fn realized_pnl(&self) -> Decimal {
        self.with_today(|day| day.realized_pnl)
    }

    pub fn summary(&self) -> DailySummary {
        self.with_today(|day| day.clone())
    }
}

impl Default for DailyStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_counters_accumulate() {
        let stats = DailyStats::new();
        stats.record_signal();
        stats.record_signal();
        stats.record_order_submitted();
        stats.record_order_filled();

        let summary = stats.summary();
        assert_eq!(summary.signals_generated, 2);
        assert_eq!(summary.orders_submitted, 1);
        assert_eq!(summary.orders_filled, 1);
    }

    #[test]
    fn test_pnl_and_win_rate() {
        let stats = DailyStats::new();
        stats.record_trade_closed(dec!(14000));
        stats.record_trade_closed(dec!(-5000));
        stats.record_trade_closed(dec!(2000));

        let summary = stats.summary();
        assert_eq!(summary.realized_pnl, dec!(11000));
        assert_eq!(summary.wins, 2);
        assert_eq!(summary.losses, 1);
        assert_eq!(summary.win_rate().unwrap().round_dp(2), dec!(66.67));
    }

    #[test]
    fn test_empty_day_has_no_win_rate() {
        let stats = DailyStats::new();
        assert!(stats.summary().win_rate().is_none());
        assert_eq!(stats.realized_pnl(), Decimal::ZERO);
    }
}
