//! Market data shapes.
//!
//! `QuoteSnapshot` is the unit everything downstream consumes: the feed
//! owns and refreshes it, workers and the risk monitor only read it.

use crate::decimal::{Price, Qty};
use crate::instrument::InstrumentId;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Latest known state of one instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteSnapshot {
    pub instrument: InstrumentId,
    /// Last traded price.
    pub last_price: Price,
    /// Previous session close.
    pub prev_close: Price,
    /// Session high so far.
    pub day_high: Price,
    /// Session low so far.
    pub day_low: Price,
    /// Accumulated session volume (shares).
    pub volume: u64,
    /// Best bid.
    pub bid: Price,
    /// Best ask.
    pub ask: Price,
    /// When this snapshot was produced.
    pub received_at: DateTime<Utc>,
    /// Set when a remote refresh failed and this is the last known value.
    pub stale: bool,
}

impl QuoteSnapshot {
    /// Change vs previous close, in percent.
    pub fn change_pct(&self) -> Decimal {
        self.last_price
            .pct_from(self.prev_close)
            .unwrap_or(Decimal::ZERO)
    }

    /// Intraday high-low band relative to previous close, in percent.
    ///
    /// Used as the session volatility measure by the entry gate.
    pub fn range_pct(&self) -> Decimal {
        if self.prev_close.is_zero() {
            return Decimal::ZERO;
        }
        (self.day_high.inner() - self.day_low.inner()) / self.prev_close.inner()
            * Decimal::from(100)
    }

    /// Ask - bid.
    pub fn spread(&self) -> Price {
        self.ask - self.bid
    }

    pub fn age_ms(&self) -> i64 {
        (Utc::now() - self.received_at).num_milliseconds()
    }

    /// Quote usable for order pricing: both sides present and not crossed.
    pub fn has_valid_book(&self) -> bool {
        self.bid.is_positive() && self.ask.is_positive() && self.bid < self.ask
    }
}

/// One order book level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: Price,
    pub qty: Qty,
}

/// Quote depth for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBook {
    pub instrument: InstrumentId,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    pub received_at: DateTime<Utc>,
}

impl OrderBook {
    pub fn best_bid(&self) -> Option<BookLevel> {
        self.bids.first().copied()
    }

    pub fn best_ask(&self) -> Option<BookLevel> {
        self.asks.first().copied()
    }
}

/// One daily candle from the historical query.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyBar {
    pub date: NaiveDate,
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
    pub volume: u64,
}

/// Account cash and valuation snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccountBalance {
    /// Cash available for new orders.
    pub available_cash: Decimal,
    /// Total account valuation (cash + positions at market).
    pub total_equity: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn snapshot() -> QuoteSnapshot {
        QuoteSnapshot {
            instrument: InstrumentId::new("005930").unwrap(),
            last_price: Price::new(dec!(71500)),
            prev_close: Price::new(dec!(70000)),
            day_high: Price::new(dec!(72000)),
            day_low: Price::new(dec!(69800)),
            volume: 1_200_000,
            bid: Price::new(dec!(71400)),
            ask: Price::new(dec!(71500)),
            received_at: Utc::now(),
            stale: false,
        }
    }

    #[test]
    fn test_change_pct() {
        let q = snapshot();
        // (71500 - 70000) / 70000 * 100
        assert_eq!(q.change_pct().round_dp(4), dec!(2.1429));
    }

    #[test]
    fn test_range_pct() {
        let q = snapshot();
        // (72000 - 69800) / 70000 * 100
        assert_eq!(q.range_pct().round_dp(4), dec!(3.1429));
    }

    #[test]
    fn test_valid_book() {
        let mut q = snapshot();
        assert!(q.has_valid_book());

        q.bid = Price::new(dec!(71600)); // crossed
        assert!(!q.has_valid_book());

        q.bid = Price::ZERO;
        assert!(!q.has_valid_book());
    }
}
