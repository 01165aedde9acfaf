//! Gap trading.
//!
//! Plays the opening dislocation: an instrument that gapped up from the
//! previous close on real volume tends to keep running through the
//! first half hour. An excessive gap is skipped; those revert.

use crate::{Strategy, StrategyId, StrategyVote};
use intra_core::{OrderSide, QuoteSnapshot};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

#[derive(Debug, Clone)]
pub struct GapTrading {
    /// Minimum gap vs previous close, percent.
    pub min_gap_pct: Decimal,
    /// Gaps beyond this are treated as exhaustion and skipped.
    pub max_gap_pct: Decimal,
    /// Minimum session volume before a gap counts.
    pub min_volume: u64,
}

impl Default for GapTrading {
    fn default() -> Self {
        Self {
            min_gap_pct: dec!(1.0),
            max_gap_pct: dec!(8.0),
            min_volume: 50_000,
        }
    }
}

impl GapTrading {
    fn strength_for(&self, gap: Decimal) -> Decimal {
        // 1% gap -> 60, scaling up to 100 at the exhaustion bound.
        let span = self.max_gap_pct - self.min_gap_pct;
        if span <= Decimal::ZERO {
            return dec!(60);
        }
        let scaled = dec!(60) + (gap - self.min_gap_pct) / span * dec!(40);
        scaled.min(dec!(100))
    }
}

impl Strategy for GapTrading {
    fn id(&self) -> StrategyId {
        StrategyId::GapTrading
    }

    fn evaluate(
        &self,
        snapshot: &QuoteSnapshot,
        _history: &[QuoteSnapshot],
    ) -> Option<StrategyVote> {
        if snapshot.volume < self.min_volume || snapshot.prev_close.is_zero() {
            return None;
        }

        let gap = snapshot.change_pct();
        if gap >= self.min_gap_pct && gap <= self.max_gap_pct {
            return Some(StrategyVote {
                side: OrderSide::Buy,
                strength: self.strength_for(gap),
            });
        }
        // Mirror on the downside: a controlled gap-down marks weakness.
        if gap <= -self.min_gap_pct && gap >= -self.max_gap_pct {
            return Some(StrategyVote {
                side: OrderSide::Sell,
                strength: self.strength_for(-gap),
            });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use intra_core::{InstrumentId, Price};

    fn snapshot(last: Decimal, prev_close: Decimal, volume: u64) -> QuoteSnapshot {
        QuoteSnapshot {
            instrument: InstrumentId::new("005930").unwrap(),
            last_price: Price::new(last),
            prev_close: Price::new(prev_close),
            day_high: Price::new(last),
            day_low: Price::new(prev_close),
            volume,
            bid: Price::new(last - dec!(50)),
            ask: Price::new(last),
            received_at: Utc::now(),
            stale: false,
        }
    }

    #[test]
    fn test_gap_up_votes_buy() {
        // +2.1% gap
        let vote = GapTrading::default()
            .evaluate(&snapshot(dec!(71500), dec!(70000), 100_000), &[])
            .unwrap();
        assert_eq!(vote.side, OrderSide::Buy);
        assert!(vote.strength > dec!(60));
    }

    #[test]
    fn test_flat_open_is_silent() {
        let vote = GapTrading::default().evaluate(&snapshot(dec!(70100), dec!(70000), 100_000), &[]);
        assert!(vote.is_none());
    }

    #[test]
    fn test_exhaustion_gap_skipped() {
        // +10% gap is beyond the bound
        let vote = GapTrading::default().evaluate(&snapshot(dec!(77000), dec!(70000), 100_000), &[]);
        assert!(vote.is_none());
    }

    #[test]
    fn test_thin_volume_skipped() {
        let vote = GapTrading::default().evaluate(&snapshot(dec!(71500), dec!(70000), 1_000), &[]);
        assert!(vote.is_none());
    }

    #[test]
    fn test_gap_down_votes_sell() {
        let vote = GapTrading::default()
            .evaluate(&snapshot(dec!(68500), dec!(70000), 100_000), &[])
            .unwrap();
        assert_eq!(vote.side, OrderSide::Sell);
    }
}
