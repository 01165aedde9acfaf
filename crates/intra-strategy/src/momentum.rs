//! Momentum.
//!
//! Return over a short lookback of scans, with a pullback filter: the
//! move must still be near its own peak to count as live momentum.

use crate::{Strategy, StrategyId, StrategyVote};
use intra_core::{OrderSide, QuoteSnapshot};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

#[derive(Debug, Clone)]
pub struct Momentum {
    /// Snapshots in the lookback window.
    pub lookback: usize,
    /// Minimum absolute return over the window, percent.
    pub min_return_pct: Decimal,
    /// Maximum retrace from the window extreme, percent.
    pub max_pullback_pct: Decimal,
}

impl Default for Momentum {
    fn default() -> Self {
        Self {
            lookback: 10,
            min_return_pct: dec!(1.0),
            max_pullback_pct: dec!(0.7),
        }
    }
}

impl Strategy for Momentum {
    fn id(&self) -> StrategyId {
        StrategyId::Momentum
    }

    fn evaluate(
        &self,
        snapshot: &QuoteSnapshot,
        history: &[QuoteSnapshot],
    ) -> Option<StrategyVote> {
        if history.len() < self.lookback {
            return None;
        }
        let window = &history[history.len() - self.lookback..];
        let base = window.first()?.last_price;
        if base.is_zero() {
            return None;
        }

        let ret = snapshot.last_price.pct_from(base)?;
        let strength = (dec!(50) + ret.abs() * dec!(15)).min(dec!(100));

        if ret >= self.min_return_pct {
            // Still near the window peak?
            let peak = window
                .iter()
                .map(|q| q.last_price)
                .max()
                .unwrap_or(snapshot.last_price)
                .max(snapshot.last_price);
            let pullback = (peak.inner() - snapshot.last_price.inner())
                / peak.inner()
                * dec!(100);
            if pullback > self.max_pullback_pct {
                return None;
            }
            return Some(StrategyVote {
                side: OrderSide::Buy,
                strength,
            });
        }

        if ret <= -self.min_return_pct {
            let trough = window
                .iter()
                .map(|q| q.last_price)
                .min()
                .unwrap_or(snapshot.last_price)
                .min(snapshot.last_price);
            if trough.is_zero() {
                return None;
            }
            let bounce = (snapshot.last_price.inner() - trough.inner())
                / trough.inner()
                * dec!(100);
            if bounce > self.max_pullback_pct {
                return None;
            }
            return Some(StrategyVote {
                side: OrderSide::Sell,
                strength,
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

    fn snapshot(last: Decimal) -> QuoteSnapshot {
        QuoteSnapshot {
            instrument: InstrumentId::new("000660").unwrap(),
            last_price: Price::new(last),
            prev_close: Price::new(dec!(100000)),
            day_high: Price::new(last.max(dec!(100000))),
            day_low: Price::new(dec!(99000)),
            volume: 500_000,
            bid: Price::new(last - dec!(100)),
            ask: Price::new(last),
            received_at: Utc::now(),
            stale: false,
        }
    }

    fn rising(n: usize) -> Vec<QuoteSnapshot> {
        // 100,000 -> ~101,500 over n scans
        (0..n)
            .map(|i| snapshot(dec!(100000) + Decimal::from(i as u32 * 150)))
            .collect()
    }

    #[test]
    fn test_sustained_rise_votes_buy() {
        let history = rising(11);
        let last = history.last().unwrap().clone();
        let vote = Momentum::default().evaluate(&last, &history).unwrap();
        assert_eq!(vote.side, OrderSide::Buy);
        assert!(vote.strength > dec!(50));
    }

    #[test]
    fn test_pullback_cancels_momentum() {
        // Strong rise to 102,500, then a retrace past the pullback cap:
        // window return is still +1.3% but momentum is judged dead.
        let prices = [
            100_000, 100_000, 100_300, 100_600, 100_900, 101_200, 101_500, 101_800, 102_100,
            102_400, 102_500,
        ];
        let mut history: Vec<_> = prices
            .iter()
            .map(|p| snapshot(Decimal::from(*p as u32)))
            .collect();
        let faded = snapshot(dec!(101600));
        history.push(faded.clone());
        assert!(Momentum::default().evaluate(&faded, &history).is_none());
    }

    #[test]
    fn test_flat_window_is_silent() {
        let history: Vec<_> = (0..11).map(|_| snapshot(dec!(100000))).collect();
        let last = history.last().unwrap().clone();
        assert!(Momentum::default().evaluate(&last, &history).is_none());
    }

    #[test]
    fn test_short_history_is_silent() {
        let history = rising(4);
        let last = history.last().unwrap().clone();
        assert!(Momentum::default().evaluate(&last, &history).is_none());
    }
}
