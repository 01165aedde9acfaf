//! Trade signals emitted by the ensemble.

use crate::StrategyId;
use chrono::{DateTime, Utc};
use intra_core::{InstrumentId, OrderSide, Price};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A candidate trade produced by analysis. Immutable once created;
/// expires instead of being mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeSignal {
    pub instrument: InstrumentId,
    /// Dominant contributing strategy; selects the position's
    /// protective thresholds after a fill.
    pub strategy: StrategyId,
    pub side: OrderSide,
    /// Dominant strategy's own conviction, 0..=100.
    pub strength: Decimal,
    /// Weighted ensemble score, 0..=100. The queue ranks by this.
    pub ensemble_score: Decimal,
    /// Last price at generation time; the executor rejects the signal
    /// when the market has since drifted outside its band.
    pub price_at_signal: Price,
    pub created_at: DateTime<Utc>,
}

impl TradeSignal {
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.created_at
    }

    /// Signals older than the threshold are discarded, never executed.
    pub fn is_expired(&self, max_age: Duration) -> bool {
        self.age().num_milliseconds() >= max_age.as_millis() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn signal(created_at: DateTime<Utc>) -> TradeSignal {
        TradeSignal {
            instrument: InstrumentId::new("005930").unwrap(),
            strategy: StrategyId::GapTrading,
            side: OrderSide::Buy,
            strength: dec!(70),
            ensemble_score: dec!(65),
            price_at_signal: Price::new(dec!(71500)),
            created_at,
        }
    }

    #[test]
    fn test_fresh_signal_not_expired() {
        let s = signal(Utc::now());
        assert!(!s.is_expired(Duration::from_secs(60)));
    }

    #[test]
    fn test_old_signal_expired() {
        let s = signal(Utc::now() - chrono::Duration::seconds(120));
        assert!(s.is_expired(Duration::from_secs(60)));
    }
}
