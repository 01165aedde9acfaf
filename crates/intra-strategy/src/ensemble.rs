//! The ensemble combiner.
//!
//! Runs every strategy the active profile enables, groups the votes by
//! direction, and emits a signal only when enough strategies agree and
//! the weighted score clears the bar.

use crate::signal::TradeSignal;
use crate::{Strategy, StrategyId, StrategyVote};
use chrono::Utc;
use intra_core::{OrderSide, QuoteSnapshot};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::trace;

/// Agreement and score thresholds.
#[derive(Debug, Clone, Copy)]
pub struct EnsembleConfig {
    /// Minimum strategies voting the same direction.
    pub min_agreeing: usize,
    /// Minimum weighted ensemble score, 0..=100.
    pub min_score: Decimal,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            min_agreeing: 1,
            min_score: dec!(60),
        }
    }
}

/// Combines strategy votes under profile weights.
pub struct EnsembleCombiner {
    strategies: Vec<Box<dyn Strategy>>,
    config: EnsembleConfig,
}

impl EnsembleCombiner {
    pub fn new(strategies: Vec<Box<dyn Strategy>>, config: EnsembleConfig) -> Self {
        Self { strategies, config }
    }

    /// Evaluate one instrument against the weighted strategy set.
    ///
    /// `weights` comes from the active profile; strategies with zero
    /// weight are not run at all.
    pub fn evaluate(
        &self,
        snapshot: &QuoteSnapshot,
        history: &[QuoteSnapshot],
        weights: &[(StrategyId, Decimal)],
    ) -> Option<TradeSignal> {
        let mut votes: Vec<(StrategyId, Decimal, StrategyVote)> = Vec::new();

        for (id, weight) in weights {
            if *weight <= Decimal::ZERO {
                continue;
            }
            let Some(strategy) = self.strategies.iter().find(|s| s.id() == *id) else {
                continue;
            };
            if let Some(vote) = strategy.evaluate(snapshot, history) {
                trace!(
                    instrument = %snapshot.instrument,
                    strategy = %id,
                    side = %vote.side,
                    strength = %vote.strength,
                    "strategy vote"
                );
                votes.push((*id, *weight, vote));
            }
        }

        let side = self.winning_side(&votes)?;
        let agreeing: Vec<_> = votes
            .iter()
            .filter(|(_, _, vote)| vote.side == side)
            .collect();

        if agreeing.len() < self.config.min_agreeing {
            return None;
        }

        // Weighted conviction of the agreeing camp. Weights within a
        // profile sum to 1, so the score stays on the 0..=100 scale.
        let score: Decimal = agreeing
            .iter()
            .map(|(_, weight, vote)| *weight * vote.strength)
            .sum();
        if score < self.config.min_score {
            return None;
        }

        let (dominant, _, dominant_vote) = agreeing
            .iter()
            .max_by(|a, b| (a.1 * a.2.strength).cmp(&(b.1 * b.2.strength)))?;

        Some(TradeSignal {
            instrument: snapshot.instrument.clone(),
            strategy: *dominant,
            side,
            strength: dominant_vote.strength,
            ensemble_score: score,
            price_at_signal: snapshot.last_price,
            created_at: Utc::now(),
        })
    }

    /// Direction with the larger weighted backing, None on a dead heat.
    fn winning_side(&self, votes: &[(StrategyId, Decimal, StrategyVote)]) -> Option<OrderSide> {
        let mut buy = Decimal::ZERO;
        let mut sell = Decimal::ZERO;
        for (_, weight, vote) in votes {
            match vote.side {
                OrderSide::Buy => buy += *weight * vote.strength,
                OrderSide::Sell => sell += *weight * vote.strength,
            }
        }
        if buy.is_zero() && sell.is_zero() {
            None
        } else if buy > sell {
            Some(OrderSide::Buy)
        } else if sell > buy {
            Some(OrderSide::Sell)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use intra_core::{InstrumentId, Price};

    /// Fixed-vote stub so combiner logic is tested in isolation.
    struct Fixed {
        id: StrategyId,
        vote: Option<StrategyVote>,
    }

    impl Strategy for Fixed {
        fn id(&self) -> StrategyId {
            self.id
        }

        fn evaluate(&self, _: &QuoteSnapshot, _: &[QuoteSnapshot]) -> Option<StrategyVote> {
            self.vote
        }
    }

    fn fixed(id: StrategyId, side: OrderSide, strength: Decimal) -> Box<dyn Strategy> {
        Box::new(Fixed {
            id,
            vote: Some(StrategyVote { side, strength }),
        })
    }

    fn silent(id: StrategyId) -> Box<dyn Strategy> {
        Box::new(Fixed { id, vote: None })
    }

    fn snapshot() -> QuoteSnapshot {
        QuoteSnapshot {
            instrument: InstrumentId::new("005930").unwrap(),
            last_price: Price::new(dec!(71500)),
            prev_close: Price::new(dec!(70000)),
            day_high: Price::new(dec!(72000)),
            day_low: Price::new(dec!(69800)),
            volume: 100_000,
            bid: Price::new(dec!(71400)),
            ask: Price::new(dec!(71500)),
            received_at: Utc::now(),
            stale: false,
        }
    }

    #[test]
    fn test_weighted_agreement_emits_signal() {
        let combiner = EnsembleCombiner::new(
            vec![
                fixed(StrategyId::VolumeBreakout, OrderSide::Buy, dec!(80)),
                fixed(StrategyId::Momentum, OrderSide::Buy, dec!(60)),
            ],
            EnsembleConfig {
                min_agreeing: 2,
                min_score: dec!(60),
            },
        );
        let weights = [
            (StrategyId::VolumeBreakout, dec!(0.7)),
            (StrategyId::Momentum, dec!(0.3)),
        ];

        let signal = combiner.evaluate(&snapshot(), &[], &weights).unwrap();
        assert_eq!(signal.side, OrderSide::Buy);
        // 0.7*80 + 0.3*60 = 74
        assert_eq!(signal.ensemble_score, dec!(74.0));
        assert_eq!(signal.strategy, StrategyId::VolumeBreakout);
    }

    #[test]
    fn test_insufficient_agreement_is_silent() {
        let combiner = EnsembleCombiner::new(
            vec![
                fixed(StrategyId::VolumeBreakout, OrderSide::Buy, dec!(90)),
                silent(StrategyId::Momentum),
            ],
            EnsembleConfig {
                min_agreeing: 2,
                min_score: dec!(10),
            },
        );
        let weights = [
            (StrategyId::VolumeBreakout, dec!(0.7)),
            (StrategyId::Momentum, dec!(0.3)),
        ];
        assert!(combiner.evaluate(&snapshot(), &[], &weights).is_none());
    }

    #[test]
    fn test_low_score_is_silent() {
        let combiner = EnsembleCombiner::new(
            vec![fixed(StrategyId::Momentum, OrderSide::Buy, dec!(55))],
            EnsembleConfig {
                min_agreeing: 1,
                min_score: dec!(60),
            },
        );
        // 0.6 * 55 = 33 < 60
        let weights = [(StrategyId::Momentum, dec!(0.6))];
        assert!(combiner.evaluate(&snapshot(), &[], &weights).is_none());
    }

    #[test]
    fn test_opposing_camps_majority_wins() {
        let combiner = EnsembleCombiner::new(
            vec![
                fixed(StrategyId::VolumeBreakout, OrderSide::Buy, dec!(90)),
                fixed(StrategyId::Momentum, OrderSide::Sell, dec!(90)),
            ],
            EnsembleConfig {
                min_agreeing: 1,
                min_score: dec!(10),
            },
        );
        let weights = [
            (StrategyId::VolumeBreakout, dec!(0.8)),
            (StrategyId::Momentum, dec!(0.2)),
        ];
        let signal = combiner.evaluate(&snapshot(), &[], &weights).unwrap();
        assert_eq!(signal.side, OrderSide::Buy);
        // Only the agreeing camp contributes to the score
        assert_eq!(signal.ensemble_score, dec!(72.0));
    }

    #[test]
    fn test_zero_weight_strategy_never_runs() {
        let combiner = EnsembleCombiner::new(
            vec![fixed(StrategyId::GapTrading, OrderSide::Buy, dec!(100))],
            EnsembleConfig {
                min_agreeing: 1,
                min_score: dec!(1),
            },
        );
        let weights = [(StrategyId::GapTrading, Decimal::ZERO)];
        assert!(combiner.evaluate(&snapshot(), &[], &weights).is_none());
    }
}
