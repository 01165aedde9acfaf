//! Volume breakout.
//!
//! Watches the rate of volume accumulation between scans: a burst well
//! above the recent average while price presses the session high marks
//! institutional interest.

use crate::{Strategy, StrategyId, StrategyVote};
use intra_core::{OrderSide, QuoteSnapshot};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

#[derive(Debug, Clone)]
pub struct VolumeBreakout {
    /// Latest inter-scan volume delta must exceed the average by this factor.
    pub breakout_ratio: Decimal,
    /// How close to the session high price must be, percent.
    pub near_high_pct: Decimal,
    /// Minimum history snapshots before the average is meaningful.
    pub min_history: usize,
}

impl Default for VolumeBreakout {
    fn default() -> Self {
        Self {
            breakout_ratio: dec!(2.0),
            near_high_pct: dec!(0.5),
            min_history: 6,
        }
    }
}

impl VolumeBreakout {
    /// Volume deltas between consecutive snapshots (cumulative volume is
    /// monotone within a session).
    fn volume_deltas(history: &[QuoteSnapshot]) -> Vec<u64> {
        history
            .windows(2)
            .map(|pair| pair[1].volume.saturating_sub(pair[0].volume))
            .collect()
    }
}

impl Strategy for VolumeBreakout {
    fn id(&self) -> StrategyId {
        StrategyId::VolumeBreakout
    }

    fn evaluate(
        &self,
        snapshot: &QuoteSnapshot,
        history: &[QuoteSnapshot],
    ) -> Option<StrategyVote> {
        if history.len() < self.min_history {
            return None;
        }

        let deltas = Self::volume_deltas(history);
        let (last, earlier) = deltas.split_last()?;
        if earlier.is_empty() || *last == 0 {
            return None;
        }
        let avg: u64 = earlier.iter().sum::<u64>() / earlier.len() as u64;
        if avg == 0 {
            return None;
        }

        let ratio = Decimal::from(*last) / Decimal::from(avg);
        if ratio < self.breakout_ratio {
            return None;
        }

        // Burst only counts when price confirms against the session high.
        let high = snapshot.day_high;
        if high.is_zero() {
            return None;
        }
        let distance = (high.inner() - snapshot.last_price.inner()) / high.inner() * dec!(100);
        if distance > self.near_high_pct {
            return None;
        }

        let strength = (dec!(50) + ratio * dec!(10)).min(dec!(100));
        Some(StrategyVote {
            side: OrderSide::Buy,
            strength,
        })
    }
}
