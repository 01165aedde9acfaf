//! Trading strategies and signal generation.
//!
//! Strategies form a closed set of variants sharing one evaluation
//! interface; the ensemble combiner weighs their votes into a single
//! ranking score so the pipeline stays generic over the set.

pub mod ensemble;
pub mod gap;
pub mod momentum;
pub mod signal;
pub mod volume;

use intra_core::QuoteSnapshot;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub use ensemble::{EnsembleCombiner, EnsembleConfig};
pub use gap::GapTrading;
pub use momentum::Momentum;
pub use signal::TradeSignal;
pub use volume::VolumeBreakout;

/// Strategy errors.
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("Unknown strategy: {0}")]
    Unknown(String),
}

/// The closed set of strategy variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyId {
    GapTrading,
    VolumeBreakout,
    Momentum,
}

impl StrategyId {
    pub const ALL: [StrategyId; 3] = [
        StrategyId::GapTrading,
        StrategyId::VolumeBreakout,
        StrategyId::Momentum,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GapTrading => "gap_trading",
            Self::VolumeBreakout => "volume_breakout",
            Self::Momentum => "momentum",
        }
    }
}

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for StrategyId {
    type Err = StrategyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gap_trading" => Ok(Self::GapTrading),
            "volume_breakout" => Ok(Self::VolumeBreakout),
            "momentum" => Ok(Self::Momentum),
            other => Err(StrategyError::Unknown(other.to_string())),
        }
    }
}

/// One strategy's directional opinion on an instrument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrategyVote {
    pub side: intra_core::OrderSide,
    /// Conviction in 0..=100.
    pub strength: Decimal,
}

/// Evaluation interface shared by all strategy variants.
///
/// Implementations are pure: they read the snapshot and recent history
/// and never touch shared state, so workers can call them freely in
/// parallel.
pub trait Strategy: Send + Sync {
    fn id(&self) -> StrategyId;

    /// Scored directional opinion, or None when conditions do not line
    /// up. `history` is oldest-first intraday snapshots.
    fn evaluate(&self, snapshot: &QuoteSnapshot, history: &[QuoteSnapshot])
        -> Option<StrategyVote>;
}

/// Instantiate the full strategy set with default parameters.
pub fn default_strategies() -> Vec<Box<dyn Strategy>> {
    vec![
        Box::new(GapTrading::default()),
        Box::new(VolumeBreakout::default()),
        Box::new(Momentum::default()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_id_round_trip() {
        for id in StrategyId::ALL {
            assert_eq!(id.as_str().parse::<StrategyId>().unwrap(), id);
        }
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        assert!("arbitrage".parse::<StrategyId>().is_err());
    }

    #[test]
    fn test_default_set_is_complete() {
        let strategies = default_strategies();
        let ids: Vec<StrategyId> = strategies.iter().map(|s| s.id()).collect();
        for id in StrategyId::ALL {
            assert!(ids.contains(&id));
        }
    }
}
