//! Instrument identifiers and data-refresh tiers.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// KRX instrument code (six digits, e.g. "005930").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstrumentId(String);

impl InstrumentId {
    /// Create a validated instrument id.
    pub fn new(code: impl Into<String>) -> Result<Self> {
        let code = code.into();
        if code.len() != 6 || !code.bytes().all(|b| b.is_ascii_digit()) {
            return Err(CoreError::InvalidInstrument(code));
        }
        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for InstrumentId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// Live-stream channel kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// Trade execution ticks.
    TradeTick,
    /// Top-of-book quote depth.
    OrderBook,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TradeTick => write!(f, "trade_tick"),
            Self::OrderBook => write!(f, "order_book"),
        }
    }
}

/// Data refresh tier.
///
/// Governs how fresh an instrument's quote must be (cache TTL), and
/// whether it is entitled to live-stream slots. Ordering matters:
/// `Critical` outranks everything, `Background` nothing.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum DataPriority {
    Critical,
    High,
    Medium,
    Low,
    Background,
}

impl DataPriority {
    /// Target refresh cadence, doubling as the quote-cache TTL.
    pub fn refresh_cadence(&self) -> Duration {
        match self {
            Self::Critical => Duration::from_secs(1),
            Self::High => Duration::from_secs(5),
            Self::Medium => Duration::from_secs(30),
            Self::Low => Duration::from_secs(60),
            Self::Background => Duration::from_secs(300),
        }
    }

    /// Stream slots this tier is entitled to.
    ///
    /// Critical instruments bind both trade ticks and the order book.
    pub fn slot_cost(&self) -> usize {
        match self {
            Self::Critical => 2,
            Self::High => 1,
            _ => 0,
        }
    }

    /// Channels a slot grant at this tier covers.
    pub fn channels(&self) -> &'static [ChannelKind] {
        match self {
            Self::Critical => &[ChannelKind::TradeTick, ChannelKind::OrderBook],
            Self::High => &[ChannelKind::TradeTick],
            _ => &[],
        }
    }

    pub fn stream_eligible(&self) -> bool {
        self.slot_cost() > 0
    }
}

impl fmt::Display for DataPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Critical => write!(f, "critical"),
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
            Self::Background => write!(f, "background"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instrument_id_valid() {
        let id = InstrumentId::new("005930").unwrap();
        assert_eq!(id.as_str(), "005930");
    }

    #[test]
    fn test_instrument_id_invalid() {
        assert!(InstrumentId::new("59").is_err());
        assert!(InstrumentId::new("00593A").is_err());
        assert!(InstrumentId::new("0059301").is_err());
    }

    #[test]
    fn test_tier_ordering() {
        assert!(DataPriority::Critical < DataPriority::High);
        assert!(DataPriority::High < DataPriority::Background);
    }

    #[test]
    fn test_slot_cost() {
        assert_eq!(DataPriority::Critical.slot_cost(), 2);
        assert_eq!(DataPriority::High.slot_cost(), 1);
        assert_eq!(DataPriority::Medium.slot_cost(), 0);
        assert!(!DataPriority::Background.stream_eligible());
    }

    #[test]
    fn test_cadence_monotone() {
        let tiers = [
            DataPriority::Critical,
            DataPriority::High,
            DataPriority::Medium,
            DataPriority::Low,
            DataPriority::Background,
        ];
        for pair in tiers.windows(2) {
            assert!(pair[0].refresh_cadence() < pair[1].refresh_cadence());
        }
    }
}
