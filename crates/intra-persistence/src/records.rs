//! Record shapes emitted by the engine.
//!
//! Flat, stringly-typed where it keeps consumers simple; immutable once
//! created. The storage schema beyond these shapes is not defined here.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A signal that cleared the ensemble thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalRecord {
    pub created_at: DateTime<Utc>,
    pub instrument: String,
    pub strategy: String,
    pub side: String,
    pub strength: Decimal,
    pub ensemble_score: Decimal,
}

/// A confirmed fill, entry or exit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub filled_at: DateTime<Utc>,
    pub instrument: String,
    pub side: String,
    pub qty: u64,
    pub price: Decimal,
    pub order_id: String,
    /// Originating strategy for entries.
    pub strategy: Option<String>,
    /// Exit reason for exits.
    pub exit_reason: Option<String>,
}

/// A closed position with its realized result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionRecord {
    pub instrument: String,
    pub qty: u64,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub entry_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    pub strategy: Option<String>,
    pub exit_reason: Option<String>,
    pub realized_pnl: Decimal,
    pub pnl_pct: Decimal,
}

/// Envelope routed to the recorder task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Record {
    Signal(SignalRecord),
    Trade(TradeRecord),
    Position(PositionRecord),
}

impl Record {
    /// File stem the record lands in (`signals_YYYY-MM-DD.jsonl` etc).
    pub fn file_stem(&self) -> &'static str {
        match self {
            Self::Signal(_) => "signals",
            Self::Trade(_) => "trades",
            Self::Position(_) => "positions",
        }
    }
}
