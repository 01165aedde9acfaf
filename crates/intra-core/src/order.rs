//! Order types, identifiers, and lifecycle states.

use crate::decimal::{Price, Qty};
use crate::instrument::InstrumentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Order side: buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    /// Returns 1 for buy, -1 for sell (for position calculations).
    pub fn sign(&self) -> i8 {
        match self {
            Self::Buy => 1,
            Self::Sell => -1,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Limit,
    Market,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Limit => write!(f, "limit"),
            Self::Market => write!(f, "market"),
        }
    }
}

/// What the pending-order monitor does when an order times out unfilled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutAction {
    /// Nudge the limit price toward the market and resubmit.
    PriceAdjust,
    /// Cancel and resubmit as a market order immediately.
    MarketOrder,
}

/// Lifecycle state of a tracked order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    /// Initial limit order is live.
    Submitted,
    /// Resubmitted with an adjusted price after a timeout.
    Adjusting,
    /// Escalated to a market order.
    ForcedMarket,
    /// Confirmed filled. Terminal.
    Filled,
    /// Cancelled without a fill. Terminal.
    Cancelled,
}

impl OrderState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Filled | Self::Cancelled)
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Submitted => write!(f, "submitted"),
            Self::Adjusting => write!(f, "adjusting"),
            Self::ForcedMarket => write!(f, "forced_market"),
            Self::Filled => write!(f, "filled"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Client-generated order id for idempotency.
///
/// Every submission carries a fresh cloid so a retried request can never
/// double-fill.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientOrderId(String);

impl ClientOrderId {
    /// Format: `intra_{timestamp_ms}_{uuid_short}`.
    pub fn new() -> Self {
        let ts = Utc::now().timestamp_millis();
        let uuid_short = &Uuid::new_v4().to_string()[..8];
        Self(format!("intra_{ts}_{uuid_short}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ClientOrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Broker-assigned order id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A request handed to the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub cloid: ClientOrderId,
    pub instrument: InstrumentId,
    pub side: OrderSide,
    pub qty: Qty,
    pub kind: OrderType,
    /// Present iff `kind == Limit`; always snapped to the KRX tick.
    pub limit_price: Option<Price>,
}

impl OrderRequest {
    pub fn limit(instrument: InstrumentId, side: OrderSide, qty: Qty, price: Price) -> Self {
        Self {
            cloid: ClientOrderId::new(),
            instrument,
            side,
            qty,
            kind: OrderType::Limit,
            limit_price: Some(price.snap_to_tick()),
        }
    }

    pub fn market(instrument: InstrumentId, side: OrderSide, qty: Qty) -> Self {
        Self {
            cloid: ClientOrderId::new(),
            instrument,
            side,
            qty,
            kind: OrderType::Market,
            limit_price: None,
        }
    }
}

/// Broker acknowledgement of a submitted order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: OrderId,
}

/// Confirmed execution of (part of) an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillEvent {
    pub order_id: OrderId,
    pub instrument: InstrumentId,
    pub side: OrderSide,
    pub qty: Qty,
    pub price: Price,
    pub filled_at: DateTime<Utc>,
}
