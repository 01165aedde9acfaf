//! Wire message shapes shared by the REST and stream transports.
//!
//! Prices travel as strings to keep exact decimal values across the wire.

use crate::error::{BrokerError, BrokerResult};
use chrono::{DateTime, Utc};
use intra_core::{
    BookLevel, ChannelKind, FillEvent, InstrumentId, OrderBook, OrderId, OrderSide, Price, Qty,
    QuoteSnapshot,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Outbound stream control frame.
#[derive(Debug, Serialize)]
pub struct WireRequest {
    pub op: &'static str,
    pub channel: ChannelKind,
    pub code: String,
}

impl WireRequest {
    pub fn subscribe(instrument: &InstrumentId, channel: ChannelKind) -> Self {
        Self {
            op: "subscribe",
            channel,
            code: instrument.as_str().to_string(),
        }
    }

    pub fn unsubscribe(instrument: &InstrumentId, channel: ChannelKind) -> Self {
        Self {
            op: "unsubscribe",
            channel,
            code: instrument.as_str().to_string(),
        }
    }
}

/// Inbound message envelope.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    Quote(WireQuote),
    Book(WireBook),
    Fill(WireFill),
    Pong,
}

/// Quote payload, shared by the REST quote endpoint and stream pushes.
#[derive(Debug, Deserialize)]
pub struct WireQuote {
    pub code: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub last: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub prev_close: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub high: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub low: Decimal,
    pub volume: u64,
    #[serde(with = "rust_decimal::serde::str")]
    pub bid: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub ask: Decimal,
}

impl WireQuote {
    pub fn into_snapshot(self) -> BrokerResult<QuoteSnapshot> {
        let instrument = InstrumentId::new(self.code)
            .map_err(|e| BrokerError::Protocol(e.to_string()))?;
        Ok(QuoteSnapshot {
            instrument,
            last_price: Price::new(self.last),
            prev_close: Price::new(self.prev_close),
            day_high: Price::new(self.high),
            day_low: Price::new(self.low),
            volume: self.volume,
            bid: Price::new(self.bid),
            ask: Price::new(self.ask),
            received_at: Utc::now(),
            stale: false,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct WireLevel {
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    pub qty: u64,
}

/// Order book payload.
#[derive(Debug, Deserialize)]
pub struct WireBook {
    pub code: String,
    pub bids: Vec<WireLevel>,
    pub asks: Vec<WireLevel>,
}

impl WireBook {
    pub fn into_order_book(self) -> BrokerResult<OrderBook> {
        let instrument = InstrumentId::new(self.code)
            .map_err(|e| BrokerError::Protocol(e.to_string()))?;
        let to_levels = |levels: Vec<WireLevel>| {
            levels
                .into_iter()
                .map(|l| BookLevel {
                    price: Price::new(l.price),
                    qty: Qty::new(l.qty),
                })
                .collect()
        };
        Ok(OrderBook {
            instrument,
            bids: to_levels(self.bids),
            asks: to_levels(self.asks),
            received_at: Utc::now(),
        })
    }
}

/// Execution notice payload.
#[derive(Debug, Deserialize)]
pub struct WireFill {
    pub order_id: String,
    pub code: String,
    pub side: OrderSide,
    pub qty: u64,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    pub filled_at: DateTime<Utc>,
}

impl WireFill {
    pub fn into_fill(self) -> BrokerResult<FillEvent> {
        let instrument = InstrumentId::new(self.code)
            .map_err(|e| BrokerError::Protocol(e.to_string()))?;
        Ok(FillEvent {
            order_id: OrderId::new(self.order_id),
            instrument,
            side: self.side,
            qty: Qty::new(self.qty),
            price: Price::new(self.price),
            filled_at: self.filled_at,
        })
    }
}

/// Parse one inbound frame.
pub fn parse_message(text: &str) -> BrokerResult<WireMessage> {
    serde_json::from_str(text).map_err(|e| BrokerError::Protocol(e.to_string()))
}
