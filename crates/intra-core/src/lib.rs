//! Core domain types for the intraday trading engine.
//!
//! This crate provides the fundamental types used throughout the system:
//! - `InstrumentId`: exchange-listed instrument identifier
//! - `Price`, `Qty`: precision-safe numeric types with KRX tick handling
//! - `QuoteSnapshot`, `OrderBook`: market data shapes
//! - `DataPriority`: refresh tier governing cache TTL and stream slots
//! - Order enums and identifiers shared by the execution path

pub mod decimal;
pub mod error;
pub mod instrument;
pub mod order;
pub mod protect;
pub mod types;

pub use decimal::{Price, Qty};
pub use error::{CoreError, Result};
pub use instrument::{ChannelKind, DataPriority, InstrumentId};
pub use protect::ProtectiveThresholds;
pub use order::{
    ClientOrderId, FillEvent, OrderAck, OrderId, OrderRequest, OrderSide, OrderState, OrderType,
    TimeoutAction,
};
pub use types::{AccountBalance, BookLevel, DailyBar, OrderBook, QuoteSnapshot};
