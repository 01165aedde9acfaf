//! The broker client seam.
//!
//! Components never hold a concrete transport; they get an
//! `Arc<dyn BrokerClient>` at construction, which keeps every piece
//! testable against `MockBrokerClient`.

use crate::error::BrokerResult;
use async_trait::async_trait;
use intra_core::{
    AccountBalance, DailyBar, InstrumentId, OrderAck, OrderBook, OrderId, OrderRequest,
    QuoteSnapshot,
};
use std::sync::Arc;

/// Remote broker interface.
///
/// All methods are subject to the external request quotas; callers go
/// through [`crate::RateLimiter::acquire`] before invoking them.
#[cfg_attr(any(test, feature = "test-util"), mockall::automock)]
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Fetch the current quote snapshot for one instrument.
    async fn get_quote(&self, instrument: &InstrumentId) -> BrokerResult<QuoteSnapshot>;

    /// Fetch recent daily candles (most recent last).
    async fn get_daily_history(
        &self,
        instrument: &InstrumentId,
        days: u32,
    ) -> BrokerResult<Vec<DailyBar>>;

    /// Fetch quote depth for one instrument.
    async fn get_order_book(&self, instrument: &InstrumentId) -> BrokerResult<OrderBook>;

    /// Fetch account cash and valuation.
    async fn get_balance(&self) -> BrokerResult<AccountBalance>;

    /// Submit an order. The returned id is the broker's, not the cloid.
    async fn submit_order(&self, request: &OrderRequest) -> BrokerResult<OrderAck>;

    /// Cancel a live order.
    async fn cancel_order(&self, order_id: &OrderId) -> BrokerResult<()>;
}

/// Shared handle to a broker client.
pub type DynBroker = Arc<dyn BrokerClient>;
