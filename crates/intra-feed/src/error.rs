//! Error types for intra-feed.

use intra_broker::BrokerError;
use intra_core::InstrumentId;
use thiserror::Error;

/// Feed errors.
///
/// Transient remote failures never surface here; the feed degrades to
/// the last known snapshot instead. `NoData` means an instrument has
/// never produced a quote at all.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("No data ever received for {0}")]
    NoData(InstrumentId),

    #[error("Instrument not tracked: {0}")]
    NotTracked(InstrumentId),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// Result type alias for feed operations.
pub type FeedResult<T> = std::result::Result<T, FeedError>;
