//! Error types for intra-broker.

use thiserror::Error;

/// Broker access errors.
///
/// Transient transport failures are retried by callers (the feed, the
/// order monitor); rejections and protocol errors are not.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Rejected by broker: {0}")]
    Rejected(String),

    #[error("Malformed payload: {0}")]
    Protocol(String),

    #[error("HTTP client setup failed: {0}")]
    HttpClient(String),

    #[error("Stream closed")]
    StreamClosed,
}

impl BrokerError {
    /// Whether a retry with backoff is worthwhile.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout | Self::StreamClosed)
    }
}

/// Result type alias for broker operations.
pub type BrokerResult<T> = std::result::Result<T, BrokerError>;
