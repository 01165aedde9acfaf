//! Error types for the application crate.

use thiserror::Error;

/// Application-level errors. Configuration problems are fatal: nothing
/// is allowed to partially run on a broken config.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Broker(#[from] intra_broker::BrokerError),

    #[error(transparent)]
    Telemetry(#[from] intra_telemetry::TelemetryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for application operations.
pub type AppResult<T> = std::result::Result<T, AppError>;
