//! Telemetry: structured logging and daily statistics.

pub mod daily_stats;
pub mod error;
pub mod logging;

pub use daily_stats::{DailyStats, DailySummary};
pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
