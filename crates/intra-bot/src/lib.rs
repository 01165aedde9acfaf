//! Application assembly for the intraday trading engine.

pub mod app;
pub mod config;
pub mod control;
pub mod error;

pub use app::App;
pub use config::Settings;
pub use control::{ControlHandle, PositionView, SystemStatus};
pub use error::{AppError, AppResult};
