//! Risk management.
//!
//! Two halves: the pre-trade gate every candidate order must pass, and
//! the exit machinery protecting open positions. When in doubt, block:
//! a missed entry costs nothing, a missed exit costs money.

pub mod exits;
pub mod gates;
pub mod monitor;
pub mod thresholds;

pub use exits::{evaluate_exit, ExitReason};
pub use gates::{RejectReason, RiskConfig, TradeGate};
pub use monitor::{spawn_exit_monitor, ExitRequest};
pub use thresholds::ThresholdTable;
