//! Pending-order lifecycle management.
//!
//! An order that does not fill must not sit forever: it is nudged
//! toward the market a bounded number of times, then converted to a
//! market order outright. All timers are driven by an independent
//! periodic task so a stuck order never stalls the signal pipeline.

pub mod monitor;

pub use monitor::{
    OrderMonitorConfig, OrderOutcome, OrderPurpose, PendingOrderMonitor, TrackedOrder,
};
