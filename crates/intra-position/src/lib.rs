//! Position tracking.
//!
//! A single actor task owns all position mutation: the executor opens
//! and closes positions on confirmed fills, the risk monitor marks
//! prices and flags exits in flight. Everyone else reads through the
//! handle's synchronous cache.

pub mod tracker;

pub use tracker::{
    spawn_position_tracker, ClosedPosition, Position, PositionTrackerHandle,
};
