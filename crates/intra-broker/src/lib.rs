//! Broker access layer.
//!
//! Everything that talks to the outside world lives here: the
//! `BrokerClient` trait (REST-style queries and order submission), the
//! websocket stream connector that pushes live events into the feed, and
//! the rate limiter every remote call must pass through.

pub mod client;
pub mod error;
pub mod message;
pub mod rate_limit;
pub mod rest;
pub mod stream;

pub use client::{BrokerClient, DynBroker};
pub use error::{BrokerError, BrokerResult};
pub use rate_limit::{RateLimiter, RateLimits, RateSnapshot};
pub use rest::{RestBroker, RestConfig};
pub use stream::{spawn_stream, StreamCommand, StreamConfig, StreamEvent, StreamHandle};

#[cfg(any(test, feature = "test-util"))]
pub use client::MockBrokerClient;
