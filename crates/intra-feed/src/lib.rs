//! Hybrid market-data feed.
//!
//! One access path for every consumer: cached stream pushes when an
//! instrument holds a live slot, rate-limited polling otherwise. The
//! slot allocator decides who gets the fixed pool of live subscriptions.

pub mod allocator;
pub mod cache;
pub mod error;
pub mod feed;

pub use allocator::{
    AllocatorConfig, RebalanceOutcome, SlotAllocator, SlotDecision, SlotView,
};
pub use cache::QuoteCache;
pub use error::{FeedError, FeedResult};
pub use feed::{spawn_ingest, FeedConfig, HybridFeed, RetryPolicy};
