//! The hybrid feed: cache first, rate-limited poll as fallback, stream
//! pushes invalidating both.
//!
//! Transient remote failures degrade instead of propagating: after the
//! retry budget is spent the caller gets the last known snapshot marked
//! stale, and the incident is logged as recoverable.

use crate::cache::QuoteCache;
use crate::error::{FeedError, FeedResult};
use intra_broker::{DynBroker, RateLimiter, StreamEvent};
use intra_core::{DataPriority, FillEvent, InstrumentId, QuoteSnapshot};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Retry budget for polled fetches.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
        }
    }
}

impl RetryPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(8);
        Duration::from_millis(self.base_delay_ms.saturating_mul(1u64 << exp))
    }
}

/// Feed configuration.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Snapshots retained per instrument for strategy history.
    pub history_len: usize,
    pub retry: RetryPolicy,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            history_len: 120,
            retry: RetryPolicy::default(),
        }
    }
}

/// Unified per-instrument data access.
pub struct HybridFeed {
    broker: DynBroker,
    limiter: Arc<RateLimiter>,
    cache: QuoteCache,
    retry: RetryPolicy,
}

impl HybridFeed {
    pub fn new(broker: DynBroker, limiter: Arc<RateLimiter>, config: FeedConfig) -> Self {
        Self {
            broker,
            limiter,
            cache: QuoteCache::new(config.history_len),
            retry: config.retry,
        }
    }

    /// Start serving an instrument at a tier. Idempotent.
    pub fn track(&self, instrument: InstrumentId, priority: DataPriority) {
        self.cache.track(instrument, priority);
    }

    pub fn untrack(&self, instrument: &InstrumentId) {
        self.cache.untrack(instrument);
    }

    /// Raise or lower an instrument's refresh tier. Idempotent and safe
    /// against concurrent `quote()` calls.
    pub fn set_priority(&self, instrument: &InstrumentId, priority: DataPriority) {
        self.cache.set_priority(instrument, priority);
    }

    /// Promote an instrument, never demoting: a no-op when it already
    /// sits at an equal or more urgent tier.
    pub fn upgrade_priority(&self, instrument: &InstrumentId, priority: DataPriority) {
        if let Some(current) = self.cache.priority(instrument) {
            if priority < current {
                self.cache.set_priority(instrument, priority);
            }
        }
    }

    /// Demote an instrument, never promoting.
    pub fn downgrade_priority(&self, instrument: &InstrumentId, priority: DataPriority) {
        if let Some(current) = self.cache.priority(instrument) {
            if priority > current {
                self.cache.set_priority(instrument, priority);
            }
        }
    }

    pub fn priority(&self, instrument: &InstrumentId) -> Option<DataPriority> {
        self.cache.priority(instrument)
    }

    pub fn tracked(&self) -> Vec<InstrumentId> {
        self.cache.tracked()
    }

    /// Recent snapshots for strategy evaluation, oldest first.
    pub fn history(&self, instrument: &InstrumentId) -> Vec<QuoteSnapshot> {
        self.cache.history(instrument)
    }

    /// Latest snapshot for an instrument.
    ///
    /// Served from cache when fresher than the tier cadence; otherwise a
    /// rate-limited remote fetch with bounded backoff. Exhausted retries
    /// fall back to the last known snapshot flagged stale. Only an
    /// instrument with no data at all produces an error.
    pub async fn quote(&self, instrument: &InstrumentId) -> FeedResult<QuoteSnapshot> {
        if !self.cache.is_tracked(instrument) {
            return Err(FeedError::NotTracked(instrument.clone()));
        }
        if let Some(snapshot) = self.cache.fresh(instrument) {
            return Ok(snapshot);
        }
        self.fetch_with_retry(instrument).await
    }

    async fn fetch_with_retry(&self, instrument: &InstrumentId) -> FeedResult<QuoteSnapshot> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.limiter.acquire().await;

            match self.broker.get_quote(instrument).await {
                Ok(snapshot) => {
                    self.cache.store(snapshot.clone());
                    return Ok(snapshot);
                }
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    debug!(%instrument, attempt, ?e, "quote fetch failed, retrying");
                    tokio::time::sleep(self.retry.delay(attempt)).await;
                }
                Err(e) => {
                    // Degrade to the last known value rather than failing
                    // the caller's whole scan cycle.
                    if let Some(mut last) = self.cache.last_known(instrument) {
                        warn!(%instrument, attempt, ?e, "serving stale snapshot");
                        last.stale = true;
                        return Ok(last);
                    }
                    warn!(%instrument, attempt, ?e, "no snapshot available");
                    return Err(FeedError::NoData(instrument.clone()));
                }
            }
        }
    }

    /// Apply one stream event. Pushes refresh the cache immediately,
    /// bypassing any TTL.
    pub fn apply_event(&self, event: &StreamEvent) {
        match event {
            StreamEvent::Quote(snapshot) => self.cache.apply_push(snapshot.clone()),
            StreamEvent::Book(book) => {
                // Depth pushes only refine the touch prices of the last
                // snapshot; a full snapshot still comes from ticks/polls.
                if let Some(mut last) = self.cache.last_known(&book.instrument) {
                    if let (Some(bid), Some(ask)) = (book.best_bid(), book.best_ask()) {
                        last.bid = bid.price;
                        last.ask = ask.price;
                        last.received_at = book.received_at;
                        self.cache.apply_push(last);
                    }
                }
            }
            StreamEvent::Fill(_) => {}
            StreamEvent::Connected => info!("stream connected, cache warm-up from pushes"),
            StreamEvent::Disconnected => warn!("stream disconnected, serving from polls"),
        }
    }
}

/// Spawn the ingest task: market events into the feed, execution notices
/// to the order path.
pub fn spawn_ingest(
    feed: Arc<HybridFeed>,
    mut events: mpsc::Receiver<StreamEvent>,
    fill_tx: mpsc::Sender<FillEvent>,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = token.cancelled() => {
                    info!("feed ingest shutting down");
                    return;
                }
                event = events.recv() => {
                    let Some(event) = event else { return };
                    if let StreamEvent::Fill(fill) = &event {
                        if fill_tx.send(fill.clone()).await.is_err() {
                            warn!("fill receiver dropped");
                        }
                    }
                    feed.apply_event(&event);
                }
            }
        }
    })
}
