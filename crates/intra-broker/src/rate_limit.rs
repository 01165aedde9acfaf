//! Rate limiting for remote calls.
//!
//! The broker enforces hard per-second and per-minute request ceilings.
//! `acquire()` never fails: it blocks the caller until a call can be made
//! without breaching either window, and releases blocked callers in
//! arrival order.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Instant;
use tracing::{trace, warn};

/// Request ceilings for the remote API.
#[derive(Debug, Clone, Copy)]
pub struct RateLimits {
    /// Maximum calls in any rolling 1-second window.
    pub per_second: u32,
    /// Maximum calls in any rolling 60-second window.
    pub per_minute: u32,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            per_second: 20,
            per_minute: 1000,
        }
    }
}

/// Read-only view of limiter state for monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct RateSnapshot {
    pub in_last_second: u32,
    pub in_last_minute: u32,
    pub per_second_limit: u32,
    pub per_minute_limit: u32,
    /// Calls granted since startup.
    pub total_granted: u64,
    /// Calls that had to wait before being granted.
    pub total_delayed: u64,
}

struct Windows {
    second: VecDeque<Instant>,
    minute: VecDeque<Instant>,
    granted: u64,
    delayed: u64,
}

impl Windows {
    fn prune(&mut self, now: Instant) {
        let sec_cutoff = now - Duration::from_secs(1);
        while self.second.front().is_some_and(|&t| t <= sec_cutoff) {
            self.second.pop_front();
        }
        let min_cutoff = now - Duration::from_secs(60);
        while self.minute.front().is_some_and(|&t| t <= min_cutoff) {
            self.minute.pop_front();
        }
    }

    /// Delay until a grant becomes legal, or zero if it is legal now.
    fn required_wait(&mut self, limits: RateLimits, now: Instant) -> Duration {
        self.prune(now);

        let mut wait = Duration::ZERO;
        if self.second.len() >= limits.per_second as usize {
            if let Some(&oldest) = self.second.front() {
                wait = wait.max(oldest + Duration::from_secs(1) - now);
            }
        }
        if self.minute.len() >= limits.per_minute as usize {
            if let Some(&oldest) = self.minute.front() {
                wait = wait.max(oldest + Duration::from_secs(60) - now);
            }
        }
        wait
    }

    fn record(&mut self, now: Instant) {
        self.second.push_back(now);
        self.minute.push_back(now);
        self.granted += 1;
    }
}

/// Sliding-window rate limiter shared by all remote callers.
///
/// The async admission gate serialises waiters in FIFO order (tokio
/// mutexes wake waiters in arrival order), so a burst of workers cannot
/// starve the executor. Window state sits behind a sync mutex so
/// `snapshot()` stays non-async.
pub struct RateLimiter {
    limits: RateLimits,
    gate: AsyncMutex<()>,
    windows: Mutex<Windows>,
}

impl RateLimiter {
    pub fn new(limits: RateLimits) -> Self {
        Self {
            limits,
            gate: AsyncMutex::new(()),
            windows: Mutex::new(Windows {
                second: VecDeque::with_capacity(limits.per_second as usize),
                minute: VecDeque::with_capacity(limits.per_minute as usize),
                granted: 0,
                delayed: 0,
            }),
        }
    }

    /// Block until a remote call may legally be made, then record it.
    ///
    /// Never fails and never skips the queue: the caller holds the gate
    /// while waiting, so later arrivals wait behind it.
    pub async fn acquire(&self) {
        let _admission = self.gate.lock().await;
        let mut waited = false;

        loop {
            let wait = {
                let mut windows = self.windows.lock();
                let now = Instant::now();
                let wait = windows.required_wait(self.limits, now);
                if wait.is_zero() {
                    windows.record(now);
                    if waited {
                        windows.delayed += 1;
                    }
                    Duration::ZERO
                } else {
                    wait
                }
            };

            if wait.is_zero() {
                return;
            }

            if !waited {
                trace!(wait_ms = wait.as_millis() as u64, "rate limit reached, queuing");
                waited = true;
            }
            if wait > Duration::from_secs(5) {
                warn!(wait_ms = wait.as_millis() as u64, "long rate-limit stall");
            }
            tokio::time::sleep(wait).await;
        }
    }

    /// Current load and lifetime counters.
    pub fn snapshot(&self) -> RateSnapshot {
        let mut windows = self.windows.lock();
        windows.prune(Instant::now());
        RateSnapshot {
            in_last_second: windows.second.len() as u32,
            in_last_minute: windows.minute.len() as u32,
            per_second_limit: self.limits.per_second,
            per_minute_limit: self.limits.per_minute,
            total_granted: windows.granted,
            total_delayed: windows.delayed,
        }
    }

    pub fn limits(&self) -> RateLimits {
        self.limits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_grants_under_limit_are_immediate() {
        let limiter = RateLimiter::new(RateLimits {
            per_second: 5,
            per_minute: 100,
        });

        for _ in 0..5 {
            limiter.acquire().await;
        }

        let snap = limiter.snapshot();
        assert_eq!(snap.total_granted, 5);
        assert_eq!(snap.total_delayed, 0);
        assert_eq!(snap.in_last_second, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sixth_call_waits_for_window() {
        let limiter = RateLimiter::new(RateLimits {
            per_second: 5,
            per_minute: 100,
        });

        let start = tokio::time::Instant::now();
        for _ in 0..6 {
            limiter.acquire().await;
        }

        // The sixth grant must fall outside the first 1s window.
        assert!(start.elapsed() >= Duration::from_secs(1));
        let snap = limiter.snapshot();
        assert_eq!(snap.total_granted, 6);
        assert_eq!(snap.total_delayed, 1);
        assert!(snap.in_last_second <= 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_second_ceiling_never_breached() {
        let limiter = RateLimiter::new(RateLimits {
            per_second: 3,
            per_minute: 100,
        });

        for _ in 0..10 {
            limiter.acquire().await;
            assert!(limiter.snapshot().in_last_second <= 3);
        }
        assert_eq!(limiter.snapshot().total_granted, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_minute_window_applies() {
        let limiter = RateLimiter::new(RateLimits {
            per_second: 10,
            per_minute: 10,
        });

        let start = tokio::time::Instant::now();
        for _ in 0..11 {
            limiter.acquire().await;
        }

        // Eleventh call had to wait for the 60s window to roll.
        assert!(start.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_all_complete() {
        use std::sync::Arc;

        let limiter = Arc::new(RateLimiter::new(RateLimits {
            per_second: 4,
            per_minute: 100,
        }));

        let mut handles = Vec::new();
        for _ in 0..12 {
            let l = limiter.clone();
            handles.push(tokio::spawn(async move { l.acquire().await }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(limiter.snapshot().total_granted, 12);
    }
}
