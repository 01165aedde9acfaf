//! The scheduler task.
//!
//! Publishes the active profile on a watch channel and pings the
//! rebalance notifier on every transition. Sleeps until the next window
//! boundary instead of polling.

use crate::profile::{ActiveProfile, ProfileTable};
use chrono::{FixedOffset, NaiveTime, Utc};
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

const KST_OFFSET_SECS: i32 = 9 * 3600;

/// Current wall-clock time in exchange-local KST.
pub fn kst_now() -> NaiveTime {
    let offset = FixedOffset::east_opt(KST_OFFSET_SECS).expect("fixed offset is valid");
    Utc::now().with_timezone(&offset).time()
}

/// Read side of the scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    profile_rx: watch::Receiver<ActiveProfile>,
    rebalance: Arc<Notify>,
}

impl SchedulerHandle {
    pub fn active(&self) -> ActiveProfile {
        self.profile_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ActiveProfile> {
        self.profile_rx.clone()
    }

    /// Notified on every profile transition; the app listens here to
    /// trigger an allocator rebalance.
    pub fn rebalance_notify(&self) -> Arc<Notify> {
        self.rebalance.clone()
    }
}

/// Spawn the scheduler task.
///
/// The initial profile is resolved immediately (a process started
/// mid-window lands in the correct state without traversing earlier
/// windows), then transitions fire at boundary timestamps.
pub fn spawn_scheduler(
    table: ProfileTable,
    token: CancellationToken,
) -> (SchedulerHandle, JoinHandle<()>) {
    let initial = table.resolve(kst_now());
    info!(profile = initial.name(), "scheduler starting");

    let (profile_tx, profile_rx) = watch::channel(initial);
    let rebalance = Arc::new(Notify::new());
    let handle = SchedulerHandle {
        profile_rx,
        rebalance: rebalance.clone(),
    };

    let join = tokio::spawn(async move {
        loop {
            let now = kst_now();
            let resolved = table.resolve(now);

            let changed = {
                let current = profile_tx.borrow();
                *current != resolved
            };
            if changed {
                info!(
                    from = profile_tx.borrow().name(),
                    to = resolved.name(),
                    "profile transition"
                );
                let _ = profile_tx.send(resolved);
                rebalance.notify_one();
            }

            let wait = table.until_next_boundary(now);
            tokio::select! {
                () = tokio::time::sleep(wait) => {}
                () = token.cancelled() => {
                    info!("scheduler shutting down");
                    return;
                }
            }
        }
    });

    (handle, join)
}
