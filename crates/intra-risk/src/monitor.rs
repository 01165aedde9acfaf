//! The exit monitor task.
//!
//! On a fixed cadence: mark every open position to the latest quote,
//! evaluate the exit ladder, and hand any firing position to the
//! executor over a channel. The executor keeps sole ownership of order
//! submission; this task never talks to the broker. The in-flight flag
//! on the tracker guarantees one exit order per position.

use crate::exits::{evaluate_exit, ExitReason};
use intra_feed::HybridFeed;
use intra_position::{Position, PositionTrackerHandle};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A position the risk ladder wants closed.
#[derive(Debug, Clone)]
pub struct ExitRequest {
    pub position: Position,
    pub reason: ExitReason,
}

/// Spawn the periodic exit monitor.
pub fn spawn_exit_monitor(
    feed: Arc<HybridFeed>,
    positions: PositionTrackerHandle,
    exit_tx: mpsc::Sender<ExitRequest>,
    interval: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_ms = interval.as_millis() as u64, "exit monitor started");

        loop {
            tokio::select! {
                () = token.cancelled() => {
                    info!("exit monitor shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    run_pass(&feed, &positions, &exit_tx).await;
                }
            }
        }
    })
}

/// One evaluation pass over all open positions. A failure on one
/// position is isolated: logged and skipped.
async fn run_pass(
    feed: &HybridFeed,
    positions: &PositionTrackerHandle,
    exit_tx: &mpsc::Sender<ExitRequest>,
) {
    for mut position in positions.snapshot() {
        if position.exiting {
            continue;
        }

        let quote = match feed.quote(&position.instrument).await {
            Ok(quote) => quote,
            Err(e) => {
                warn!(instrument = %position.instrument, ?e, "no quote for exit check");
                continue;
            }
        };

        // Mark the authoritative position, and evaluate against a
        // locally marked copy so this pass sees the new peak.
        positions
            .mark(position.instrument.clone(), quote.last_price)
            .await;
        position.last_price = quote.last_price;
        let profit = position.profit_pct();
        if profit > position.peak_profit_pct {
            position.peak_profit_pct = profit;
        }

        let Some(reason) = evaluate_exit(&position) else {
            continue;
        };

        // Claim the exit; a false claim means another pass got there first.
        if !positions.begin_exit(position.instrument.clone()).await {
            debug!(instrument = %position.instrument, "exit already in flight");
            continue;
        }

        info!(
            instrument = %position.instrument,
            reason = %reason,
            profit_pct = %profit,
            peak_pct = %position.peak_profit_pct,
            "exit condition fired"
        );

        if exit_tx.send(ExitRequest { position: position.clone(), reason }).await.is_err() {
            warn!("executor gone, releasing exit claim");
            positions.clear_exit(position.instrument.clone()).await;
            return;
        }
    }
}
