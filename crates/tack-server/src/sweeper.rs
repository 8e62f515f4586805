//! Periodic background jobs: the due-reminder sweep and stale presence pruning.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tack_core::{RealtimeHub, ReminderSweep, Store, SweepReport};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::metrics;

/// Run one sweep, recording its outcome. `None` if the due cards could not
/// be listed.
pub async fn sweep_once(sweep: &ReminderSweep) -> Option<SweepReport> {
    match sweep.run(Utc::now()).await {
        Ok(report) => {
            metrics::record_sweep(&report);
            Some(report)
        }
        Err(e) => {
            warn!(error = %e, "Due reminder sweep failed");
            metrics::record_error("sweep");
            None
        }
    }
}

/// Sweep every `every`, starting immediately.
pub fn spawn_reminder_sweeper(
    store: Arc<dyn Store>,
    every: Duration,
    window: chrono::Duration,
) -> JoinHandle<()> {
    let sweep = ReminderSweep::with_window(store, window);
    info!(every_secs = every.as_secs(), window_hours = window.num_hours(), "Starting due reminder sweeper");
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            sweep_once(&sweep).await;
        }
    })
}

/// Every `every`, disconnect joined channels silent for longer than `timeout`.
pub fn spawn_presence_pruner(hub: Arc<RealtimeHub>, every: Duration, timeout: Duration) -> JoinHandle<()> {
    info!(every_ms = every.as_millis() as u64, timeout_ms = timeout.as_millis() as u64, "Starting presence pruner");
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.tick().await;
        loop {
            interval.tick().await;
            let pruned = hub.prune_stale(timeout);
            if !pruned.is_empty() {
                metrics::set_active_rooms(hub.stats().room_count);
            }
        }
    })
}
