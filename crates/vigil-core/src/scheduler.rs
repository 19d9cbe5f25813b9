//! Pass scheduling.
//!
//! One task owns pass execution, so passes are serialized by
//! construction: a trigger arriving mid-pass is queued in a capacity-1
//! channel, and further triggers coalesce into that queued slot. The
//! periodic tick and on-demand triggers share the same loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::reconcile::Monitor;

/// Requests an immediate pass. Cheap to clone; safe from any task.
#[derive(Clone)]
pub struct TriggerHandle {
    tx: mpsc::Sender<()>,
}

impl TriggerHandle {
    /// Queue a pass. Returns `false` when a trigger was already queued
    /// (the request coalesces into it).
    pub fn trigger(&self) -> bool {
        self.tx.try_send(()).is_ok()
    }
}

/// Owns the scheduler task; dropping it detaches the task, `shutdown`
/// stops it between passes.
pub struct SchedulerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop the scheduler. A pass in flight runs to completion first;
    /// passes are never abandoned mid-device.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            error!(error = %e, "scheduler task failed during shutdown");
        }
    }
}

/// Spawn the scheduler loop.
///
/// `interval` enables periodic passes; `None` means on-demand only. The
/// returned [`TriggerHandle`] feeds the same serialized queue the timer
/// uses.
pub fn start_scheduler(
    monitor: Arc<Monitor>,
    interval: Option<Duration>,
) -> (TriggerHandle, SchedulerHandle) {
    let (tx, mut rx) = mpsc::channel::<()>(1);
    let cancel = CancellationToken::new();
    let loop_cancel = cancel.clone();
    // Keep the channel open even if every external handle is dropped;
    // the periodic tick must outlive on-demand triggering.
    let keepalive = tx.clone();

    let task = tokio::spawn(async move {
        let _keepalive = keepalive;
        let mut ticker = interval.map(|period| {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; consume it so startup
            // ordering stays with the caller.
            ticker.reset();
            ticker
        });

        loop {
            let due = tokio::select! {
                () = loop_cancel.cancelled() => break,
                received = rx.recv() => received.is_some(),
                _ = tick(&mut ticker) => true,
            };
            if !due {
                break;
            }

            info!("pass triggered");
            if let Err(e) = monitor.run_pass().await {
                error!(error = %e, "reconciliation pass failed");
            }
        }
        info!("scheduler stopped");
    });

    (
        TriggerHandle { tx },
        SchedulerHandle { cancel, task },
    )
}

/// Await the next periodic tick, or forever when no interval is set.
async fn tick(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::MonitorConfig;

    fn throwaway_monitor(dir: &std::path::Path) -> Arc<Monitor> {
        Arc::new(Monitor::new(MonitorConfig {
            inventory_path: dir.join("devices.yml"),
            poller_dir: dir.join("telegraf"),
            dashboard_dir: dir.join("dashboards"),
            secrets_path: dir.join("auth_tokens.env"),
            token_store_path: dir.join("token_store.json"),
        }))
    }

    #[tokio::test]
    async fn triggers_coalesce_while_queued() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("devices.yml"), "devices: []").expect("inventory");
        let (trigger, scheduler) = start_scheduler(throwaway_monitor(dir.path()), None);

        // The first trigger occupies the queue slot; duplicates coalesce
        // until the loop drains it.
        assert!(trigger.trigger());
        let _ = trigger.trigger();

        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_stops_the_loop() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("devices.yml"), "devices: []").expect("inventory");
        let (_trigger, scheduler) = start_scheduler(throwaway_monitor(dir.path()), None);

        scheduler.shutdown().await;
    }
}
