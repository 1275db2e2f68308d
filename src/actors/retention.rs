//! Periodic retention cleanup of old snapshots

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, instrument, trace};

use crate::storage::SnapshotStore;

/// Cleanup runs once on startup, then every `every`
pub struct RetentionActor {
    store: Arc<dyn SnapshotStore>,
    retention: chrono::Duration,
    every: Duration,
    shutdown_rx: watch::Receiver<bool>,
}

impl RetentionActor {
    #[instrument(skip(self), fields(retention_days = self.retention.num_days()))]
    pub async fn run(mut self) {
        debug!("starting retention actor");

        let mut cleanup_interval = time::interval(self.every);
        cleanup_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cleanup_interval.tick() => {
                    self.run_cleanup().await;
                }

                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        debug!("retention actor stopped");
    }

    /// Delete snapshots older than the retention period, returning the count.
    pub async fn run_cleanup(&self) -> usize {
        let cutoff = Utc::now() - self.retention;
        debug!("running retention cleanup (deleting data before {cutoff})");

        match self.store.cleanup_before(cutoff).await {
            Ok(0) => {
                trace!("retention cleanup: no old snapshots to delete");
                0
            }
            Ok(deleted) => {
                info!("retention cleanup complete: deleted {deleted} old snapshots");
                deleted
            }
            Err(e) => {
                // retried on the next interval
                error!("failed to clean up old snapshots: {e}");
                0
            }
        }
    }
}

pub struct RetentionHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RetentionHandle {
    pub fn spawn(store: Arc<dyn SnapshotStore>, retention_days: u32, every: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let actor = RetentionActor {
            store,
            retention: chrono::Duration::days(i64::from(retention_days)),
            every,
            shutdown_rx,
        };

        Self {
            shutdown_tx,
            task: tokio::spawn(actor.run()),
        }
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            error!("retention actor panicked: {e}");
        }
    }
}
