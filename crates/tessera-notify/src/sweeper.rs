use std::time::Duration;

use chrono::Utc;
use tessera_core::NotifyConfig;
use tessera_database::queries::delivery;
use tessera_database::AsyncDatabase;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::NotifyResult;

/// Counts from one sweep pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub expired: usize,
    pub exhausted: usize,
    pub requeued: usize,
    pub archived: usize,
}

/// Periodic durability sweep over the notifications table.
///
/// The wake-up channel is best-effort, so this sweep is what guarantees
/// no row is lost: it expires overdue rows, fails exhausted ones,
/// re-queues anything due that the channel dropped, and archives
/// terminal rows past retention.
pub struct DeliverySweeper {
    db: AsyncDatabase,
    config: NotifyConfig,
    tx: mpsc::Sender<String>,
}

impl DeliverySweeper {
    pub(crate) fn new(db: AsyncDatabase, config: NotifyConfig, tx: mpsc::Sender<String>) -> Self {
        Self { db, config, tx }
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.sweep_interval_secs,
            "Delivery sweeper started"
        );

        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.config.sweep_interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        warn!(error = %e, "Delivery sweep failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Delivery sweeper stopping");
                        break;
                    }
                }
            }
        }
    }

    pub async fn sweep_once(&self) -> NotifyResult<SweepStats> {
        let now = Utc::now();
        let mut stats = SweepStats::default();

        stats.expired = self
            .db
            .call(move |conn| delivery::expire_overdue(conn, now))
            .await?;

        stats.exhausted = self.db.call(delivery::fail_exhausted).await?;

        let limit = self.config.queue_capacity;
        let due = self
            .db
            .call(move |conn| delivery::fetch_due(conn, now, limit))
            .await?;
        for notification in due {
            // Stop on a full channel; the next sweep retries.
            if self.tx.try_send(notification.id).is_err() {
                break;
            }
            stats.requeued += 1;
        }

        let cutoff = now - chrono::Duration::days(self.config.retention_days);
        stats.archived = self
            .db
            .call(move |conn| delivery::archive_terminal_before(conn, cutoff))
            .await?;

        if stats != SweepStats::default() {
            debug!(
                expired = stats.expired,
                exhausted = stats.exhausted,
                requeued = stats.requeued,
                archived = stats.archived,
                "Delivery sweep complete"
            );
        }
        Ok(stats)
    }
}
