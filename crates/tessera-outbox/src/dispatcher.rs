use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tessera_core::OutboxConfig;
use tessera_database::queries::outbox;
use tessera_database::AsyncDatabase;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::envelope::EventEnvelope;
use crate::error::{OutboxError, OutboxResult};
use crate::registry::PublisherRegistry;
use crate::toggle::PublishingToggle;

/// Polls the outbox table and hands unpublished rows to their publishers.
///
/// Rows are processed in creation order. A row whose publisher succeeds
/// is marked published immediately, so a crash mid-batch loses no
/// progress and replays at most the row in flight. A row with no
/// registered publisher is skipped and retried on every subsequent poll;
/// a publisher failure aborts the rest of the batch so later events for
/// the same object cannot overtake the failed one.
pub struct OutboxDispatcher {
    db: AsyncDatabase,
    registry: Arc<PublisherRegistry>,
    toggle: PublishingToggle,
    config: OutboxConfig,
}

impl OutboxDispatcher {
    pub fn new(
        db: AsyncDatabase,
        registry: Arc<PublisherRegistry>,
        toggle: PublishingToggle,
        config: OutboxConfig,
    ) -> Self {
        Self {
            db,
            registry,
            toggle,
            config,
        }
    }

    pub fn toggle(&self) -> PublishingToggle {
        self.toggle.clone()
    }

    /// Spawns the polling loop on the current runtime.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            batch_size = self.config.batch_size,
            poll_interval_secs = self.config.poll_interval_secs,
            "Outbox dispatcher started"
        );

        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.poll_interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        // Kept rows stay unpublished and are retried on
                        // the next tick.
                        warn!(error = %e, "Outbox dispatch batch aborted");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Outbox dispatcher stopping");
                        break;
                    }
                }
            }
        }
    }

    /// Runs one poll: fetches a batch and dispatches it, unless
    /// publishing is paused.
    pub async fn poll_once(&self) -> OutboxResult<usize> {
        if !self.toggle.is_enabled() {
            debug!("Publishing paused; skipping outbox poll");
            return Ok(0);
        }
        self.dispatch_batch().await
    }

    /// Dispatches one batch of unpublished rows in creation order.
    ///
    /// Returns the number of rows published. The first publisher error
    /// aborts the remainder of the batch.
    pub async fn dispatch_batch(&self) -> OutboxResult<usize> {
        let batch_size = self.config.batch_size;
        let batch = self
            .db
            .call(move |conn| outbox::fetch_unpublished(conn, batch_size))
            .await?;

        if batch.is_empty() {
            return Ok(0);
        }

        debug!(count = batch.len(), "Dispatching outbox batch");

        let mut published = 0;
        for message in batch {
            let publisher = match self.registry.resolve(&message.event_type, &message.source) {
                Ok(publisher) => publisher,
                Err(e @ OutboxError::NoPublisher { .. }) => {
                    warn!(
                        message_id = %message.id,
                        error = %e,
                        "Leaving event unpublished; retried next poll"
                    );
                    continue;
                }
                Err(e) => return Err(e),
            };

            let envelope = EventEnvelope::from_message(&message);
            if let Err(e) = publisher.publish(&envelope).await {
                error!(
                    message_id = %message.id,
                    event_type = %message.event_type,
                    error = %e,
                    "Publish failed; aborting remainder of batch"
                );
                return Err(e);
            }

            let id = message.id.clone();
            self.db
                .call(move |conn| outbox::mark_published(conn, &id))
                .await?;
            published += 1;

            debug!(
                message_id = %message.id,
                event_type = %message.event_type,
                "Outbox event published"
            );
        }

        Ok(published)
    }
}

/// Moves old published rows to the archive table and prunes expired
/// archive rows. Runs on its own, much slower, cadence than the
/// dispatcher.
pub struct OutboxArchiver {
    db: AsyncDatabase,
    config: OutboxConfig,
}

impl OutboxArchiver {
    pub fn new(db: AsyncDatabase, config: OutboxConfig) -> Self {
        Self { db, config }
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.config.archive_sweep_interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        warn!(error = %e, "Outbox archive sweep failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// Archives published rows older than the retention window and
    /// prunes archive rows that have aged out a second window.
    pub async fn sweep_once(&self) -> OutboxResult<(usize, usize)> {
        let retention = chrono::Duration::days(self.config.retention_days);
        let archive_cutoff = Utc::now() - retention;
        let prune_cutoff = archive_cutoff - retention;

        let (archived, pruned) = self
            .db
            .call(move |conn| {
                let tx = conn.unchecked_transaction()?;
                let archived = outbox::archive_published_before(&tx, archive_cutoff)?;
                let pruned = outbox::prune_archive_before(&tx, prune_cutoff)?;
                tx.commit()?;
                Ok((archived, pruned))
            })
            .await?;

        if archived > 0 || pruned > 0 {
            info!(archived, pruned, "Outbox archive sweep complete");
        }
        Ok((archived, pruned))
    }
}
