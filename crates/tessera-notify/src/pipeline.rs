use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tessera_core::NotifyConfig;
use tessera_database::queries::delivery;
use tessera_database::{AsyncDatabase, DeliveryStatus, NewQueuedNotification, QueuedNotification};
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backoff::compute_backoff;
use crate::breaker::CircuitBreaker;
use crate::error::{NotifyError, NotifyResult};
use crate::sweeper::DeliverySweeper;
use crate::transport::NotificationTransport;

/// What happened to one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Transport accepted the notification; row marked sent.
    Sent,
    /// Attempt failed; retry scheduled with backoff.
    Retrying,
    /// Attempts exhausted; row marked failed.
    Failed,
    /// Expiry deadline passed; row marked failed without an attempt.
    Expired,
    /// Circuit breaker open; deferred without consuming an attempt.
    Rejected,
    /// Row missing or already claimed elsewhere.
    Skipped,
}

/// Durable delivery pipeline.
///
/// Every notification is written to the database before anything else;
/// the in-memory channel is only a wake-up signal for the worker pool.
/// A full channel is therefore harmless: the row is already durable and
/// the periodic sweep re-queues anything the channel dropped.
pub struct DeliveryPipeline {
    db: AsyncDatabase,
    transport: Arc<dyn NotificationTransport>,
    breaker: Arc<CircuitBreaker>,
    config: NotifyConfig,
    tx: mpsc::Sender<String>,
    rx: Mutex<Option<mpsc::Receiver<String>>>,
}

impl DeliveryPipeline {
    pub fn new(
        db: AsyncDatabase,
        transport: Arc<dyn NotificationTransport>,
        config: NotifyConfig,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let breaker = Arc::new(CircuitBreaker::new(
            config.breaker_failure_threshold,
            Duration::from_secs(config.breaker_open_secs),
        ));
        Self {
            db,
            transport,
            breaker,
            config,
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    pub fn breaker(&self) -> Arc<CircuitBreaker> {
        Arc::clone(&self.breaker)
    }

    /// Builds the periodic sweeper backed by the same queue, so rows it
    /// finds due wake the same worker pool.
    pub fn sweeper(&self) -> DeliverySweeper {
        DeliverySweeper::new(self.db.clone(), self.config.clone(), self.tx.clone())
    }

    /// Returns rows stuck in `sending` to `pending`. Run once at
    /// startup before workers begin; an interrupted attempt may already
    /// have reached the recipient, which is why delivery is
    /// at-least-once.
    pub async fn recover_interrupted(&self) -> NotifyResult<usize> {
        let reset = self.db.call(delivery::reset_sending_to_pending).await?;
        if reset > 0 {
            info!(count = reset, "Recovered interrupted deliveries");
        }
        Ok(reset)
    }

    /// Persists the notification, then signals a worker. The row is the
    /// system of record; losing the signal only delays delivery until
    /// the next sweep.
    pub async fn enqueue(
        &self,
        notification: NewQueuedNotification,
    ) -> NotifyResult<QueuedNotification> {
        let stored = self
            .db
            .call(move |conn| delivery::enqueue(conn, &notification))
            .await?;

        if self.tx.try_send(stored.id.clone()).is_err() {
            debug!(
                notification_id = %stored.id,
                "Delivery queue full; row will be picked up by the sweep"
            );
        }

        debug!(
            notification_id = %stored.id,
            recipient = %stored.recipient,
            "Notification enqueued"
        );
        Ok(stored)
    }

    /// Spawns the worker pool. May be called once; the queue receiver
    /// moves into the workers.
    pub fn start(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let rx = match self.rx.lock().unwrap().take() {
            Some(rx) => rx,
            None => {
                warn!("Delivery workers already started");
                return Vec::new();
            }
        };

        info!(
            workers = self.config.worker_count,
            queue_capacity = self.config.queue_capacity,
            "Starting delivery workers"
        );

        let rx = Arc::new(AsyncMutex::new(rx));
        (0..self.config.worker_count)
            .map(|worker| {
                let pipeline = Arc::clone(self);
                let rx = Arc::clone(&rx);
                let mut shutdown = shutdown.clone();
                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            maybe_id = recv_next(&rx) => {
                                let Some(id) = maybe_id else {
                                    break;
                                };
                                if let Err(e) = pipeline.deliver(&id).await {
                                    warn!(worker, notification_id = %id, error = %e, "Delivery attempt errored");
                                }
                            }
                            _ = shutdown.changed() => {
                                if *shutdown.borrow() {
                                    debug!(worker, "Delivery worker stopping");
                                    break;
                                }
                            }
                        }
                    }
                })
            })
            .collect()
    }

    /// Runs one delivery attempt for the given notification.
    ///
    /// Claims the row (`pending` -> `sending`) before touching the
    /// transport, so concurrent workers given the same id race on the
    /// claim rather than double-sending.
    pub async fn deliver(&self, id: &str) -> NotifyResult<DeliveryOutcome> {
        let lookup_id = id.to_string();
        let Some(notification) = self
            .db
            .call(move |conn| delivery::get(conn, &lookup_id))
            .await?
        else {
            return Ok(DeliveryOutcome::Skipped);
        };

        if notification.status != DeliveryStatus::Pending {
            return Ok(DeliveryOutcome::Skipped);
        }

        let now = Utc::now();
        if let Some(expires_at) = notification.expires_at {
            if expires_at <= now {
                let fail_id = notification.id.clone();
                let attempts = notification.attempt_count;
                self.db
                    .call(move |conn| delivery::mark_failed(conn, &fail_id, attempts, "expired"))
                    .await?;
                info!(notification_id = %notification.id, "Notification expired before delivery");
                return Ok(DeliveryOutcome::Expired);
            }
        }

        if !self.breaker.allow() {
            // Defer past the open window without consuming an attempt.
            let retry_id = notification.id.clone();
            let attempts = notification.attempt_count;
            let next = now + chrono::Duration::seconds(self.config.breaker_open_secs as i64);
            let reason = NotifyError::CircuitOpen.to_string();
            self.db
                .call(move |conn| delivery::mark_retry(conn, &retry_id, attempts, next, &reason))
                .await?;
            debug!(notification_id = %notification.id, "Delivery rejected; circuit open");
            return Ok(DeliveryOutcome::Rejected);
        }

        // The claim only succeeds for a pending row whose backoff window
        // has elapsed, so a duplicate wake-up (enqueue signal plus sweep
        // re-queue) cannot trigger an early retry.
        let claim_id = notification.id.clone();
        let claimed = self
            .db
            .call(move |conn| delivery::mark_sending(conn, &claim_id, now))
            .await?;
        if !claimed {
            return Ok(DeliveryOutcome::Skipped);
        }

        // Re-read after the claim; the pre-claim snapshot may be stale if
        // another worker touched the row in between.
        let claimed_id = notification.id.clone();
        let Some(notification) = self
            .db
            .call(move |conn| delivery::get(conn, &claimed_id))
            .await?
        else {
            return Ok(DeliveryOutcome::Skipped);
        };

        let attempts = notification.attempt_count + 1;
        let timeout = Duration::from_secs(self.config.send_timeout_secs);
        let result = match tokio::time::timeout(timeout, self.transport.send(&notification)).await {
            Ok(result) => result,
            Err(_) => Err(NotifyError::Timeout(self.config.send_timeout_secs)),
        };

        match result {
            Ok(()) => {
                self.breaker.record_success();
                let sent_id = notification.id.clone();
                self.db
                    .call(move |conn| delivery::mark_sent(conn, &sent_id, attempts))
                    .await?;
                info!(
                    notification_id = %notification.id,
                    attempt = attempts,
                    "Notification delivered"
                );
                Ok(DeliveryOutcome::Sent)
            }
            Err(e) => {
                self.breaker.record_failure();
                let error = e.to_string();
                let row_id = notification.id.clone();

                let expired = notification
                    .expires_at
                    .map(|exp| exp <= Utc::now())
                    .unwrap_or(false);

                if attempts >= notification.max_attempts || expired {
                    self.db
                        .call(move |conn| delivery::mark_failed(conn, &row_id, attempts, &error))
                        .await?;
                    warn!(
                        notification_id = %notification.id,
                        attempts,
                        error = %e,
                        "Notification failed permanently"
                    );
                    Ok(DeliveryOutcome::Failed)
                } else {
                    let delay = compute_backoff(
                        attempts,
                        self.config.backoff_base_ms,
                        self.config.backoff_max_ms,
                    );
                    let next = Utc::now()
                        + chrono::Duration::from_std(delay)
                            .unwrap_or_else(|_| chrono::Duration::seconds(60));
                    self.db
                        .call(move |conn| {
                            delivery::mark_retry(conn, &row_id, attempts, next, &error)
                        })
                        .await?;
                    warn!(
                        notification_id = %notification.id,
                        attempt = attempts,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "Delivery attempt failed; retry scheduled"
                    );
                    Ok(DeliveryOutcome::Retrying)
                }
            }
        }
    }
}

async fn recv_next(rx: &Arc<AsyncMutex<mpsc::Receiver<String>>>) -> Option<String> {
    rx.lock().await.recv().await
}
