use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tessera_database::QueuedNotification;
use tracing::debug;

use crate::error::{NotifyError, NotifyResult};

/// Delivers one notification to its recipient.
///
/// Implementations should fail fast with a descriptive error; the
/// pipeline owns retries, timeouts, and the circuit breaker.
#[async_trait]
pub trait NotificationTransport: Send + Sync {
    async fn send(&self, notification: &QueuedNotification) -> NotifyResult<()>;
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    subject: &'a str,
    body: &'a str,
}

/// Webhook transport: POSTs the notification as JSON to the recipient
/// URL and treats any non-2xx status as a failure.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");
        Self { client }
    }
}

#[async_trait]
impl NotificationTransport for HttpTransport {
    async fn send(&self, notification: &QueuedNotification) -> NotifyResult<()> {
        let payload = WebhookPayload {
            subject: &notification.subject,
            body: &notification.body,
        };

        let response = self
            .client
            .post(&notification.recipient)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Transport(format!(
                "Webhook returned status {status}"
            )));
        }

        debug!(
            notification_id = %notification.id,
            status = %status,
            "Webhook delivered"
        );
        Ok(())
    }
}
