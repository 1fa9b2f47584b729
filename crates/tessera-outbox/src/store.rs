use rusqlite::Connection;
use tessera_database::queries::outbox;
use tessera_database::{AsyncDatabase, NewOutboxMessage, OutboxMessage};

use crate::error::OutboxResult;

/// Write-side of the outbox.
///
/// The important entry point is [`OutboxStore::append_with`], which
/// takes the caller's open connection so the event row commits or rolls
/// back with the business write it describes. The async methods exist
/// for standalone appends and inspection.
#[derive(Clone)]
pub struct OutboxStore {
    db: AsyncDatabase,
}

impl OutboxStore {
    pub fn new(db: AsyncDatabase) -> Self {
        Self { db }
    }

    /// Appends an event row on the caller's connection. When the caller
    /// holds an open transaction the row becomes visible only if that
    /// transaction commits.
    pub fn append_with(
        conn: &Connection,
        message: &NewOutboxMessage,
    ) -> OutboxResult<OutboxMessage> {
        let stored = outbox::insert(conn, message)?;
        tracing::debug!(
            message_id = %stored.id,
            event_type = %stored.event_type,
            source = %stored.source,
            "Outbox event appended"
        );
        Ok(stored)
    }

    /// Appends a single event row in its own implicit transaction.
    pub async fn append(&self, message: NewOutboxMessage) -> OutboxResult<OutboxMessage> {
        let stored = self
            .db
            .call(move |conn| outbox::insert(conn, &message))
            .await?;
        tracing::debug!(
            message_id = %stored.id,
            event_type = %stored.event_type,
            "Outbox event appended"
        );
        Ok(stored)
    }

    pub async fn get(&self, id: &str) -> OutboxResult<Option<OutboxMessage>> {
        let id = id.to_string();
        Ok(self.db.call(move |conn| outbox::get(conn, &id)).await?)
    }

    pub async fn unpublished_count(&self) -> OutboxResult<i64> {
        Ok(self.db.call(outbox::count_unpublished).await?)
    }
}
