//! Outbox table queries.

use super::{fmt_datetime, now_str, parse_datetime};
use crate::{DatabaseResult, NewOutboxMessage, OutboxMessage};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

/// Insert a new outbox message.
///
/// Call inside the same transaction as the business mutation the event
/// announces, so both commit or neither does.
pub fn insert(conn: &Connection, message: &NewOutboxMessage) -> DatabaseResult<OutboxMessage> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = Utc::now();
    let now_s = fmt_datetime(now);

    conn.execute(
        "INSERT INTO outbox_messages
             (id, event_type, source, triggered_by, object_id, payload, published, correlation_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?8, ?8)",
        params![
            id,
            message.event_type,
            message.source,
            message.triggered_by,
            message.object_id,
            message.payload,
            message.correlation_id,
            now_s,
        ],
    )?;

    Ok(OutboxMessage {
        id,
        event_type: message.event_type.clone(),
        source: message.source.clone(),
        triggered_by: message.triggered_by.clone(),
        object_id: message.object_id.clone(),
        payload: message.payload.clone(),
        published: false,
        correlation_id: message.correlation_id.clone(),
        created_at: now,
        updated_at: now,
    })
}

/// Get an outbox message by id.
pub fn get(conn: &Connection, id: &str) -> DatabaseResult<Option<OutboxMessage>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, event_type, source, triggered_by, object_id, payload, published, correlation_id, created_at, updated_at
         FROM outbox_messages WHERE id = ?1",
    )?;

    let result = stmt.query_row(params![id], map_row);
    match result {
        Ok(message) => Ok(Some(message)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Fetch unpublished messages, oldest first, up to `limit`.
///
/// The rowid tiebreak keeps the order total when two rows share a
/// creation timestamp.
pub fn fetch_unpublished(conn: &Connection, limit: usize) -> DatabaseResult<Vec<OutboxMessage>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, event_type, source, triggered_by, object_id, payload, published, correlation_id, created_at, updated_at
         FROM outbox_messages
         WHERE published = 0
         ORDER BY created_at ASC, rowid ASC
         LIMIT ?1",
    )?;

    let messages = stmt
        .query_map(params![limit as i64], map_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(messages)
}

/// Mark a message as published.
///
/// Only called after a registered publisher completed successfully; the
/// flag is never set speculatively.
pub fn mark_published(conn: &Connection, id: &str) -> DatabaseResult<()> {
    conn.execute(
        "UPDATE outbox_messages SET published = 1, updated_at = ?1 WHERE id = ?2",
        params![now_str(), id],
    )?;
    Ok(())
}

/// Count unpublished messages (operational visibility).
pub fn count_unpublished(conn: &Connection) -> DatabaseResult<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM outbox_messages WHERE published = 0",
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Move published messages older than `cutoff` to the archive table.
///
/// `updated_at` of a published row is the publish time. Returns the number
/// of rows moved. Callers wrap this in a transaction.
pub fn archive_published_before(
    conn: &Connection,
    cutoff: DateTime<Utc>,
) -> DatabaseResult<usize> {
    let cutoff_s = fmt_datetime(cutoff);
    let now = now_str();

    let moved = conn.execute(
        "INSERT INTO outbox_archive
             (id, event_type, source, triggered_by, object_id, payload, correlation_id, created_at, published_at, archived_at)
         SELECT id, event_type, source, triggered_by, object_id, payload, correlation_id, created_at, updated_at, ?1
         FROM outbox_messages
         WHERE published = 1 AND updated_at < ?2",
        params![now, cutoff_s],
    )?;

    conn.execute(
        "DELETE FROM outbox_messages WHERE published = 1 AND updated_at < ?1",
        params![cutoff_s],
    )?;

    Ok(moved)
}

/// Delete archive rows older than `cutoff`. Returns the number pruned.
pub fn prune_archive_before(conn: &Connection, cutoff: DateTime<Utc>) -> DatabaseResult<usize> {
    let count = conn.execute(
        "DELETE FROM outbox_archive WHERE archived_at < ?1",
        params![fmt_datetime(cutoff)],
    )?;
    Ok(count)
}

/// Count archived messages.
pub fn count_archived(conn: &Connection) -> DatabaseResult<i64> {
    let count = conn.query_row("SELECT COUNT(*) FROM outbox_archive", [], |row| row.get(0))?;
    Ok(count)
}

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<OutboxMessage> {
    Ok(OutboxMessage {
        id: row.get(0)?,
        event_type: row.get(1)?,
        source: row.get(2)?,
        triggered_by: row.get(3)?,
        object_id: row.get(4)?,
        payload: row.get(5)?,
        published: row.get(6)?,
        correlation_id: row.get(7)?,
        created_at: parse_datetime(row.get::<_, String>(8)?),
        updated_at: parse_datetime(row.get::<_, String>(9)?),
    })
}
