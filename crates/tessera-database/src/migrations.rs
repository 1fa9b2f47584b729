//! Database migrations.
//!
//! Migrations run in order and are tracked in the `migrations` table.

use crate::DatabaseResult;
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version.
pub const CURRENT_VERSION: i32 = 4;

/// Run all pending migrations.
pub fn run_migrations(conn: &Connection) -> DatabaseResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    info!(current_version, target_version = CURRENT_VERSION, "Running migrations");

    if current_version < 1 {
        migrate_v1_outbox(conn)?;
    }
    if current_version < 2 {
        migrate_v2_outbox_archive(conn)?;
    }
    if current_version < 3 {
        migrate_v3_notifications(conn)?;
    }
    if current_version < 4 {
        migrate_v4_usage_records(conn)?;
    }

    info!("Migrations complete");
    Ok(())
}

fn record_migration(conn: &Connection, version: i32, name: &str) -> DatabaseResult<()> {
    conn.execute(
        "INSERT INTO migrations (version, name) VALUES (?1, ?2)",
        rusqlite::params![version, name],
    )?;
    debug!(version, name, "Migration applied");
    Ok(())
}

/// V1: Transactional outbox table.
fn migrate_v1_outbox(conn: &Connection) -> DatabaseResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE outbox_messages (
            id TEXT PRIMARY KEY,
            event_type TEXT NOT NULL,
            source TEXT NOT NULL,
            triggered_by TEXT,
            object_id TEXT NOT NULL,
            payload TEXT NOT NULL,
            published INTEGER NOT NULL DEFAULT 0,
            correlation_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX idx_outbox_unpublished
            ON outbox_messages (created_at) WHERE published = 0;
        ",
    )?;
    record_migration(conn, 1, "outbox")
}

/// V2: Archive sink for published outbox rows past retention.
fn migrate_v2_outbox_archive(conn: &Connection) -> DatabaseResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE outbox_archive (
            id TEXT PRIMARY KEY,
            event_type TEXT NOT NULL,
            source TEXT NOT NULL,
            triggered_by TEXT,
            object_id TEXT NOT NULL,
            payload TEXT NOT NULL,
            correlation_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            published_at TEXT NOT NULL,
            archived_at TEXT NOT NULL
        );
        ",
    )?;
    record_migration(conn, 2, "outbox_archive")
}

/// V3: Notification delivery queue and its archive.
fn migrate_v3_notifications(conn: &Connection) -> DatabaseResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE notifications (
            id TEXT PRIMARY KEY,
            recipient TEXT NOT NULL,
            subject TEXT NOT NULL,
            body TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            attempt_count INTEGER NOT NULL DEFAULT 0,
            max_attempts INTEGER NOT NULL,
            next_attempt_at TEXT NOT NULL,
            expires_at TEXT,
            sent_at TEXT,
            last_error TEXT,
            created_at TEXT NOT NULL
        );

        CREATE INDEX idx_notifications_due
            ON notifications (next_attempt_at) WHERE status IN ('pending', 'sending');

        CREATE TABLE notifications_archive (
            id TEXT PRIMARY KEY,
            recipient TEXT NOT NULL,
            subject TEXT NOT NULL,
            body TEXT NOT NULL,
            status TEXT NOT NULL,
            attempt_count INTEGER NOT NULL,
            max_attempts INTEGER NOT NULL,
            sent_at TEXT,
            last_error TEXT,
            created_at TEXT NOT NULL,
            archived_at TEXT NOT NULL
        );
        ",
    )?;
    record_migration(conn, 3, "notifications")
}

/// V4: Usage ledger for quota enforcement.
fn migrate_v4_usage_records(conn: &Connection) -> DatabaseResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE usage_records (
            user_id TEXT NOT NULL,
            limit_type TEXT NOT NULL,
            period TEXT NOT NULL DEFAULT '',
            used INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (user_id, limit_type, period)
        );
        ",
    )?;
    record_migration(conn, 4, "usage_records")
}
