//! Notification delivery queue queries.

use super::{fmt_datetime, now_str, parse_datetime};
use crate::{DatabaseResult, DeliveryStatus, NewQueuedNotification, QueuedNotification};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

/// Insert a notification in `Pending` state, due immediately.
pub fn enqueue(
    conn: &Connection,
    notification: &NewQueuedNotification,
) -> DatabaseResult<QueuedNotification> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = Utc::now();
    let now_s = fmt_datetime(now);

    conn.execute(
        "INSERT INTO notifications
             (id, recipient, subject, body, status, attempt_count, max_attempts, next_attempt_at, expires_at, created_at)
         VALUES (?1, ?2, ?3, ?4, 'pending', 0, ?5, ?6, ?7, ?6)",
        params![
            id,
            notification.recipient,
            notification.subject,
            notification.body,
            notification.max_attempts,
            now_s,
            notification.expires_at.map(fmt_datetime),
        ],
    )?;

    Ok(QueuedNotification {
        id,
        recipient: notification.recipient.clone(),
        subject: notification.subject.clone(),
        body: notification.body.clone(),
        status: DeliveryStatus::Pending,
        attempt_count: 0,
        max_attempts: notification.max_attempts,
        next_attempt_at: now,
        expires_at: notification.expires_at,
        sent_at: None,
        last_error: None,
        created_at: now,
    })
}

/// Get a notification by id.
pub fn get(conn: &Connection, id: &str) -> DatabaseResult<Option<QueuedNotification>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, recipient, subject, body, status, attempt_count, max_attempts, next_attempt_at, expires_at, sent_at, last_error, created_at
         FROM notifications WHERE id = ?1",
    )?;

    let result = stmt.query_row(params![id], map_row);
    match result {
        Ok(notification) => Ok(Some(notification)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Fetch pending notifications whose next-attempt time has passed and whose
/// attempts are not exhausted. The durability sweep re-hydrates from here.
pub fn fetch_due(
    conn: &Connection,
    now: DateTime<Utc>,
    limit: usize,
) -> DatabaseResult<Vec<QueuedNotification>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, recipient, subject, body, status, attempt_count, max_attempts, next_attempt_at, expires_at, sent_at, last_error, created_at
         FROM notifications
         WHERE status = 'pending'
           AND next_attempt_at <= ?1
           AND attempt_count < max_attempts
         ORDER BY next_attempt_at ASC
         LIMIT ?2",
    )?;

    let rows = stmt
        .query_map(params![fmt_datetime(now), limit as i64], map_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Claim a pending, due notification for sending.
///
/// Returns false when the row was not claimable: already claimed by another
/// worker, terminal, or still inside its backoff window. The backoff guard
/// makes duplicate wake-up signals for the same row harmless.
pub fn mark_sending(conn: &Connection, id: &str, now: DateTime<Utc>) -> DatabaseResult<bool> {
    let changed = conn.execute(
        "UPDATE notifications SET status = 'sending'
         WHERE id = ?1 AND status = 'pending' AND next_attempt_at <= ?2",
        params![id, fmt_datetime(now)],
    )?;
    Ok(changed == 1)
}

/// Record a successful delivery.
pub fn mark_sent(conn: &Connection, id: &str, attempt_count: i64) -> DatabaseResult<()> {
    conn.execute(
        "UPDATE notifications SET status = 'sent', attempt_count = ?1, sent_at = ?2, last_error = NULL
         WHERE id = ?3",
        params![attempt_count, now_str(), id],
    )?;
    Ok(())
}

/// Return a notification to `Pending` with a backoff window.
pub fn mark_retry(
    conn: &Connection,
    id: &str,
    attempt_count: i64,
    next_attempt_at: DateTime<Utc>,
    error: &str,
) -> DatabaseResult<()> {
    conn.execute(
        "UPDATE notifications
         SET status = 'pending', attempt_count = ?1, next_attempt_at = ?2, last_error = ?3
         WHERE id = ?4",
        params![attempt_count, fmt_datetime(next_attempt_at), error, id],
    )?;
    Ok(())
}

/// Mark a notification terminally failed. Never retried after this.
pub fn mark_failed(
    conn: &Connection,
    id: &str,
    attempt_count: i64,
    error: &str,
) -> DatabaseResult<()> {
    conn.execute(
        "UPDATE notifications
         SET status = 'failed', attempt_count = ?1, last_error = ?2
         WHERE id = ?3",
        params![attempt_count, error, id],
    )?;
    Ok(())
}

/// Reset `Sending` rows back to `Pending` (crash recovery at startup).
pub fn reset_sending_to_pending(conn: &Connection) -> DatabaseResult<usize> {
    let count = conn.execute(
        "UPDATE notifications SET status = 'pending' WHERE status = 'sending'",
        [],
    )?;
    Ok(count)
}

/// Mark expired pending rows as failed. Returns how many were expired.
pub fn expire_overdue(conn: &Connection, now: DateTime<Utc>) -> DatabaseResult<usize> {
    let count = conn.execute(
        "UPDATE notifications
         SET status = 'failed', last_error = 'expired'
         WHERE status = 'pending' AND expires_at IS NOT NULL AND expires_at <= ?1",
        params![fmt_datetime(now)],
    )?;
    Ok(count)
}

/// Mark pending rows with exhausted attempts as failed.
///
/// Normally workers do this inline; the sweep catches rows that exhausted
/// attempts right before a crash.
pub fn fail_exhausted(conn: &Connection) -> DatabaseResult<usize> {
    let count = conn.execute(
        "UPDATE notifications
         SET status = 'failed', last_error = COALESCE(last_error, 'attempts exhausted')
         WHERE status = 'pending' AND attempt_count >= max_attempts",
        [],
    )?;
    Ok(count)
}

/// Move terminal (sent/failed) rows older than `cutoff` to the archive.
pub fn archive_terminal_before(conn: &Connection, cutoff: DateTime<Utc>) -> DatabaseResult<usize> {
    let cutoff_s = fmt_datetime(cutoff);
    let now = now_str();

    let moved = conn.execute(
        "INSERT INTO notifications_archive
             (id, recipient, subject, body, status, attempt_count, max_attempts, sent_at, last_error, created_at, archived_at)
         SELECT id, recipient, subject, body, status, attempt_count, max_attempts, sent_at, last_error, created_at, ?1
         FROM notifications
         WHERE status IN ('sent', 'failed') AND created_at < ?2",
        params![now, cutoff_s],
    )?;

    conn.execute(
        "DELETE FROM notifications WHERE status IN ('sent', 'failed') AND created_at < ?1",
        params![cutoff_s],
    )?;

    Ok(moved)
}

/// Count notifications by status (operational visibility).
pub fn count_by_status(conn: &Connection, status: DeliveryStatus) -> DatabaseResult<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM notifications WHERE status = ?1",
        params![status.as_str()],
        |row| row.get(0),
    )?;
    Ok(count)
}

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueuedNotification> {
    Ok(QueuedNotification {
        id: row.get(0)?,
        recipient: row.get(1)?,
        subject: row.get(2)?,
        body: row.get(3)?,
        status: DeliveryStatus::from_str(&row.get::<_, String>(4)?),
        attempt_count: row.get(5)?,
        max_attempts: row.get(6)?,
        next_attempt_at: parse_datetime(row.get::<_, String>(7)?),
        expires_at: row.get::<_, Option<String>>(8)?.map(parse_datetime),
        sent_at: row.get::<_, Option<String>>(9)?.map(parse_datetime),
        last_error: row.get(10)?,
        created_at: parse_datetime(row.get::<_, String>(11)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    fn new_notification(recipient: &str) -> NewQueuedNotification {
        NewQueuedNotification {
            recipient: recipient.to_string(),
            subject: "Welcome".to_string(),
            body: "Hello there".to_string(),
            max_attempts: 5,
            expires_at: None,
        }
    }

    #[test]
    fn test_enqueue_is_pending_and_due() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();

        let stored = enqueue(conn, &new_notification("a@example.com")).unwrap();
        assert_eq!(stored.status, DeliveryStatus::Pending);
        assert_eq!(stored.attempt_count, 0);

        let due = fetch_due(conn, Utc::now() + chrono::Duration::seconds(1), 10).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, stored.id);
    }

    #[test]
    fn test_mark_sending_claims_once() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();

        let stored = enqueue(conn, &new_notification("a@example.com")).unwrap();
        assert!(mark_sending(conn, &stored.id, Utc::now()).unwrap());
        // Second claim loses
        assert!(!mark_sending(conn, &stored.id, Utc::now()).unwrap());
        assert_eq!(
            get(conn, &stored.id).unwrap().unwrap().status,
            DeliveryStatus::Sending
        );
    }

    #[test]
    fn test_mark_sending_rejects_row_inside_backoff_window() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();

        let stored = enqueue(conn, &new_notification("a@example.com")).unwrap();
        let next = Utc::now() + chrono::Duration::seconds(30);
        mark_retry(conn, &stored.id, 1, next, "connection refused").unwrap();

        // Still pending, but not due yet.
        assert!(!mark_sending(conn, &stored.id, Utc::now()).unwrap());
        assert_eq!(
            get(conn, &stored.id).unwrap().unwrap().status,
            DeliveryStatus::Pending
        );

        // Claimable once the window has elapsed.
        assert!(mark_sending(conn, &stored.id, next + chrono::Duration::seconds(1)).unwrap());
    }

    #[test]
    fn test_retry_goes_back_to_pending_with_backoff() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();

        let stored = enqueue(conn, &new_notification("a@example.com")).unwrap();
        mark_sending(conn, &stored.id, Utc::now()).unwrap();

        let next = Utc::now() + chrono::Duration::seconds(30);
        mark_retry(conn, &stored.id, 1, next, "connection refused").unwrap();

        let row = get(conn, &stored.id).unwrap().unwrap();
        assert_eq!(row.status, DeliveryStatus::Pending);
        assert_eq!(row.attempt_count, 1);
        assert_eq!(row.last_error.as_deref(), Some("connection refused"));

        // Not due until the backoff window elapses
        assert!(fetch_due(conn, Utc::now(), 10).unwrap().is_empty());
        assert_eq!(
            fetch_due(conn, next + chrono::Duration::seconds(1), 10)
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_sent_clears_error_and_sets_timestamp() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();

        let stored = enqueue(conn, &new_notification("a@example.com")).unwrap();
        mark_sending(conn, &stored.id, Utc::now()).unwrap();
        mark_sent(conn, &stored.id, 3).unwrap();

        let row = get(conn, &stored.id).unwrap().unwrap();
        assert_eq!(row.status, DeliveryStatus::Sent);
        assert_eq!(row.attempt_count, 3);
        assert!(row.sent_at.is_some());
        assert!(row.last_error.is_none());
    }

    #[test]
    fn test_failed_row_is_never_due_again() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();

        let stored = enqueue(conn, &new_notification("a@example.com")).unwrap();
        mark_sending(conn, &stored.id, Utc::now()).unwrap();
        mark_failed(conn, &stored.id, 5, "smtp unavailable").unwrap();

        let far_future = Utc::now() + chrono::Duration::days(365);
        assert!(fetch_due(conn, far_future, 10).unwrap().is_empty());
        assert!(!mark_sending(conn, &stored.id, Utc::now()).unwrap());
    }

    #[test]
    fn test_exhausted_attempts_excluded_from_due() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();

        let stored = enqueue(conn, &new_notification("a@example.com")).unwrap();
        mark_retry(conn, &stored.id, 5, Utc::now() - chrono::Duration::seconds(1), "err").unwrap();

        assert!(fetch_due(conn, Utc::now(), 10).unwrap().is_empty());
        assert_eq!(fail_exhausted(conn).unwrap(), 1);
        assert_eq!(
            get(conn, &stored.id).unwrap().unwrap().status,
            DeliveryStatus::Failed
        );
    }

    #[test]
    fn test_reset_sending_to_pending() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();

        let stored = enqueue(conn, &new_notification("a@example.com")).unwrap();
        mark_sending(conn, &stored.id, Utc::now()).unwrap();

        assert_eq!(reset_sending_to_pending(conn).unwrap(), 1);
        assert_eq!(
            get(conn, &stored.id).unwrap().unwrap().status,
            DeliveryStatus::Pending
        );
    }

    #[test]
    fn test_expire_overdue() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();

        let mut expiring = new_notification("a@example.com");
        expiring.expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
        let expired = enqueue(conn, &expiring).unwrap();
        let fresh = enqueue(conn, &new_notification("b@example.com")).unwrap();

        assert_eq!(expire_overdue(conn, Utc::now()).unwrap(), 1);
        assert_eq!(
            get(conn, &expired.id).unwrap().unwrap().status,
            DeliveryStatus::Failed
        );
        assert_eq!(
            get(conn, &fresh.id).unwrap().unwrap().status,
            DeliveryStatus::Pending
        );
    }

    #[test]
    fn test_archive_moves_terminal_rows() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();

        let sent = enqueue(conn, &new_notification("a@example.com")).unwrap();
        mark_sent(conn, &sent.id, 1).unwrap();
        let pending = enqueue(conn, &new_notification("b@example.com")).unwrap();

        let cutoff = Utc::now() + chrono::Duration::seconds(60);
        assert_eq!(archive_terminal_before(conn, cutoff).unwrap(), 1);
        assert!(get(conn, &sent.id).unwrap().is_none());
        assert!(get(conn, &pending.id).unwrap().is_some());

        let archived: i64 = conn
            .query_row("SELECT COUNT(*) FROM notifications_archive", [], |row| row.get(0))
            .unwrap();
        assert_eq!(archived, 1);
    }

    #[test]
    fn test_count_by_status() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();

        let a = enqueue(conn, &new_notification("a@example.com")).unwrap();
        enqueue(conn, &new_notification("b@example.com")).unwrap();
        mark_sent(conn, &a.id, 1).unwrap();

        assert_eq!(count_by_status(conn, DeliveryStatus::Pending).unwrap(), 1);
        assert_eq!(count_by_status(conn, DeliveryStatus::Sent).unwrap(), 1);
        assert_eq!(count_by_status(conn, DeliveryStatus::Failed).unwrap(), 0);
    }
}
