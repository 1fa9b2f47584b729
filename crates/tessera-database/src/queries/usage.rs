//! Usage ledger queries.

use super::{now_str, parse_datetime};
use crate::{DatabaseResult, UsageRecord};
use rusqlite::{params, Connection};

/// Read current usage for a (user, limit type, period). Zero when absent.
pub fn get_usage(
    conn: &Connection,
    user_id: &str,
    limit_type: &str,
    period: &str,
) -> DatabaseResult<i64> {
    let mut stmt = conn.prepare_cached(
        "SELECT used FROM usage_records WHERE user_id = ?1 AND limit_type = ?2 AND period = ?3",
    )?;

    let result = stmt.query_row(params![user_id, limit_type, period], |row| row.get(0));
    match result {
        Ok(used) => Ok(used),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
        Err(e) => Err(e.into()),
    }
}

/// Apply a usage delta, creating the record on first use.
pub fn add_usage(
    conn: &Connection,
    user_id: &str,
    limit_type: &str,
    period: &str,
    amount: i64,
) -> DatabaseResult<()> {
    conn.execute(
        "INSERT INTO usage_records (user_id, limit_type, period, used, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT (user_id, limit_type, period)
         DO UPDATE SET used = used + excluded.used, updated_at = excluded.updated_at",
        params![user_id, limit_type, period, amount, now_str()],
    )?;
    Ok(())
}

/// Fetch the full record, when present.
pub fn get_record(
    conn: &Connection,
    user_id: &str,
    limit_type: &str,
    period: &str,
) -> DatabaseResult<Option<UsageRecord>> {
    let mut stmt = conn.prepare_cached(
        "SELECT user_id, limit_type, period, used, updated_at
         FROM usage_records WHERE user_id = ?1 AND limit_type = ?2 AND period = ?3",
    )?;

    let result = stmt.query_row(params![user_id, limit_type, period], |row| {
        Ok(UsageRecord {
            user_id: row.get(0)?,
            limit_type: row.get(1)?,
            period: row.get(2)?,
            used: row.get(3)?,
            updated_at: parse_datetime(row.get::<_, String>(4)?),
        })
    });

    match result {
        Ok(record) => Ok(Some(record)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}
