//! Query helpers, grouped by table.
//!
//! All helpers are free functions over `&rusqlite::Connection` so they can
//! run inside a sync unit-of-work transaction or an async executor closure
//! unchanged.

pub mod delivery;
pub mod outbox;
pub mod usage;

use chrono::{DateTime, SecondsFormat, Utc};

/// Format a timestamp for storage.
///
/// Fixed microsecond precision keeps lexicographic order equal to
/// chronological order, which the outbox dispatch ordering relies on.
pub(crate) fn fmt_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn now_str() -> String {
    fmt_datetime(Utc::now())
}

pub(crate) fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
