use std::time::Duration;

use chrono::Utc;
use rusqlite::Connection;
use tessera_core::UsageConfig;
use tessera_database::queries::usage;
use tessera_database::{AsyncDatabase, DatabaseResult};
use tracing::{debug, warn};

use crate::error::{UsageError, UsageResult};
use crate::limits::{LimitSet, LimitType};

/// Outcome of a limit check or consume attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitDecision {
    pub allowed: bool,
    pub limit_type: LimitType,
    /// Plan cap; `None` means unlimited.
    pub cap: Option<i64>,
    /// Usage after the decision (unchanged when denied).
    pub used: i64,
    pub requested: i64,
    /// Set when denied.
    pub reason: Option<String>,
}

/// Atomic usage accounting against per-plan caps.
///
/// `try_consume` runs read-decide-write inside one exclusive
/// transaction, so two concurrent consumers can never both land under
/// the cap and overshoot it together. Conflicts with writers outside
/// this process surface as busy errors and are retried a bounded number
/// of times before being reported as a denial.
#[derive(Clone)]
pub struct UsageLedger {
    db: AsyncDatabase,
    limits: LimitSet,
    max_conflict_retries: u32,
}

impl UsageLedger {
    pub fn new(db: AsyncDatabase, limits: LimitSet, config: &UsageConfig) -> Self {
        Self {
            db,
            limits,
            max_conflict_retries: config.max_conflict_retries,
        }
    }

    /// Current usage for the active period.
    pub async fn usage(&self, user_id: &str, limit_type: LimitType) -> UsageResult<i64> {
        let user_id = user_id.to_string();
        let period = limit_type.period_key(Utc::now());
        Ok(self
            .db
            .call(move |conn| usage::get_usage(conn, &user_id, limit_type.as_str(), &period))
            .await?)
    }

    /// Read-only check: would consuming `amount` stay under the cap?
    ///
    /// Advisory only; the answer can be stale by the time the caller
    /// acts on it. Use [`UsageLedger::try_consume`] to check and debit
    /// atomically.
    pub async fn check_limit(
        &self,
        user_id: &str,
        limit_type: LimitType,
        amount: i64,
    ) -> UsageResult<LimitDecision> {
        let used = self.usage(user_id, limit_type).await?;
        Ok(decide(limit_type, self.limits.cap(limit_type), used, amount))
    }

    /// Unconditional usage delta, for limit types tracked but not
    /// enforced. Negative amounts release usage.
    pub async fn increment_usage(
        &self,
        user_id: &str,
        limit_type: LimitType,
        amount: i64,
    ) -> UsageResult<()> {
        let user_id = user_id.to_string();
        let period = limit_type.period_key(Utc::now());
        self.db
            .call(move |conn| {
                usage::add_usage(conn, &user_id, limit_type.as_str(), &period, amount)
            })
            .await?;
        Ok(())
    }

    /// Atomically checks the cap and debits `amount` when allowed.
    ///
    /// Busy conflicts are retried up to the configured bound, then
    /// reported as a denial rather than an error so callers always get
    /// a decision.
    pub async fn try_consume(
        &self,
        user_id: &str,
        limit_type: LimitType,
        amount: i64,
    ) -> UsageResult<LimitDecision> {
        if amount <= 0 {
            return Err(UsageError::InvalidAmount(amount));
        }

        let cap = self.limits.cap(limit_type);
        let period = limit_type.period_key(Utc::now());

        let mut attempt = 0;
        loop {
            let user = user_id.to_string();
            let period = period.clone();
            let result = self
                .db
                .call(move |conn| consume_in_transaction(conn, &user, limit_type, &period, amount, cap))
                .await;

            match result {
                Ok(decision) => {
                    if !decision.allowed {
                        debug!(
                            user_id,
                            limit_type = limit_type.as_str(),
                            used = decision.used,
                            requested = amount,
                            "Usage consume denied"
                        );
                    }
                    return Ok(decision);
                }
                Err(e) if e.is_busy() && attempt < self.max_conflict_retries => {
                    attempt += 1;
                    debug!(
                        user_id,
                        limit_type = limit_type.as_str(),
                        attempt,
                        "Usage transaction conflict; retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(10 * attempt as u64)).await;
                }
                Err(e) if e.is_busy() => {
                    warn!(
                        user_id,
                        limit_type = limit_type.as_str(),
                        retries = self.max_conflict_retries,
                        "Usage transaction conflict persisted; denying"
                    );
                    return Ok(LimitDecision {
                        allowed: false,
                        limit_type,
                        cap,
                        used: 0,
                        requested: amount,
                        reason: Some("concurrent usage update conflict; retry".to_string()),
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Read-decide-write under an exclusive transaction. Rolls back on deny
/// so the transaction never holds a useless write.
fn consume_in_transaction(
    conn: &Connection,
    user_id: &str,
    limit_type: LimitType,
    period: &str,
    amount: i64,
    cap: Option<i64>,
) -> DatabaseResult<LimitDecision> {
    conn.execute_batch("BEGIN EXCLUSIVE")?;

    let outcome = (|| -> DatabaseResult<LimitDecision> {
        let used = usage::get_usage(conn, user_id, limit_type.as_str(), period)?;
        let decision = decide(limit_type, cap, used, amount);
        if decision.allowed {
            usage::add_usage(conn, user_id, limit_type.as_str(), period, amount)?;
        }
        Ok(decision)
    })();

    match outcome {
        Ok(decision) => {
            if decision.allowed {
                conn.execute_batch("COMMIT")?;
            } else {
                conn.execute_batch("ROLLBACK")?;
            }
            Ok(decision)
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            Err(e)
        }
    }
}

fn decide(limit_type: LimitType, cap: Option<i64>, used: i64, amount: i64) -> LimitDecision {
    match cap {
        Some(cap) if used + amount > cap => LimitDecision {
            allowed: false,
            limit_type,
            cap: Some(cap),
            used,
            requested: amount,
            reason: Some(format!(
                "{} limit reached: {} of {} used",
                limit_type.as_str(),
                used,
                cap
            )),
        },
        _ => LimitDecision {
            allowed: true,
            limit_type,
            cap,
            used: used + amount,
            requested: amount,
            reason: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> UsageConfig {
        UsageConfig {
            max_conflict_retries: 3,
            caps: Default::default(),
        }
    }

    async fn ledger(limits: LimitSet) -> UsageLedger {
        let db = AsyncDatabase::open_in_memory().await.unwrap();
        UsageLedger::new(db, limits, &config())
    }

    #[tokio::test]
    async fn test_consume_under_cap_allowed() {
        let ledger = ledger(LimitSet::new().with_cap(LimitType::Projects, 3)).await;

        let decision = ledger
            .try_consume("user-1", LimitType::Projects, 1)
            .await
            .unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.used, 1);
        assert_eq!(ledger.usage("user-1", LimitType::Projects).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_consume_over_cap_denied_without_debit() {
        let ledger = ledger(LimitSet::new().with_cap(LimitType::Projects, 2)).await;

        ledger
            .try_consume("user-1", LimitType::Projects, 2)
            .await
            .unwrap();
        let decision = ledger
            .try_consume("user-1", LimitType::Projects, 1)
            .await
            .unwrap();

        assert!(!decision.allowed);
        assert_eq!(decision.cap, Some(2));
        let reason = decision.reason.unwrap();
        assert!(reason.contains("2 of 2"), "reason was: {reason}");
        assert_eq!(ledger.usage("user-1", LimitType::Projects).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_unlimited_type_always_allowed() {
        let ledger = ledger(LimitSet::new()).await;

        for _ in 0..10 {
            let decision = ledger
                .try_consume("user-1", LimitType::StorageMb, 100)
                .await
                .unwrap();
            assert!(decision.allowed);
            assert_eq!(decision.cap, None);
        }
        assert_eq!(
            ledger.usage("user-1", LimitType::StorageMb).await.unwrap(),
            1000
        );
    }

    #[tokio::test]
    async fn test_concurrent_consumers_never_overshoot_cap() {
        let ledger = ledger(LimitSet::new().with_cap(LimitType::Seats, 3)).await;

        let mut handles = vec![];
        for _ in 0..5 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger.try_consume("team-1", LimitType::Seats, 1).await
            }));
        }

        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap().allowed {
                allowed += 1;
            }
        }

        assert_eq!(allowed, 3);
        assert_eq!(ledger.usage("team-1", LimitType::Seats).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_lock_conflict_surfaces_as_denial_after_bounded_retries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usage.db");
        let db = AsyncDatabase::open(&path).await.unwrap();
        // Keep each blocked attempt short so the bounded retry loop runs
        // quickly instead of waiting out the default busy timeout.
        db.call_sqlite(|conn| conn.execute_batch("PRAGMA busy_timeout = 50"))
            .await
            .unwrap();
        let ledger = UsageLedger::new(
            db,
            LimitSet::new().with_cap(LimitType::Projects, 3),
            &config(),
        );

        // A second connection holds the write lock for the whole test.
        let blocker = rusqlite::Connection::open(&path).unwrap();
        blocker.execute_batch("BEGIN EXCLUSIVE").unwrap();

        let decision = ledger
            .try_consume("user-1", LimitType::Projects, 1)
            .await
            .unwrap();
        assert!(!decision.allowed);
        let reason = decision.reason.unwrap();
        assert!(reason.contains("conflict"), "reason was: {reason}");

        // Releasing the lock lets the next consume through, and the
        // denied attempt left no partial debit behind.
        blocker.execute_batch("ROLLBACK").unwrap();
        let decision = ledger
            .try_consume("user-1", LimitType::Projects, 1)
            .await
            .unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.used, 1);
    }

    #[tokio::test]
    async fn test_check_limit_is_read_only() {
        let ledger = ledger(LimitSet::new().with_cap(LimitType::Projects, 3)).await;

        let decision = ledger
            .check_limit("user-1", LimitType::Projects, 2)
            .await
            .unwrap();
        assert!(decision.allowed);
        assert_eq!(ledger.usage("user-1", LimitType::Projects).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_periodic_limit_isolated_by_period() {
        let ledger = ledger(LimitSet::new().with_cap(LimitType::ApiCalls, 100)).await;

        ledger
            .try_consume("user-1", LimitType::ApiCalls, 40)
            .await
            .unwrap();

        // A different period key starts from zero.
        let db = ledger.db.clone();
        let other = db
            .call(|conn| usage::get_usage(conn, "user-1", "api_calls", "1999-01"))
            .await
            .unwrap();
        assert_eq!(other, 0);
    }

    #[tokio::test]
    async fn test_invalid_amount_rejected() {
        let ledger = ledger(LimitSet::new()).await;
        assert!(matches!(
            ledger.try_consume("user-1", LimitType::Projects, 0).await,
            Err(UsageError::InvalidAmount(0))
        ));
    }
}
