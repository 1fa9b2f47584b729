//! Database connection and explicit transaction control.
//!
//! A `Database` is one unit of work: repositories participating in a causal
//! chain of writes share a single instance and its transaction state. It is
//! never shared across concurrent call chains; background loops use
//! [`crate::AsyncDatabase`] instead.

use crate::{migrations, DatabaseError, DatabaseResult};
use rusqlite::Connection;
use std::path::Path;
use tracing::warn;

/// Transaction isolation level.
///
/// Maps onto SQLite's transaction behaviors. `Serializable` takes the
/// exclusive lock up front and is the level the usage ledger runs at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    /// Lazy lock acquisition; reads may run concurrently.
    Deferred,
    /// Reserved write lock taken at begin.
    Immediate,
    /// Exclusive lock taken at begin; strictest level SQLite offers.
    Serializable,
}

impl IsolationLevel {
    fn begin_sql(&self) -> &'static str {
        match self {
            Self::Deferred => "BEGIN DEFERRED",
            Self::Immediate => "BEGIN IMMEDIATE",
            Self::Serializable => "BEGIN EXCLUSIVE",
        }
    }
}

/// Database wrapper owning one connection and its transaction state.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open a database at the given path, running migrations if needed.
    pub fn open(path: &Path) -> DatabaseResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // Enable WAL mode and performance optimizations
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA cache_size = -64000;
            PRAGMA temp_store = MEMORY;
            PRAGMA busy_timeout = 5000;
        ",
        )?;

        migrations::run_migrations(&conn)?;

        Ok(Self { conn })
    }

    /// Open an in-memory database for testing.
    pub fn open_in_memory() -> DatabaseResult<Self> {
        let conn = Connection::open_in_memory()?;
        // WAL mode doesn't apply to in-memory databases
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA cache_size = -64000;
            PRAGMA temp_store = MEMORY;
        ",
        )?;
        migrations::run_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// Get a reference to the underlying connection.
    ///
    /// Plain statements executed here without an explicit transaction are
    /// atomic at the storage layer on their own.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// True while an explicit transaction is open.
    pub fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }

    /// Begin an explicit transaction.
    ///
    /// Nesting is disallowed by design, not silently flattened: beginning
    /// while a transaction is already active is a programming error.
    pub fn begin(&self, level: IsolationLevel) -> DatabaseResult<()> {
        if self.in_transaction() {
            return Err(DatabaseError::TransactionActive);
        }
        self.conn.execute_batch(level.begin_sql())?;
        Ok(())
    }

    /// Commit the active transaction.
    ///
    /// Committing with no active transaction is a programming error.
    pub fn commit(&self) -> DatabaseResult<()> {
        if !self.in_transaction() {
            return Err(DatabaseError::NoTransaction);
        }
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    /// Roll back the active transaction.
    ///
    /// Always safe: with no active transaction this is an idempotent no-op,
    /// so cleanup paths can call it unconditionally.
    pub fn rollback(&self) -> DatabaseResult<()> {
        if !self.in_transaction() {
            return Ok(());
        }
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    /// Run `op` inside a transaction.
    ///
    /// Begins, runs `op`, commits on success. On any error the transaction
    /// is rolled back and the original error re-raised. The transaction is
    /// released on every exit path.
    pub fn execute_in_transaction<T>(
        &self,
        level: IsolationLevel,
        op: impl FnOnce(&Connection) -> DatabaseResult<T>,
    ) -> DatabaseResult<T> {
        self.begin(level)?;

        match op(&self.conn) {
            Ok(value) => match self.commit() {
                Ok(()) => Ok(value),
                Err(commit_err) => {
                    if let Err(e) = self.rollback() {
                        warn!(error = %e, "Rollback after failed commit also failed");
                    }
                    Err(commit_err)
                }
            },
            Err(op_err) => {
                if let Err(e) = self.rollback() {
                    warn!(error = %e, "Rollback after failed operation failed");
                }
                Err(op_err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.connection()
            .execute_batch("CREATE TABLE projects (id TEXT PRIMARY KEY, name TEXT NOT NULL)")
            .unwrap();
        db
    }

    fn project_count(db: &Database) -> i64 {
        db.connection()
            .query_row("SELECT COUNT(*) FROM projects", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_nested_begin_is_a_programming_error() {
        let db = create_test_db();
        db.begin(IsolationLevel::Deferred).unwrap();

        let err = db.begin(IsolationLevel::Deferred).unwrap_err();
        assert!(matches!(err, DatabaseError::TransactionActive));

        db.rollback().unwrap();
    }

    #[test]
    fn test_commit_without_begin_is_a_programming_error() {
        let db = create_test_db();
        let err = db.commit().unwrap_err();
        assert!(matches!(err, DatabaseError::NoTransaction));
    }

    #[test]
    fn test_rollback_without_begin_is_a_noop() {
        let db = create_test_db();
        db.rollback().unwrap();
        db.rollback().unwrap();
        assert!(!db.in_transaction());
    }

    #[test]
    fn test_begin_commit_persists_writes() {
        let db = create_test_db();

        db.begin(IsolationLevel::Immediate).unwrap();
        db.connection()
            .execute("INSERT INTO projects (id, name) VALUES ('p1', 'alpha')", [])
            .unwrap();
        db.commit().unwrap();

        assert_eq!(project_count(&db), 1);
        assert!(!db.in_transaction());
    }

    #[test]
    fn test_rollback_discards_writes() {
        let db = create_test_db();

        db.begin(IsolationLevel::Immediate).unwrap();
        db.connection()
            .execute("INSERT INTO projects (id, name) VALUES ('p1', 'alpha')", [])
            .unwrap();
        db.rollback().unwrap();

        assert_eq!(project_count(&db), 0);
    }

    #[test]
    fn test_execute_in_transaction_commits_on_success() {
        let db = create_test_db();

        db.execute_in_transaction(IsolationLevel::Immediate, |conn| {
            conn.execute("INSERT INTO projects (id, name) VALUES ('p1', 'alpha')", [])?;
            conn.execute("INSERT INTO projects (id, name) VALUES ('p2', 'beta')", [])?;
            Ok(())
        })
        .unwrap();

        assert_eq!(project_count(&db), 2);
        assert!(!db.in_transaction());
    }

    #[test]
    fn test_execute_in_transaction_rolls_back_on_error() {
        let db = create_test_db();

        let result: DatabaseResult<()> =
            db.execute_in_transaction(IsolationLevel::Immediate, |conn| {
                conn.execute("INSERT INTO projects (id, name) VALUES ('p1', 'alpha')", [])?;
                Err(DatabaseError::Connection("injected failure".to_string()))
            });

        assert!(result.is_err());
        assert_eq!(project_count(&db), 0);
        // Transaction resource released despite the failure
        assert!(!db.in_transaction());
        db.begin(IsolationLevel::Deferred).unwrap();
        db.rollback().unwrap();
    }

    #[test]
    fn test_plain_statement_outside_transaction_is_atomic() {
        let db = create_test_db();
        db.connection()
            .execute("INSERT INTO projects (id, name) VALUES ('p1', 'alpha')", [])
            .unwrap();
        assert_eq!(project_count(&db), 1);
    }
}
