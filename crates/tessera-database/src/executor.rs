//! Async SQLite executor using a dedicated background thread.
//!
//! Background loops (dispatcher, sweeps, usage ledger) talk to SQLite
//! through this handle. Queries are sent over a channel to a single
//! dedicated thread and execute in FIFO order, keeping the Tokio runtime
//! free of blocking work.
//!
//! Only SQL and lightweight row mapping belong inside a `call` closure.
//! Anything that blocks the single database thread starves every other
//! query behind it.

use crate::{migrations, DatabaseError, DatabaseResult};
use std::path::Path;
use tokio_rusqlite::Connection;
use tracing::{debug, info};

/// Convert a tokio_rusqlite::Error to DatabaseError.
fn from_tokio_rusqlite(e: tokio_rusqlite::Error) -> DatabaseError {
    match e {
        tokio_rusqlite::Error::Rusqlite(e) => DatabaseError::Sqlite(e),
        tokio_rusqlite::Error::Close(_) => {
            DatabaseError::Connection("Connection closed".to_string())
        }
        other => DatabaseError::Connection(other.to_string()),
    }
}

/// Async SQLite database with a dedicated executor thread.
///
/// Cloning is cheap; all clones share the same executor thread, so closures
/// submitted from concurrent tasks are serialized in submission order.
#[derive(Clone)]
pub struct AsyncDatabase {
    conn: Connection,
    path: String,
}

impl AsyncDatabase {
    /// Open a database at the given path.
    ///
    /// Creates the file if needed, enables WAL mode, runs pending
    /// migrations, and starts the executor thread.
    pub async fn open(path: &Path) -> DatabaseResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let path_str = path.to_string_lossy().to_string();

        info!(path = %path_str, "Opening async database");

        let conn = Connection::open(&path_str)
            .await
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;

        conn.call(|conn| {
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
            Ok(())
        })
        .await
        .map_err(from_tokio_rusqlite)?;

        conn.call(|conn| {
            migrations::run_migrations(conn)
                .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
            Ok(())
        })
        .await
        .map_err(from_tokio_rusqlite)?;

        Ok(Self {
            conn,
            path: path_str,
        })
    }

    /// Open an in-memory database for testing.
    pub async fn open_in_memory() -> DatabaseResult<Self> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;

        conn.call(|conn| {
            conn.execute_batch(
                "
                PRAGMA foreign_keys = ON;
                PRAGMA temp_store = MEMORY;
                ",
            )?;
            migrations::run_migrations(conn)
                .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
            Ok(())
        })
        .await
        .map_err(from_tokio_rusqlite)?;

        Ok(Self {
            conn,
            path: ":memory:".to_string(),
        })
    }

    /// Execute a closure on the database connection.
    ///
    /// The closure runs on the dedicated SQLite thread; the caller's task
    /// is parked (not blocked) until the result is ready. A closure that
    /// needs multi-statement atomicity opens its own transaction and
    /// commits before returning.
    pub async fn call<F, T>(&self, f: F) -> DatabaseResult<T>
    where
        F: FnOnce(&rusqlite::Connection) -> DatabaseResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let outer_result = self.conn.call(move |conn| Ok(f(conn))).await;

        match outer_result {
            Ok(inner) => inner,
            Err(e) => Err(from_tokio_rusqlite(e)),
        }
    }

    /// Execute a closure that returns a plain rusqlite::Result.
    pub async fn call_sqlite<F, T>(&self, f: F) -> DatabaseResult<T>
    where
        F: FnOnce(&rusqlite::Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.conn
            .call(move |conn| Ok(f(conn)?))
            .await
            .map_err(from_tokio_rusqlite)
    }

    /// Get the database file path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Check database health with a trivial query.
    pub async fn health_check(&self) -> DatabaseResult<()> {
        self.call_sqlite(|conn| conn.execute_batch("SELECT 1")).await?;
        debug!("Database health check passed");
        Ok(())
    }

    /// Close the database, waiting for pending operations to finish.
    pub async fn close(self) -> DatabaseResult<()> {
        self.conn
            .close()
            .await
            .map_err(|e| DatabaseError::Connection(format!("Failed to close database: {:?}", e)))?;
        info!(path = %self.path, "Database closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_open_and_health_check() {
        let dir = tempdir().unwrap();
        let db = AsyncDatabase::open(&dir.path().join("test.db")).await.unwrap();
        assert!(db.health_check().await.is_ok());
    }

    #[tokio::test]
    async fn test_call_runs_queries() {
        let db = AsyncDatabase::open_in_memory().await.unwrap();

        let count: i64 = db
            .call(|conn| {
                conn.query_row("SELECT COUNT(*) FROM outbox_messages", [], |row| row.get(0))
                    .map_err(DatabaseError::from)
            })
            .await
            .unwrap();

        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_concurrent_callers_are_serialized() {
        let dir = tempdir().unwrap();
        let db = AsyncDatabase::open(&dir.path().join("concurrent.db")).await.unwrap();

        db.call_sqlite(|conn| {
            conn.execute_batch(
                "CREATE TABLE counter (id INTEGER PRIMARY KEY, val INTEGER);
                 INSERT INTO counter (val) VALUES (0);",
            )
        })
        .await
        .unwrap();

        let mut handles = vec![];
        for _ in 0..10 {
            let db = db.clone();
            handles.push(tokio::spawn(async move {
                db.call_sqlite(|conn| {
                    conn.execute("UPDATE counter SET val = val + 1 WHERE id = 1", [])
                })
                .await
            }));
        }

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let count: i32 = db
            .call(|conn| {
                conn.query_row("SELECT val FROM counter WHERE id = 1", [], |row| row.get(0))
                    .map_err(DatabaseError::from)
            })
            .await
            .unwrap();

        assert_eq!(count, 10);
    }
}
