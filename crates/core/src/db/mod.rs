//! SQLite persistence layer for keybranch.
//!
//! Provides a [`Database`] handle with WAL-mode journaling, automatic schema
//! migrations, and query helpers for every table the branch engine touches.

pub mod queries;
pub mod schema;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, TransactionBehavior};
use tracing::{debug, info};

use crate::errors::DatabaseError;

/// Default busy timeout applied when none is configured.
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

/// Main database handle wrapping a SQLite connection.
///
/// The connection is opened in WAL mode for concurrent-read performance and
/// uses `PRAGMA foreign_keys = ON`. The inner connection is wrapped in a
/// `Mutex` so that `Database` is `Send + Sync`, enabling use inside `Arc`.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a SQLite database at `path`.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        Self::open_with_timeout(path, DEFAULT_BUSY_TIMEOUT_MS)
    }

    /// Open (or create) a SQLite database at `path` with an explicit busy
    /// timeout, so concurrent writers from other connections wait instead of
    /// failing immediately with `SQLITE_BUSY`.
    pub fn open_with_timeout<P: AsRef<Path>>(
        path: P,
        busy_timeout_ms: u64,
    ) -> Result<Self, DatabaseError> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening database");

        let conn = Connection::open(path)?;

        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(&format!("PRAGMA busy_timeout = {};", busy_timeout_ms))?;

        debug!(busy_timeout_ms, "database opened successfully with WAL mode");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (useful for testing).
    pub fn in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run all schema migrations to bring the database up to date.
    pub fn initialize(&self) -> Result<(), DatabaseError> {
        info!("initializing database schema");
        let conn = self.conn();
        schema::run_migrations(&conn)?;
        debug!("database schema is up to date");
        Ok(())
    }

    /// Obtain a lock on the underlying connection.
    ///
    /// If the Mutex is poisoned (a previous holder panicked), the lock is
    /// recovered rather than propagating a panic. SQLite has already rolled
    /// back any transaction the panicking holder left open when its
    /// `Transaction` guard was dropped.
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("database mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Execute a closure inside a SQLite transaction. If the closure returns
    /// `Ok`, the transaction is committed; otherwise it is rolled back.
    ///
    /// Reads inside the closure see one consistent snapshot.
    pub fn transaction<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Connection) -> Result<T, E>,
        E: From<rusqlite::Error>,
    {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    /// Like [`transaction`](Self::transaction) but begins with `IMMEDIATE`,
    /// taking the database write lock before the closure runs. Writers from
    /// other connections block (up to the busy timeout) until commit or
    /// rollback, so a read-plan-write sequence cannot interleave with another
    /// writer's commit.
    pub fn write_transaction<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Connection) -> Result<T, E>,
        E: From<rusqlite::Error>,
    {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count_projects(db: &Database, name: &str) -> i64 {
        db.conn()
            .query_row(
                "SELECT COUNT(*) FROM projects WHERE name = ?1",
                rusqlite::params![name],
                |row| row.get(0),
            )
            .unwrap()
    }

    #[test]
    fn test_in_memory_database() {
        let db = Database::in_memory().expect("failed to create in-memory db");
        db.initialize().expect("failed to initialize schema");
    }

    #[test]
    fn test_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let db = Database::open_with_timeout(&path, 1000).expect("failed to create file db");
        db.initialize().expect("failed to initialize schema");
        assert!(path.exists());
    }

    #[test]
    fn test_transaction_commit() {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();

        db.transaction(|conn| {
            conn.execute(
                "INSERT INTO projects (id, name, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params!["p-1", "committed", "2025-01-01T00:00:00Z"],
            )?;
            Ok::<_, DatabaseError>(())
        })
        .unwrap();

        assert_eq!(count_projects(&db, "committed"), 1);
    }

    #[test]
    fn test_write_transaction_rollback() {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();

        let result: Result<(), DatabaseError> = db.write_transaction(|conn| {
            conn.execute(
                "INSERT INTO projects (id, name, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params!["p-2", "rolled_back", "2025-01-01T00:00:00Z"],
            )?;
            Err(DatabaseError::NotFound {
                entity: "test".into(),
                id: "forced".into(),
            })
        });
        assert!(result.is_err());
        assert_eq!(count_projects(&db, "rolled_back"), 0);
    }
}
