//! Database connection management.
//!
//! Wraps a single rusqlite Connection in a Mutex for thread-safe access.
//! Configures WAL mode and foreign-key enforcement on initialization.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, Transaction};
use tracing::info;

use relay_core::error::RelayError;

use crate::migrations;

/// Thread-safe SQLite database wrapper.
///
/// Every repository shares one `Arc<Database>`. Writes from concurrent
/// requests are serialized by the mutex, so each individual statement (and
/// each transaction opened through [`Database::with_transaction`]) is atomic
/// with respect to other requests.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a database at the given path.
    ///
    /// Configures WAL mode, synchronous=NORMAL, foreign keys, and runs
    /// all pending migrations.
    pub fn new(path: &Path) -> Result<Self, RelayError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| RelayError::Storage(format!("Failed to open database: {}", e)))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )
        .map_err(|e| RelayError::Storage(format!("Failed to set pragmas: {}", e)))?;

        info!("Database opened at {}", path.display());

        Self::from_connection(conn)
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, RelayError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| RelayError::Storage(format!("Failed to open in-memory db: {}", e)))?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| RelayError::Storage(format!("Failed to set pragmas: {}", e)))?;

        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, RelayError> {
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(migrations::run_migrations)?;
        Ok(db)
    }

    /// Execute a closure with a reference to the underlying connection.
    ///
    /// This is the primary way to interact with the database. The mutex
    /// is held for the duration of the closure.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, RelayError>
    where
        F: FnOnce(&Connection) -> Result<T, RelayError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| RelayError::Storage(format!("Database lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Execute a closure inside a transaction.
    ///
    /// The transaction commits only if the closure returns `Ok`; on error it
    /// is rolled back when dropped.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T, RelayError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, RelayError>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| RelayError::Storage(format!("Database lock poisoned: {}", e)))?;
        let tx = conn
            .transaction()
            .map_err(|e| RelayError::Storage(format!("Failed to begin transaction: {}", e)))?;
        let value = f(&tx)?;
        tx.commit()
            .map_err(|e| RelayError::Storage(format!("Failed to commit transaction: {}", e)))?;
        Ok(value)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count_users(db: &Database) -> i64 {
        db.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
                .map_err(|e| RelayError::Storage(e.to_string()))
        })
        .unwrap()
    }

    #[test]
    fn test_in_memory_database() {
        let db = Database::in_memory().unwrap();
        assert_eq!(count_users(&db), 0);
    }

    #[test]
    fn test_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("relay.db");
        let db = Database::new(&path).unwrap();

        assert_eq!(count_users(&db), 0);
        assert!(path.exists());
    }

    #[test]
    fn test_file_database_reopen_keeps_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.db");

        {
            let db = Database::new(&path).unwrap();
            db.with_conn(|conn| {
                conn.execute(
                    "INSERT INTO users (id, secret_hash, created_at) VALUES ('alice', 'x', 0)",
                    [],
                )
                .map_err(|e| RelayError::Storage(e.to_string()))?;
                Ok(())
            })
            .unwrap();
        }

        let reopened = Database::new(&path).unwrap();
        assert_eq!(count_users(&reopened), 1);
    }

    #[test]
    fn test_foreign_keys_enabled() {
        let db = Database::in_memory().unwrap();
        db.with_conn(|conn| {
            let enabled: i64 = conn
                .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
                .map_err(|e| RelayError::Storage(e.to_string()))?;
            assert_eq!(enabled, 1);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let db = Database::in_memory().unwrap();

        let result: Result<(), RelayError> = db.with_transaction(|tx| {
            tx.execute(
                "INSERT INTO users (id, secret_hash, created_at) VALUES ('bob', 'x', 0)",
                [],
            )
            .map_err(|e| RelayError::Storage(e.to_string()))?;
            Err(RelayError::Storage("boom".to_string()))
        });

        assert!(result.is_err());
        assert_eq!(count_users(&db), 0);
    }

    #[test]
    fn test_transaction_commits_on_success() {
        let db = Database::in_memory().unwrap();

        db.with_transaction(|tx| {
            tx.execute(
                "INSERT INTO users (id, secret_hash, created_at) VALUES ('carol', 'x', 0)",
                [],
            )
            .map_err(|e| RelayError::Storage(e.to_string()))?;
            Ok(())
        })
        .unwrap();

        assert_eq!(count_users(&db), 1);
    }
}
