//! SQLite store for materials, files, orders, print jobs and the task queue.
//!
//! Workers in this process share one connection behind a mutex, so every
//! `with_transaction` call is atomic with respect to every other worker.
//! Other processes (the CLI submitting work) go through SQLite's own
//! locking; file databases wait on a busy lock instead of failing.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;

pub mod error;
pub mod file_repo;
pub mod job_repo;
pub mod material_repo;
pub mod migrations;
pub mod order_repo;
pub mod queue_repo;

pub use error::DatabaseError;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared handle on the store. Clones share the same connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens the store at `path`, creating it and its parent directory if
    /// needed, and migrates it to the latest schema.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| DatabaseError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let db = Self::prepare(conn)?;
        log::info!("Store ready at {}", path.display());
        Ok(db)
    }

    /// A private, migrated in-memory store.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Self::prepare(Connection::open_in_memory()?)
    }

    fn prepare(conn: Connection) -> Result<Self, DatabaseError> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        migrations::run_all(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` with the connection locked. Statements autocommit.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        f(&conn)
    }

    /// Runs `f` inside a transaction. Commits when `f` returns `Ok`, rolls
    /// back otherwise. Generic over the error so callers with richer error
    /// types can abort the transaction with their own variants.
    pub fn with_transaction<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Connection) -> Result<T, E>,
        E: From<DatabaseError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|_| E::from(DatabaseError::LockPoisoned))?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| E::from(DatabaseError::Sqlite(e)))?;
        let value = f(&tx)?;
        tx.commit().map_err(|e| E::from(DatabaseError::Sqlite(e)))?;
        Ok(value)
    }
}

/// Formats a timestamp so that lexical order matches chronological order.
pub fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn material_count(db: &Database) -> u32 {
        db.with_conn(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM materials", [], |r| r.get(0))?)
        })
        .unwrap()
    }

    #[test]
    fn test_file_store_created_with_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("var").join("slicequeue.db");

        let db = Database::open(&path).unwrap();
        assert!(path.exists());

        let mode: String = db
            .with_conn(|conn| Ok(conn.query_row("PRAGMA journal_mode", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[test]
    fn test_reopen_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slicequeue.db");

        {
            let db = Database::open(&path).unwrap();
            material_repo::insert(&db, "PETG", 9).unwrap();
        }
        let db = Database::open(&path).unwrap();
        assert_eq!(material_count(&db), 1);
    }

    #[test]
    fn test_clones_share_one_store() {
        let db = Database::open_in_memory().unwrap();
        material_repo::insert(&db.clone(), "PLA", 7).unwrap();
        assert_eq!(material_count(&db), 1);
    }

    #[test]
    fn test_foreign_keys_enforced() {
        let db = Database::open_in_memory().unwrap();
        let result = db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO print_jobs (order_id, file_id, material_id, updated_at)
                 VALUES (41, 42, 43, '2026-01-01')",
                [],
            )?;
            Ok(())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let db = Database::open_in_memory().unwrap();
        let result: Result<(), DatabaseError> = db.with_transaction(|conn| {
            conn.execute(
                "INSERT INTO materials (name, cost_per_gram) VALUES ('PETG', 9)",
                [],
            )?;
            Err(DatabaseError::LockPoisoned)
        });
        assert!(result.is_err());
        assert_eq!(material_count(&db), 0);
    }

    #[test]
    fn test_timestamps_sort_chronologically() {
        let earlier = format_timestamp(
            DateTime::parse_from_rfc3339("2026-01-01T09:59:59Z")
                .unwrap()
                .with_timezone(&Utc),
        );
        let later = format_timestamp(
            DateTime::parse_from_rfc3339("2026-01-01T10:00:00.5Z")
                .unwrap()
                .with_timezone(&Utc),
        );
        assert!(earlier < later);
        assert_eq!(earlier, "2026-01-01T09:59:59.000Z");
    }
}
