//! Store errors.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The directory holding the store file could not be created.
    #[error("Failed to create store directory '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Migration v{version} failed: {reason}")]
    Migration { version: u32, reason: String },

    /// A stored task result could not be encoded or read back.
    #[error("Task result payload is not valid JSON: {0}")]
    Payload(#[from] serde_json::Error),

    /// A worker panicked while holding the connection.
    #[error("Store connection lock poisoned")]
    LockPoisoned,
}
