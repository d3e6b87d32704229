//! Schema migrations.
//!
//! Each migration is an embedded SQL file with a version number. Applied
//! versions are recorded in `_migrations`; a migration and its record are
//! written in one transaction, so a failed step leaves no partial schema.

use rusqlite::{params, Connection};

use super::error::DatabaseError;

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_materials",
        sql: include_str!("sql/001_create_materials.sql"),
    },
    Migration {
        version: 2,
        name: "create_files",
        sql: include_str!("sql/002_create_files.sql"),
    },
    Migration {
        version: 3,
        name: "create_orders",
        sql: include_str!("sql/003_create_orders.sql"),
    },
    Migration {
        version: 4,
        name: "create_print_jobs",
        sql: include_str!("sql/004_create_print_jobs.sql"),
    },
    Migration {
        version: 5,
        name: "create_task_queue",
        sql: include_str!("sql/005_create_task_queue.sql"),
    },
];

/// Brings the schema up to date.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );",
    )?;

    let applied = current_version(conn)?;
    for migration in MIGRATIONS.iter().filter(|m| m.version > applied) {
        apply(conn, migration)?;
    }
    Ok(())
}

fn current_version(conn: &Connection) -> Result<u32, DatabaseError> {
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?)
}

fn apply(conn: &Connection, migration: &Migration) -> Result<(), DatabaseError> {
    let failed = |e: rusqlite::Error| DatabaseError::Migration {
        version: migration.version,
        reason: e.to_string(),
    };

    log::info!("Applying migration v{} ({})", migration.version, migration.name);
    let tx = conn.unchecked_transaction().map_err(failed)?;
    tx.execute_batch(migration.sql).map_err(failed)?;
    tx.execute(
        "INSERT INTO _migrations (version, name) VALUES (?1, ?2)",
        params![migration.version, migration.name],
    )
    .map_err(failed)?;
    tx.commit().map_err(failed)
}
