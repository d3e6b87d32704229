//! File repository: the `files` table mapping geometry records to disk paths.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{now_timestamp, Database, DatabaseError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRow {
    pub id: i64,
    pub full_path: String,
    pub created_at: String,
}

impl FileRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            full_path: row.get("full_path")?,
            created_at: row.get("created_at")?,
        })
    }
}

pub fn insert_in(conn: &Connection, full_path: &str) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO files (full_path, created_at) VALUES (?1, ?2)",
        params![full_path, now_timestamp()],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn find_by_id_in(conn: &Connection, id: i64) -> Result<Option<FileRow>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT * FROM files WHERE id = ?1",
            params![id],
            FileRow::from_row,
        )
        .optional()?)
}

pub fn find_by_id(db: &Database, id: i64) -> Result<Option<FileRow>, DatabaseError> {
    db.with_conn(|conn| find_by_id_in(conn, id))
}

pub fn find_by_path(db: &Database, full_path: &str) -> Result<Option<FileRow>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT * FROM files WHERE full_path = ?1",
                params![full_path],
                FileRow::from_row,
            )
            .optional()?)
    })
}

pub fn delete_in(conn: &Connection, id: i64) -> Result<(), DatabaseError> {
    conn.execute("DELETE FROM files WHERE id = ?1", params![id])?;
    Ok(())
}
