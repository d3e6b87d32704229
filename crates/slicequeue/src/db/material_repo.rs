//! Material repository: the per-gram cost rates referenced by print jobs.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Database, DatabaseError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterialRow {
    pub id: i64,
    pub name: String,
    /// Minor currency units per gram.
    pub cost_per_gram: i64,
}

impl MaterialRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            cost_per_gram: row.get("cost_per_gram")?,
        })
    }
}

/// Inserts a material and returns its id.
pub fn insert(db: &Database, name: &str, cost_per_gram: i64) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO materials (name, cost_per_gram) VALUES (?1, ?2)",
            params![name, cost_per_gram],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

pub fn find_by_id_in(conn: &Connection, id: i64) -> Result<Option<MaterialRow>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT * FROM materials WHERE id = ?1",
            params![id],
            MaterialRow::from_row,
        )
        .optional()?)
}

pub fn find_by_id(db: &Database, id: i64) -> Result<Option<MaterialRow>, DatabaseError> {
    db.with_conn(|conn| find_by_id_in(conn, id))
}

pub fn find_by_name(db: &Database, name: &str) -> Result<Option<MaterialRow>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT * FROM materials WHERE name = ?1",
                params![name],
                MaterialRow::from_row,
            )
            .optional()?)
    })
}

pub fn list(db: &Database) -> Result<Vec<MaterialRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM materials ORDER BY name")?;
        let rows = stmt
            .query_map([], MaterialRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
