//! Durable task queue: the `task_queue` table.
//!
//! Entries are claimed with a lease. A worker that dies mid-job never clears
//! its lease, so once `lease_expires_at` passes the entry becomes claimable
//! again; this is what gives the queue at-least-once delivery. An entry
//! whose lease lapses after its last allowed attempt is failed instead.

use std::time::Duration;

use chrono::Utc;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::{format_timestamp, now_timestamp, Database, DatabaseError};
use crate::error::FailureKind;
use crate::worker::JobResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl TaskState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl FromSql for TaskState {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            other => Err(FromSqlError::Other(
                format!("unknown task state '{}'", other).into(),
            )),
        }
    }
}

impl ToSql for TaskState {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRow {
    pub id: String,
    pub print_job_id: Option<i64>,
    pub file_path: String,
    pub material_id: i64,
    pub state: TaskState,
    pub attempts: u32,
    pub max_attempts: u32,
    pub available_at: String,
    pub lease_expires_at: Option<String>,
    pub claimed_by: Option<String>,
    pub last_error: Option<String>,
    pub failure_kind: Option<String>,
    /// JSON-encoded job result once the entry is terminal.
    pub result: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl TaskRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            print_job_id: row.get("print_job_id")?,
            file_path: row.get("file_path")?,
            material_id: row.get("material_id")?,
            state: row.get("state")?,
            attempts: row.get("attempts")?,
            max_attempts: row.get("max_attempts")?,
            available_at: row.get("available_at")?,
            lease_expires_at: row.get("lease_expires_at")?,
            claimed_by: row.get("claimed_by")?,
            last_error: row.get("last_error")?,
            failure_kind: row.get("failure_kind")?,
            result: row.get("result")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Parameters for a new queue entry.
#[derive(Debug, Clone)]
pub struct NewTask<'a> {
    pub print_job_id: Option<i64>,
    pub file_path: &'a str,
    pub material_id: i64,
    pub max_attempts: u32,
}

fn timestamp_after(delay: Duration) -> String {
    let delay = chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
    format_timestamp(Utc::now() + delay)
}

/// Inserts a pending entry and returns its id (the job handle).
pub fn enqueue_in(conn: &Connection, task: &NewTask<'_>) -> Result<String, DatabaseError> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = now_timestamp();
    conn.execute(
        "INSERT INTO task_queue (id, print_job_id, file_path, material_id, state, attempts,
         max_attempts, available_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7, ?7, ?7)",
        params![
            id,
            task.print_job_id,
            task.file_path,
            task.material_id,
            TaskState::Pending,
            task.max_attempts,
            now,
        ],
    )?;
    Ok(id)
}

pub fn find_by_id(db: &Database, id: &str) -> Result<Option<TaskRow>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT * FROM task_queue WHERE id = ?1",
                params![id],
                TaskRow::from_row,
            )
            .optional()?)
    })
}

/// Fails running entries whose lease lapsed on their last allowed attempt.
/// The worker holding them died without reporting, so `attempts` already
/// counts the lost run.
fn fail_exhausted_leases_in(conn: &Connection, now: &str) -> Result<usize, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, attempts FROM task_queue
         WHERE state = 'running' AND lease_expires_at <= ?1 AND attempts >= max_attempts",
    )?;
    let exhausted = stmt
        .query_map(params![now], |r| Ok((r.get::<_, String>(0)?, r.get::<_, u32>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    for (id, attempts) in &exhausted {
        let error = format!("gave up after {} attempts: lease expired", attempts);
        let result = serde_json::to_string(&JobResult::failed(FailureKind::Transient, &*error))?;
        conn.execute(
            "UPDATE task_queue SET state = ?2, failure_kind = ?3, last_error = ?4, result = ?5,
             lease_expires_at = NULL, updated_at = ?6
             WHERE id = ?1 AND state = 'running'",
            params![
                id,
                TaskState::Failed,
                FailureKind::Transient.as_str(),
                error,
                result,
                now
            ],
        )?;
        log::error!("Queue entry {} {}", id, error);
    }
    Ok(exhausted.len())
}

/// Claims the oldest runnable entry: a due pending entry, or a running entry
/// whose lease has lapsed with attempts to spare. Bumps `attempts` and sets
/// a fresh lease.
pub fn claim_next(
    db: &Database,
    worker: &str,
    lease: Duration,
) -> Result<Option<TaskRow>, DatabaseError> {
    db.with_transaction(|conn| {
        let now = now_timestamp();
        fail_exhausted_leases_in(conn, &now)?;

        let id: Option<String> = conn
            .query_row(
                "SELECT id FROM task_queue
                 WHERE (state = 'pending' AND available_at <= ?1)
                    OR (state = 'running' AND lease_expires_at <= ?1
                        AND attempts < max_attempts)
                 ORDER BY available_at, created_at
                 LIMIT 1",
                params![now],
                |r| r.get(0),
            )
            .optional()?;
        let Some(id) = id else {
            return Ok(None);
        };

        conn.execute(
            "UPDATE task_queue SET state = ?2, attempts = attempts + 1, lease_expires_at = ?3,
             claimed_by = ?4, updated_at = ?5 WHERE id = ?1",
            params![id, TaskState::Running, timestamp_after(lease), worker, now],
        )?;

        Ok(conn
            .query_row(
                "SELECT * FROM task_queue WHERE id = ?1",
                params![id],
                TaskRow::from_row,
            )
            .optional()?)
    })
}

/// Marks a running entry succeeded. Returns false if the entry was no longer
/// running (already finished by a redelivered copy).
pub fn mark_succeeded(db: &Database, id: &str, result_json: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE task_queue SET state = ?2, result = ?3, last_error = NULL,
             failure_kind = NULL, lease_expires_at = NULL, updated_at = ?4
             WHERE id = ?1 AND state = 'running'",
            params![id, TaskState::Succeeded, result_json, now_timestamp()],
        )?;
        Ok(changed > 0)
    })
}

/// Marks a running entry failed for good.
pub fn mark_failed(
    db: &Database,
    id: &str,
    failure_kind: &str,
    error: &str,
    result_json: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE task_queue SET state = ?2, failure_kind = ?3, last_error = ?4, result = ?5,
             lease_expires_at = NULL, updated_at = ?6
             WHERE id = ?1 AND state = 'running'",
            params![
                id,
                TaskState::Failed,
                failure_kind,
                error,
                result_json,
                now_timestamp()
            ],
        )?;
        Ok(changed > 0)
    })
}

/// Puts a running entry back to pending, runnable again after `delay`.
pub fn reschedule(
    db: &Database,
    id: &str,
    error: &str,
    delay: Duration,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE task_queue SET state = ?2, last_error = ?3, available_at = ?4,
             lease_expires_at = NULL, claimed_by = NULL, updated_at = ?5
             WHERE id = ?1 AND state = 'running'",
            params![
                id,
                TaskState::Pending,
                error,
                timestamp_after(delay),
                now_timestamp()
            ],
        )?;
        Ok(changed > 0)
    })
}

/// True if the job already has a pending or running entry.
pub fn has_inflight_in(conn: &Connection, print_job_id: i64) -> Result<bool, DatabaseError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM task_queue
         WHERE print_job_id = ?1 AND state IN ('pending', 'running')",
        params![print_job_id],
        |r| r.get(0),
    )?;
    Ok(count > 0)
}

/// Counts entries by state, for status displays.
pub fn count_by_state(db: &Database, state: TaskState) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM task_queue WHERE state = ?1",
            params![state],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}
