use std::time::Duration;

use crossbeam_channel::Sender;
use log::{debug, error};
use rusqlite::Connection;

use crate::db::queue_repo::{self, NewTask, TaskRow};
use crate::db::{job_repo, Database, DatabaseError};
use crate::error::{FailureKind, WorkerError};

use super::job::{JobResult, TaskStatus};

/// Handle on the durable queue for submitters and workers.
///
/// Submissions only insert a row; idle workers are woken through the
/// optional notifier, and otherwise find the row on their next poll.
#[derive(Clone)]
pub struct JobQueue {
    db: Database,
    max_attempts: u32,
    notifier: Option<Sender<()>>,
}

impl JobQueue {
    pub fn new(db: Database, max_attempts: u32) -> Self {
        Self {
            db,
            max_attempts,
            notifier: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Sender<()>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Enqueues a slice of the geometry at `file_path` and returns the job
    /// handle. Returns as soon as the row is committed.
    pub fn submit(&self, file_path: &str, material_id: i64) -> Result<String, WorkerError> {
        let print_job_id = job_repo::find_by_file_path(&self.db, file_path)?.map(|j| j.id);
        let handle = self.db.with_conn(|conn| {
            queue_repo::enqueue_in(
                conn,
                &NewTask {
                    print_job_id,
                    file_path,
                    material_id,
                    max_attempts: self.max_attempts,
                },
            )
        })?;
        debug!("Queued {} as {}", file_path, handle);
        self.notify();
        Ok(handle)
    }

    /// Enqueues inside the caller's transaction. The caller must call
    /// [`JobQueue::notify`] after committing.
    pub fn submit_in(
        &self,
        conn: &Connection,
        print_job_id: i64,
        file_path: &str,
        material_id: i64,
    ) -> Result<String, DatabaseError> {
        queue_repo::enqueue_in(
            conn,
            &NewTask {
                print_job_id: Some(print_job_id),
                file_path,
                material_id,
                max_attempts: self.max_attempts,
            },
        )
    }

    /// Wakes one idle worker. A full channel already has a wake-up pending.
    pub fn notify(&self) {
        if let Some(notifier) = &self.notifier {
            let _ = notifier.try_send(());
        }
    }

    pub fn get_status(&self, handle: &str) -> Result<Option<TaskStatus>, WorkerError> {
        let Some(row) = queue_repo::find_by_id(&self.db, handle)? else {
            return Ok(None);
        };
        let status = TaskStatus::from_row(&row).map_err(DatabaseError::from)?;
        Ok(Some(status))
    }

    pub fn claim(&self, worker: &str, lease: Duration) -> Result<Option<TaskRow>, WorkerError> {
        Ok(queue_repo::claim_next(&self.db, worker, lease)?)
    }

    /// Stores the outcome of an attempt. Transient failures with attempts
    /// left are rescheduled after `retry_delay`; everything else is final.
    pub fn finish(
        &self,
        task: &TaskRow,
        result: &JobResult,
        retry_delay: Duration,
    ) -> Result<(), WorkerError> {
        let payload = serde_json::to_string(result).map_err(DatabaseError::from)?;

        let applied = match result {
            JobResult::Sliced { .. } => queue_repo::mark_succeeded(&self.db, &task.id, &payload)?,
            JobResult::Failed { kind, error: message } => {
                if kind.is_retryable() && task.attempts < task.max_attempts {
                    debug!(
                        "Retrying {} in {:?} (attempt {}/{})",
                        task.id, retry_delay, task.attempts, task.max_attempts
                    );
                    queue_repo::reschedule(&self.db, &task.id, message, retry_delay)?
                } else {
                    if *kind == FailureKind::Transient {
                        error!(
                            "Giving up on {} ({}) after {} attempts: {}",
                            task.id, task.file_path, task.attempts, message
                        );
                    }
                    let message = match kind {
                        FailureKind::Transient => {
                            format!("gave up after {} attempts: {}", task.attempts, message)
                        }
                        _ => message.clone(),
                    };
                    queue_repo::mark_failed(&self.db, &task.id, kind.as_str(), &message, &payload)?
                }
            }
        };

        if !applied {
            debug!("Queue entry {} was already settled", task.id);
        }
        Ok(())
    }
}
