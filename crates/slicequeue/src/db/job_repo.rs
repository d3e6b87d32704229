//! Print job repository: one row per uploaded geometry file in an order.
//!
//! Worker writes go through [`record_estimate`] and [`record_permanent_failure`];
//! each is a single transaction scoped to one job (plus its order for the
//! failure case), and both are safe to repeat.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use super::{now_timestamp, order_repo, Database, DatabaseError};
use crate::order::OrderStatus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrintJobRow {
    pub id: i64,
    pub order_id: i64,
    pub file_id: i64,
    pub material_id: i64,
    pub color: Option<String>,
    /// Seconds of machine time.
    pub estimated_time: Option<i64>,
    /// Minor currency units.
    pub estimated_cost: Option<i64>,
    pub gcode_path: Option<String>,
    pub error: Option<String>,
    pub updated_at: String,
}

impl PrintJobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            order_id: row.get("order_id")?,
            file_id: row.get("file_id")?,
            material_id: row.get("material_id")?,
            color: row.get("color")?,
            estimated_time: row.get("estimated_time")?,
            estimated_cost: row.get("estimated_cost")?,
            gcode_path: row.get("gcode_path")?,
            error: row.get("error")?,
            updated_at: row.get("updated_at")?,
        })
    }

    /// True until the job has an estimate or a recorded permanent failure.
    pub fn is_pending(&self) -> bool {
        self.estimated_cost.is_none() && self.error.is_none()
    }
}

/// A successful slice, ready to be written back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobEstimate {
    pub estimated_time: i64,
    pub estimated_cost: i64,
    pub gcode_path: String,
}

/// Result of writing a successful estimate back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstimateWrite {
    Stored,
    JobMissing,
    /// Nothing written. The order has shipped or finished, or this job's own
    /// permanent failure cancelled it.
    Refused { order_id: i64, status: OrderStatus },
}

/// What a permanent failure did to the job and its parent order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureRecorded {
    /// Error stored and the order cancelled by this write.
    OrderCancelled { order_id: i64 },
    /// Error stored; the order had already been cancelled.
    AlreadyCancelled { order_id: i64 },
    /// Nothing written: the order shipped or finished first.
    OrderFulfilled { order_id: i64, status: OrderStatus },
}

/// Parent order and whether the job carries an error, read inside the
/// caller's transaction.
fn job_state_in(
    conn: &Connection,
    job_id: i64,
) -> Result<Option<(i64, OrderStatus, bool)>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT print_jobs.order_id, orders.status, print_jobs.error IS NOT NULL
             FROM print_jobs JOIN orders ON orders.id = print_jobs.order_id
             WHERE print_jobs.id = ?1",
            params![job_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?)
}

pub fn insert_in(
    conn: &Connection,
    order_id: i64,
    file_id: i64,
    material_id: i64,
    color: Option<&str>,
) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO print_jobs (order_id, file_id, material_id, color, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![order_id, file_id, material_id, color, now_timestamp()],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn find_by_id(db: &Database, id: i64) -> Result<Option<PrintJobRow>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT * FROM print_jobs WHERE id = ?1",
                params![id],
                PrintJobRow::from_row,
            )
            .optional()?)
    })
}

/// Finds the job that owns the geometry file stored at `full_path`.
pub fn find_by_file_path(
    db: &Database,
    full_path: &str,
) -> Result<Option<PrintJobRow>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT print_jobs.* FROM print_jobs
                 JOIN files ON files.id = print_jobs.file_id
                 WHERE files.full_path = ?1",
                params![full_path],
                PrintJobRow::from_row,
            )
            .optional()?)
    })
}

pub fn list_for_order_in(
    conn: &Connection,
    order_id: i64,
) -> Result<Vec<PrintJobRow>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM print_jobs WHERE order_id = ?1 ORDER BY id")?;
    let rows = stmt
        .query_map(params![order_id], PrintJobRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn list_for_order(db: &Database, order_id: i64) -> Result<Vec<PrintJobRow>, DatabaseError> {
    db.with_conn(|conn| list_for_order_in(conn, order_id))
}

/// Writes a successful estimate. Time and cost land together; any error left
/// by an earlier transient attempt is cleared. Overwriting with the same
/// values is a no-op in effect, so redelivered jobs cannot double-charge.
///
/// Refused for a fulfilled order, and for a job whose recorded failure
/// cancelled its order: that error is the reason the order is cancelled.
pub fn record_estimate(
    db: &Database,
    job_id: i64,
    estimate: &JobEstimate,
) -> Result<EstimateWrite, DatabaseError> {
    db.with_transaction(|conn| {
        let Some((order_id, status, has_error)) = job_state_in(conn, job_id)? else {
            return Ok(EstimateWrite::JobMissing);
        };
        if status.is_fulfilled() || (status == OrderStatus::Cancelled && has_error) {
            return Ok(EstimateWrite::Refused { order_id, status });
        }

        conn.execute(
            "UPDATE print_jobs SET estimated_time = ?2, estimated_cost = ?3, gcode_path = ?4,
             error = NULL, updated_at = ?5 WHERE id = ?1",
            params![
                job_id,
                estimate.estimated_time,
                estimate.estimated_cost,
                estimate.gcode_path,
                now_timestamp(),
            ],
        )?;
        order_repo::refresh_estimated_cost_in(conn, order_id)?;
        Ok(EstimateWrite::Stored)
    })
}

/// Records an unprintable model: stores the error on the job, clears any
/// estimate, and cancels the parent order, all in one transaction. A shipped
/// or finished order is left exactly as it is.
pub fn record_permanent_failure(
    db: &Database,
    job_id: i64,
    error: &str,
) -> Result<Option<FailureRecorded>, DatabaseError> {
    db.with_transaction(|conn| {
        let Some((order_id, status, _)) = job_state_in(conn, job_id)? else {
            return Ok(None);
        };
        if status.is_fulfilled() {
            return Ok(Some(FailureRecorded::OrderFulfilled { order_id, status }));
        }

        conn.execute(
            "UPDATE print_jobs SET error = ?2, estimated_time = NULL, estimated_cost = NULL,
             gcode_path = NULL, updated_at = ?3 WHERE id = ?1",
            params![job_id, error, now_timestamp()],
        )?;
        let cancelled = order_repo::transition_in(conn, order_id, OrderStatus::Cancelled)?;
        order_repo::refresh_estimated_cost_in(conn, order_id)?;

        Ok(Some(if cancelled {
            FailureRecorded::OrderCancelled { order_id }
        } else {
            FailureRecorded::AlreadyCancelled { order_id }
        }))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::order_repo::ShippingDetails;
    use crate::db::{file_repo, material_repo};

    struct Fixture {
        db: Database,
        order_id: i64,
        job_ids: Vec<i64>,
    }

    fn fixture(jobs: usize) -> Fixture {
        let db = Database::open_in_memory().unwrap();
        let material_id = material_repo::insert(&db, "PLA", 7).unwrap();
        let (order_id, job_ids) = db
            .with_transaction(|conn| {
                let order_id = order_repo::insert_in(conn, 1, &ShippingDetails::default())?;
                let mut ids = Vec::new();
                for i in 0..jobs {
                    let file_id = file_repo::insert_in(conn, &format!("/media/part-{}.stl", i))?;
                    ids.push(insert_in(conn, order_id, file_id, material_id, Some("red"))?);
                }
                Ok::<_, DatabaseError>((order_id, ids))
            })
            .unwrap();
        Fixture {
            db,
            order_id,
            job_ids,
        }
    }

    fn estimate(cost: i64) -> JobEstimate {
        JobEstimate {
            estimated_time: 8130,
            estimated_cost: cost,
            gcode_path: "/media/part.gcode".to_string(),
        }
    }

    #[test]
    fn test_new_job_is_pending() {
        let f = fixture(1);
        let job = find_by_id(&f.db, f.job_ids[0]).unwrap().unwrap();
        assert!(job.is_pending());
        assert_eq!(job.color.as_deref(), Some("red"));
        assert!(job.estimated_time.is_none());
        assert!(job.error.is_none());
    }

    #[test]
    fn test_find_by_file_path() {
        let f = fixture(2);
        let job = find_by_file_path(&f.db, "/media/part-1.stl")
            .unwrap()
            .unwrap();
        assert_eq!(job.id, f.job_ids[1]);
        assert!(find_by_file_path(&f.db, "/media/missing.stl")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_record_estimate_is_idempotent() {
        let f = fixture(1);
        let stored = EstimateWrite::Stored;
        assert_eq!(record_estimate(&f.db, f.job_ids[0], &estimate(541)).unwrap(), stored);
        let first = find_by_id(&f.db, f.job_ids[0]).unwrap().unwrap();
        assert_eq!(record_estimate(&f.db, f.job_ids[0], &estimate(541)).unwrap(), stored);
        let second = find_by_id(&f.db, f.job_ids[0]).unwrap().unwrap();

        assert_eq!(first.estimated_cost, Some(541));
        assert_eq!(second.estimated_cost, Some(541));
        assert_eq!(second.estimated_time, Some(8130));
        assert_eq!(list_for_order(&f.db, f.order_id).unwrap().len(), 1);

        let order = order_repo::find_by_id(&f.db, f.order_id).unwrap().unwrap();
        assert_eq!(order.estimated_cost, Some(541));
    }

    #[test]
    fn test_record_estimate_for_missing_job() {
        let f = fixture(0);
        assert_eq!(
            record_estimate(&f.db, 999, &estimate(1)).unwrap(),
            EstimateWrite::JobMissing
        );
    }

    #[test]
    fn test_permanent_failure_cancels_order_atomically() {
        let f = fixture(2);
        let recorded = record_permanent_failure(&f.db, f.job_ids[1], "exceeds build volume")
            .unwrap()
            .unwrap();
        assert_eq!(
            recorded,
            FailureRecorded::OrderCancelled {
                order_id: f.order_id
            }
        );

        let job = find_by_id(&f.db, f.job_ids[1]).unwrap().unwrap();
        assert_eq!(job.error.as_deref(), Some("exceeds build volume"));
        assert!(job.estimated_cost.is_none());

        let order = order_repo::find_by_id(&f.db, f.order_id).unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Cancelled);
    }

    #[test]
    fn test_permanent_failure_clears_previous_estimate() {
        let f = fixture(1);
        record_estimate(&f.db, f.job_ids[0], &estimate(541)).unwrap();
        record_permanent_failure(&f.db, f.job_ids[0], "too tall").unwrap();

        let job = find_by_id(&f.db, f.job_ids[0]).unwrap().unwrap();
        assert!(job.estimated_time.is_none());
        assert!(job.estimated_cost.is_none());
        assert!(job.gcode_path.is_none());
        assert!(!job.is_pending());
    }

    #[test]
    fn test_second_permanent_failure_keeps_order_cancelled() {
        let f = fixture(2);
        record_permanent_failure(&f.db, f.job_ids[0], "too tall").unwrap();
        let second = record_permanent_failure(&f.db, f.job_ids[1], "too wide")
            .unwrap()
            .unwrap();
        assert_eq!(
            second,
            FailureRecorded::AlreadyCancelled {
                order_id: f.order_id
            }
        );

        let order = order_repo::find_by_id(&f.db, f.order_id).unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Cancelled);
    }

    #[test]
    fn test_success_cannot_erase_cancelling_error() {
        let f = fixture(1);
        record_permanent_failure(&f.db, f.job_ids[0], "could not fit on the bed").unwrap();

        let write = record_estimate(&f.db, f.job_ids[0], &estimate(541)).unwrap();
        assert_eq!(
            write,
            EstimateWrite::Refused {
                order_id: f.order_id,
                status: OrderStatus::Cancelled
            }
        );

        let job = find_by_id(&f.db, f.job_ids[0]).unwrap().unwrap();
        assert_eq!(job.error.as_deref(), Some("could not fit on the bed"));
        assert!(job.estimated_cost.is_none());
    }

    #[test]
    fn test_sibling_estimate_lands_on_cancelled_order() {
        let f = fixture(2);
        record_permanent_failure(&f.db, f.job_ids[0], "too tall").unwrap();

        let write = record_estimate(&f.db, f.job_ids[1], &estimate(541)).unwrap();
        assert_eq!(write, EstimateWrite::Stored);

        let order = order_repo::find_by_id(&f.db, f.order_id).unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Cancelled);
        assert!(order.estimated_cost.is_none());
    }

    fn shipped(jobs: usize) -> Fixture {
        let f = fixture(jobs);
        for id in &f.job_ids {
            record_estimate(&f.db, *id, &estimate(541)).unwrap();
        }
        assert!(order_repo::transition(&f.db, f.order_id, OrderStatus::InProgress).unwrap());
        assert!(order_repo::transition(&f.db, f.order_id, OrderStatus::Shipped).unwrap());
        f
    }

    #[test]
    fn test_permanent_failure_leaves_shipped_order_untouched() {
        let f = shipped(1);

        let recorded = record_permanent_failure(&f.db, f.job_ids[0], "could not fit on the bed")
            .unwrap()
            .unwrap();
        assert_eq!(
            recorded,
            FailureRecorded::OrderFulfilled {
                order_id: f.order_id,
                status: OrderStatus::Shipped
            }
        );

        let job = find_by_id(&f.db, f.job_ids[0]).unwrap().unwrap();
        assert_eq!(job.estimated_cost, Some(541));
        assert!(job.error.is_none());

        let order = order_repo::find_by_id(&f.db, f.order_id).unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Shipped);
        assert_eq!(order.estimated_cost, Some(541));
    }

    #[test]
    fn test_estimate_refused_after_fulfillment() {
        let f = shipped(1);
        let write = record_estimate(&f.db, f.job_ids[0], &estimate(9999)).unwrap();
        assert!(matches!(write, EstimateWrite::Refused { status: OrderStatus::Shipped, .. }));

        let job = find_by_id(&f.db, f.job_ids[0]).unwrap().unwrap();
        assert_eq!(job.estimated_cost, Some(541));
    }
}
