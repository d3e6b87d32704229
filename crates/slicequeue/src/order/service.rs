//! Order placement and lifecycle operations.
//!
//! Every operation that touches more than one row runs in a single
//! transaction. Queue notifications and file removal happen only after the
//! commit, so workers never see half-written orders.

use std::path::PathBuf;

use log::info;
use serde::Serialize;

use crate::db::job_repo::{self, PrintJobRow};
use crate::db::order_repo::{self, OrderRow, ShippingDetails};
use crate::db::{file_repo, material_repo, queue_repo, Database};
use crate::geometry::GeometryStore;
use crate::worker::JobQueue;

use super::{OrderError, OrderStatus};

/// One uploaded model file.
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct NewOrder {
    pub customer_id: i64,
    pub material_name: String,
    pub color: String,
    pub shipping: ShippingDetails,
    pub uploads: Vec<Upload>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlacedOrder {
    pub order_id: i64,
    pub print_job_ids: Vec<i64>,
    /// Queue handles, in the same order as `print_job_ids`.
    pub handles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderSummary {
    pub order: OrderRow,
    pub jobs: Vec<PrintJobRow>,
    /// Stored geometry of each job, in the same order as `jobs`.
    pub geometry: Vec<Option<PathBuf>>,
}

impl OrderSummary {
    pub fn pending_jobs(&self) -> usize {
        self.jobs.iter().filter(|j| j.is_pending()).count()
    }
}

pub struct OrderService {
    db: Database,
    geometry: GeometryStore,
    queue: JobQueue,
}

impl OrderService {
    pub fn new(db: Database, geometry: GeometryStore, queue: JobQueue) -> Self {
        Self {
            db,
            geometry,
            queue,
        }
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// Stores the uploads, then creates the order, its files, jobs and queue
    /// entries in one transaction. Written files are removed again if the
    /// transaction fails.
    pub fn place_order(&self, order: NewOrder) -> Result<PlacedOrder, OrderError> {
        if order.uploads.is_empty() {
            return Err(OrderError::NoModels);
        }
        let material = material_repo::find_by_name(&self.db, &order.material_name)?
            .ok_or_else(|| OrderError::UnknownMaterial(order.material_name.clone()))?;

        let mut paths = Vec::with_capacity(order.uploads.len());
        for upload in &order.uploads {
            match self.geometry.write_upload(
                &upload.filename,
                &material.name,
                &order.color,
                &upload.content,
            ) {
                Ok(path) => paths.push(path),
                Err(e) => {
                    self.geometry.remove_files(&paths);
                    return Err(e.into());
                }
            }
        }

        let placed: Result<PlacedOrder, OrderError> = self.db.with_transaction(|conn| {
            let order_id = order_repo::insert_in(conn, order.customer_id, &order.shipping)?;
            let mut print_job_ids = Vec::with_capacity(paths.len());
            let mut handles = Vec::with_capacity(paths.len());

            for path in &paths {
                let full_path = path.to_string_lossy();
                let file_id = file_repo::insert_in(conn, &full_path)?;
                let job_id = job_repo::insert_in(
                    conn,
                    order_id,
                    file_id,
                    material.id,
                    Some(order.color.as_str()),
                )?;
                handles.push(self.queue.submit_in(conn, job_id, &full_path, material.id)?);
                print_job_ids.push(job_id);
            }

            Ok(PlacedOrder {
                order_id,
                print_job_ids,
                handles,
            })
        });

        match placed {
            Ok(placed) => {
                for _ in &placed.handles {
                    self.queue.notify();
                }
                info!(
                    "Order {} placed with {} model(s) in {}",
                    placed.order_id,
                    placed.handles.len(),
                    material.name
                );
                Ok(placed)
            }
            Err(e) => {
                self.geometry.remove_files(&paths);
                Err(e)
            }
        }
    }

    /// Queues a fresh slice for every job of the order. Jobs that already
    /// have a pending or running entry are skipped; no job rows are created.
    pub fn retry_order(&self, order_id: i64) -> Result<Vec<String>, OrderError> {
        let handles: Result<Vec<String>, OrderError> = self.db.with_transaction(|conn| {
            let order = order_repo::find_by_id_in(conn, order_id)?
                .ok_or(OrderError::NotFound(order_id))?;
            if matches!(
                order.status,
                OrderStatus::Cancelled | OrderStatus::Shipped | OrderStatus::Finished
            ) {
                return Err(OrderError::NotRetryable {
                    id: order_id,
                    status: order.status,
                });
            }

            let mut handles = Vec::new();
            for job in job_repo::list_for_order_in(conn, order_id)? {
                if queue_repo::has_inflight_in(conn, job.id)? {
                    continue;
                }
                let Some(file) = file_repo::find_by_id_in(conn, job.file_id)? else {
                    continue;
                };
                handles.push(self.queue.submit_in(
                    conn,
                    job.id,
                    &file.full_path,
                    job.material_id,
                )?);
            }
            Ok(handles)
        });

        let handles = handles?;
        for _ in &handles {
            self.queue.notify();
        }
        info!("Order {} retried: {} job(s) requeued", order_id, handles.len());
        Ok(handles)
    }

    pub fn mark_shipped(&self, order_id: i64) -> Result<OrderRow, OrderError> {
        self.advance(order_id, OrderStatus::Shipped)
    }

    pub fn mark_finished(&self, order_id: i64) -> Result<OrderRow, OrderError> {
        self.advance(order_id, OrderStatus::Finished)
    }

    fn advance(&self, order_id: i64, target: OrderStatus) -> Result<OrderRow, OrderError> {
        let updated: Result<OrderRow, OrderError> = self.db.with_transaction(|conn| {
            let order = order_repo::find_by_id_in(conn, order_id)?
                .ok_or(OrderError::NotFound(order_id))?;
            if !order.status.can_transition_to(target) {
                return Err(OrderError::InvalidTransition {
                    from: order.status,
                    to: target,
                });
            }
            // The status is valid, so a refused update means unestimated jobs.
            if !order_repo::transition_in(conn, order_id, target)? {
                return Err(OrderError::PendingJobs(order_id));
            }
            order_repo::find_by_id_in(conn, order_id)?.ok_or(OrderError::NotFound(order_id))
        });

        let updated = updated?;
        info!("Order {} is now {}", order_id, updated.status);
        Ok(updated)
    }

    /// Deletes the order with its jobs, queue entries and file records, then
    /// removes the geometry and G-code files from disk.
    pub fn delete_order(&self, order_id: i64) -> Result<(), OrderError> {
        let paths: Result<Vec<PathBuf>, OrderError> = self.db.with_transaction(|conn| {
            if order_repo::find_by_id_in(conn, order_id)?.is_none() {
                return Err(OrderError::NotFound(order_id));
            }

            let jobs = job_repo::list_for_order_in(conn, order_id)?;
            let mut paths = Vec::new();
            for job in &jobs {
                if let Some(file) = file_repo::find_by_id_in(conn, job.file_id)? {
                    paths.push(PathBuf::from(file.full_path));
                }
                if let Some(gcode) = &job.gcode_path {
                    paths.push(PathBuf::from(gcode));
                }
            }

            // Jobs and their queue entries go with the order.
            order_repo::delete_in(conn, order_id)?;
            for job in &jobs {
                file_repo::delete_in(conn, job.file_id)?;
            }
            Ok(paths)
        });

        let paths = paths?;
        let failed = self.geometry.remove_files(&paths);
        info!(
            "Deleted order {} ({} of {} files removed)",
            order_id,
            paths.len() - failed.len(),
            paths.len()
        );
        Ok(())
    }

    pub fn order_summary(&self, order_id: i64) -> Result<OrderSummary, OrderError> {
        let order =
            order_repo::find_by_id(&self.db, order_id)?.ok_or(OrderError::NotFound(order_id))?;
        let jobs = job_repo::list_for_order(&self.db, order_id)?;
        let geometry = jobs
            .iter()
            .map(|job| self.geometry.resolve(job.file_id))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(OrderSummary {
            order,
            jobs,
            geometry,
        })
    }
}
