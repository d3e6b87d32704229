//! Test harness for isolated test execution.
//!
//! The `TestHarness` struct wires a complete slicing pipeline around a
//! scripted engine:
//! - In-memory database with a PLA material at 7 per gram
//! - Temporary media directory for uploads and G-code
//! - OrderService, JobQueue and Pipeline sharing that database
//! - Single-step execution of queued entries, or a real worker pool

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use slicequeue::config::RetryConfig;
use slicequeue::db::job_repo::PrintJobRow;
use slicequeue::db::queue_repo::{self, TaskRow};
use slicequeue::db::{material_repo, order_repo};
use slicequeue::order::service::{OrderSummary, PlacedOrder};
use slicequeue::{
    Database, GeometryStore, JobQueue, JobResult, NewOrder, OrderService, Pipeline,
    PipelineContext, PoolSettings, PricingPolicy, ShippingDetails, TaskStatus, Upload,
    WorkerPool,
};

use super::slicer::ScriptedSlicer;

pub const MAX_ATTEMPTS: u32 = 3;
const LEASE: Duration = Duration::from_secs(60);

pub struct TestHarness {
    pub temp_dir: TempDir,
    pub db: Database,
    pub slicer: Arc<ScriptedSlicer>,
    pub pipeline: Arc<Pipeline>,
    pub queue: JobQueue,
    pub service: OrderService,
    pub material_id: i64,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_max_attempts(MAX_ATTEMPTS)
    }

    pub fn with_max_attempts(max_attempts: u32) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db = Database::open_in_memory().expect("Failed to open database");
        let material_id = material_repo::insert(&db, "PLA", 7).expect("Failed to add material");

        let slicer = Arc::new(ScriptedSlicer::new());
        let pipeline = Arc::new(Pipeline::new(
            db.clone(),
            slicer.clone(),
            PricingPolicy::default(),
        ));
        let queue = JobQueue::new(db.clone(), max_attempts);
        let geometry = GeometryStore::new(db.clone(), temp_dir.path().join("media"));
        let service = OrderService::new(db.clone(), geometry, queue.clone());

        Self {
            temp_dir,
            db,
            slicer,
            pipeline,
            queue,
            service,
            material_id,
        }
    }

    /// Places a PLA order with one small upload per file name.
    pub fn place(&self, files: &[&str]) -> PlacedOrder {
        self.service
            .place_order(NewOrder {
                customer_id: 1,
                material_name: "PLA".to_string(),
                color: "red".to_string(),
                shipping: ShippingDetails::default(),
                uploads: files
                    .iter()
                    .map(|name| Upload {
                        filename: name.to_string(),
                        content: b"solid cube\nendsolid cube\n".to_vec(),
                    })
                    .collect(),
            })
            .expect("Failed to place order")
    }

    /// Claims the next runnable entry, runs it and stores the outcome, the
    /// way a worker would. Retries become due immediately.
    pub fn run_next(&self) -> Option<(TaskRow, JobResult)> {
        let task = self
            .queue
            .claim("test-worker", LEASE)
            .expect("Failed to claim")?;
        let (result, _ctx) = self.pipeline.run(PipelineContext::new(task.clone()));
        self.queue
            .finish(&task, &result, Duration::ZERO)
            .expect("Failed to finish");
        Some((task, result))
    }

    /// Runs the pipeline for one specific entry without claiming it, to fix
    /// the order in which sibling jobs complete.
    pub fn run_entry(&self, handle: &str) -> JobResult {
        let (result, _ctx) = self.pipeline.run(PipelineContext::new(self.task(handle)));
        result
    }

    /// Runs entries until the queue has nothing runnable.
    pub fn drain(&self) -> Vec<JobResult> {
        let mut results = Vec::new();
        while let Some((_, result)) = self.run_next() {
            results.push(result);
        }
        results
    }

    pub fn summary(&self, order_id: i64) -> OrderSummary {
        self.service
            .order_summary(order_id)
            .expect("Failed to load order")
    }

    /// The job whose stored upload name ends with `suffix`.
    pub fn job(&self, order_id: i64, suffix: &str) -> PrintJobRow {
        let summary = self.summary(order_id);
        summary
            .jobs
            .into_iter()
            .zip(summary.geometry)
            .find(|(_, path)| path_ends_with(path.as_deref(), suffix))
            .map(|(job, _)| job)
            .expect("No job for that upload")
    }

    /// Stored path of the order's upload whose name ends with `suffix`.
    pub fn path_of(&self, order_id: i64, suffix: &str) -> String {
        self.summary(order_id)
            .geometry
            .into_iter()
            .flatten()
            .find(|path| path_ends_with(Some(path.as_path()), suffix))
            .map(|path| path.to_string_lossy().to_string())
            .expect("No upload with that suffix")
    }

    pub fn task(&self, handle: &str) -> TaskRow {
        queue_repo::find_by_id(&self.db, handle)
            .expect("Failed to load entry")
            .expect("No entry for handle")
    }

    pub fn order_status(&self, order_id: i64) -> slicequeue::OrderStatus {
        order_repo::find_by_id(&self.db, order_id)
            .expect("Failed to load order")
            .expect("Order missing")
            .status
    }

    pub fn pool_settings(&self, workers: usize) -> PoolSettings {
        PoolSettings {
            worker_count: workers,
            poll_interval: Duration::from_millis(20),
            lease: LEASE,
            retry: RetryConfig {
                max_attempts: MAX_ATTEMPTS,
                base_delay_ms: 10,
                max_delay_ms: 50,
            },
        }
    }

    pub fn start_pool(&self, workers: usize) -> WorkerPool {
        WorkerPool::new(
            self.queue.clone(),
            Arc::clone(&self.pipeline),
            self.pool_settings(workers),
        )
        .expect("Failed to start pool")
    }

    /// Polls until every handle is settled or the deadline passes.
    pub fn wait_for(&self, handles: &[String], timeout: Duration) -> Vec<TaskStatus> {
        let deadline = Instant::now() + timeout;
        loop {
            let statuses: Vec<TaskStatus> = handles
                .iter()
                .map(|h| {
                    self.queue
                        .get_status(h)
                        .expect("Failed to read status")
                        .expect("Unknown handle")
                })
                .collect();
            if statuses.iter().all(|s| s.ready) || Instant::now() >= deadline {
                return statuses;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}

fn path_ends_with(path: Option<&Path>, suffix: &str) -> bool {
    path.is_some_and(|p| p.to_string_lossy().ends_with(suffix))
}
