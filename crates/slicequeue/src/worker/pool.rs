use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info};

use crate::config::{Config, RetryConfig};
use crate::db::queue_repo::TaskRow;
use crate::error::{FailureKind, WorkerError};
use crate::pipeline::{Pipeline, PipelineContext};
use crate::worker::job::JobResult;
use crate::worker::queue::JobQueue;

#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub worker_count: usize,
    /// Longest an idle worker sleeps before checking the queue again.
    pub poll_interval: Duration,
    pub lease: Duration,
    pub retry: RetryConfig,
}

impl PoolSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            worker_count: config.worker_count,
            poll_interval: config.queue.poll_interval(),
            lease: config.queue.lease(),
            retry: config.retry.clone(),
        }
    }
}

pub struct WorkerPool {
    wake_sender: Sender<()>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    pub fn new(
        queue: JobQueue,
        pipeline: Arc<Pipeline>,
        settings: PoolSettings,
    ) -> Result<Self, WorkerError> {
        if settings.worker_count == 0 {
            return Err(WorkerError::SpawnFailed(
                "worker_count must be > 0".to_string(),
            ));
        }

        let (wake_sender, wake_receiver) = bounded::<()>(settings.worker_count);
        let shutdown = Arc::new(AtomicBool::new(false));
        let settings = Arc::new(settings);

        let mut workers = Vec::with_capacity(settings.worker_count);

        for worker_id in 0..settings.worker_count {
            let worker = Worker {
                id: worker_id,
                name: format!("worker-{}-{}", std::process::id(), worker_id),
                queue: queue.clone(),
                pipeline: Arc::clone(&pipeline),
                wake: wake_receiver.clone(),
                shutdown: Arc::clone(&shutdown),
                settings: Arc::clone(&settings),
            };

            let spawned = thread::Builder::new()
                .name(format!("slicequeue-worker-{}", worker_id))
                .spawn(move || worker.run());

            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    shutdown.store(true, Ordering::Relaxed);
                    return Err(WorkerError::SpawnFailed(e.to_string()));
                }
            }
        }

        info!("Started {} workers", settings.worker_count);

        Ok(Self {
            wake_sender,
            workers,
            shutdown,
        })
    }

    /// Sender for waking idle workers. Attach it to submitting queues with
    /// [`JobQueue::with_notifier`].
    pub fn notifier(&self) -> Sender<()> {
        self.wake_sender.clone()
    }

    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Stops the pool and joins every worker. A worker mid-job finishes that
    /// job first.
    pub fn wait(self) {
        self.shutdown.store(true, Ordering::Relaxed);
        drop(self.wake_sender);

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

struct Worker {
    id: usize,
    name: String,
    queue: JobQueue,
    pipeline: Arc<Pipeline>,
    wake: Receiver<()>,
    shutdown: Arc<AtomicBool>,
    settings: Arc<PoolSettings>,
}

impl Worker {
    fn run(self) {
        debug!("Worker {} started", self.id);

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                debug!("Worker {} received shutdown signal", self.id);
                break;
            }

            match self.queue.claim(&self.name, self.settings.lease) {
                Ok(Some(task)) => {
                    self.process(task);
                    // Drain before sleeping again.
                    continue;
                }
                Ok(None) => {}
                Err(e) => error!("Worker {} failed to claim work: {}", self.id, e),
            }

            match self.wake.recv_timeout(self.settings.poll_interval) {
                Ok(()) | Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("Worker {} wake channel disconnected", self.id);
                    break;
                }
            }
        }

        debug!("Worker {} stopped", self.id);
    }

    fn process(&self, task: TaskRow) {
        debug!(
            "Worker {} processing {} (attempt {}/{})",
            self.id, task.file_path, task.attempts, task.max_attempts
        );

        let ctx = PipelineContext::new(task.clone());
        let result = match panic::catch_unwind(AssertUnwindSafe(|| self.pipeline.run(ctx))) {
            Ok((result, _ctx)) => result,
            Err(_) => {
                error!("Worker {} panicked while processing {}", self.id, task.id);
                JobResult::failed(FailureKind::Transient, "worker panicked during slicing")
            }
        };

        let delay = self.settings.retry.backoff(task.attempts);
        if let Err(e) = self.queue.finish(&task, &result, delay) {
            // The lease runs out and the entry is redelivered.
            error!(
                "Worker {} failed to store outcome of {}: {}",
                self.id, task.id, e
            );
        }
    }
}
