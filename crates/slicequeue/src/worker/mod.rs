pub mod job;
pub mod pool;
pub mod queue;

pub use job::{JobResult, TaskStatus};
pub use pool::{PoolSettings, WorkerPool};
pub use queue::JobQueue;

// The CLI builds its Ctrl+C channel with the same crate.
pub use crossbeam_channel;
