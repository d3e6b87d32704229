pub mod config;
pub mod db;
pub mod error;
pub mod geometry;
pub mod logging;
pub mod order;
pub mod pipeline;
pub mod pricing;
pub mod report;
pub mod sanitize;
pub mod slicer;
pub mod worker;

pub use config::{load_config, Config, LogFormat};
pub use db::{Database, DatabaseError};
pub use error::{ConfigError, FailureKind, Result, SliceQueueError, StorageError, WorkerError};
pub use geometry::GeometryStore;
pub use order::{NewOrder, OrderError, OrderService, OrderStatus, ShippingDetails, Upload};
pub use pipeline::{Pipeline, PipelineContext, PipelineError};
pub use pricing::{estimate, PricingPolicy, TIME_RATE};
pub use report::{parse_report, ReportError, SliceEstimate};
pub use slicer::{CommandSlicer, SliceError, SliceOutput, Slicer};
pub use worker::{JobQueue, JobResult, PoolSettings, TaskStatus, WorkerPool};
