use thiserror::Error;

use crate::db::DatabaseError;
use crate::error::StorageError;

use super::OrderStatus;

#[derive(Error, Debug)]
pub enum OrderError {
    #[error("Order {0} not found")]
    NotFound(i64),

    #[error("No such material '{0}'")]
    UnknownMaterial(String),

    #[error("An order needs at least one model file")]
    NoModels,

    #[error("Order cannot move from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("Order {0} still has jobs without an estimate")]
    PendingJobs(i64),

    #[error("Order {id} is {status} and cannot be retried")]
    NotRetryable { id: i64, status: OrderStatus },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}
