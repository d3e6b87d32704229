use thiserror::Error;

use crate::db::DatabaseError;
use crate::error::FailureKind;
use crate::order::OrderStatus;
use crate::report::ReportError;
use crate::slicer::SliceError;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("No print job owns geometry file '{0}'")]
    JobNotFound(String),

    #[error("Queue entry names print job {queued} but '{path}' belongs to job {found}")]
    JobMismatch {
        queued: i64,
        found: i64,
        path: String,
    },

    #[error("Material {0} does not exist")]
    MaterialNotFound(i64),

    #[error("Order {order_id} is {status}; print job {print_job_id} is closed to new results")]
    OrderClosed {
        order_id: i64,
        print_job_id: i64,
        status: OrderStatus,
    },

    #[error(transparent)]
    Slice(#[from] SliceError),

    #[error("Slice report unparseable: {0}")]
    ReportUnparseable(#[from] ReportError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

impl PipelineError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::JobNotFound(_)
            | Self::JobMismatch { .. }
            | Self::MaterialNotFound(_)
            | Self::OrderClosed { .. } => FailureKind::Invariant,
            Self::Slice(e) => e.kind(),
            Self::ReportUnparseable(_) | Self::Database(_) => FailureKind::Transient,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::ReportField;

    #[test]
    fn test_missing_rows_are_invariant_failures() {
        assert_eq!(
            PipelineError::JobNotFound("/m/a.stl".into()).kind(),
            FailureKind::Invariant
        );
        assert_eq!(
            PipelineError::MaterialNotFound(3).kind(),
            FailureKind::Invariant
        );
    }

    #[test]
    fn test_closed_order_is_not_retried() {
        let err = PipelineError::OrderClosed {
            order_id: 4,
            print_job_id: 9,
            status: OrderStatus::Shipped,
        };
        assert_eq!(err.kind(), FailureKind::Invariant);
        assert_eq!(
            err.to_string(),
            "Order 4 is SHIPPED; print job 9 is closed to new results"
        );
    }

    #[test]
    fn test_unparseable_report_is_transient() {
        let err = PipelineError::from(ReportError::MissingField(ReportField::FilamentMass));
        assert_eq!(err.kind(), FailureKind::Transient);
        assert!(err.to_string().contains("total filament used [g]"));
    }

    #[test]
    fn test_slice_kind_passes_through() {
        let err = PipelineError::from(SliceError::OutputNotFound {
            permanent: true,
            detail: "too tall".into(),
        });
        assert_eq!(err.kind(), FailureKind::Permanent);
    }
}
