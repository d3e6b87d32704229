use serde::{Deserialize, Serialize};

use crate::db::queue_repo::{TaskRow, TaskState};
use crate::error::FailureKind;

/// Outcome of one pipeline attempt, stored as JSON on the queue entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobResult {
    Sliced {
        print_job_id: i64,
        gcode_path: String,
        /// Seconds.
        estimated_time: i64,
        estimated_cost: i64,
    },
    Failed {
        kind: FailureKind,
        error: String,
    },
}

impl JobResult {
    pub fn failed(kind: FailureKind, error: impl Into<String>) -> Self {
        Self::Failed {
            kind,
            error: error.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Sliced { .. })
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Sliced { .. } => None,
            Self::Failed { kind, .. } => Some(*kind),
        }
    }
}

/// What a caller holding a job handle can see.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskStatus {
    pub ready: bool,
    /// `None` until the entry is ready.
    pub successful: Option<bool>,
    pub result: Option<JobResult>,
}

impl TaskStatus {
    pub fn from_row(row: &TaskRow) -> Result<Self, serde_json::Error> {
        let ready = row.state.is_terminal();
        let result = match (&row.result, ready) {
            (Some(json), true) => Some(serde_json::from_str(json)?),
            _ => None,
        };
        Ok(Self {
            ready,
            successful: ready.then_some(row.state == TaskState::Succeeded),
            result,
        })
    }
}
