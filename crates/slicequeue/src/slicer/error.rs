use thiserror::Error;

use crate::error::FailureKind;

#[derive(Error, Debug)]
pub enum SliceError {
    #[error("Slicing engine invocation failed: {0}")]
    EngineInvocationFailed(String),

    #[error("Slicing engine did not finish within {secs}s")]
    TimedOut { secs: u64 },

    #[error("Slicing engine exported no G-code: {detail}")]
    OutputNotFound { permanent: bool, detail: String },
}

impl SliceError {
    /// Only output matching a physical-limit pattern is permanent. Everything
    /// else may succeed on a later attempt.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::OutputNotFound {
                permanent: true, ..
            } => FailureKind::Permanent,
            _ => FailureKind::Transient,
        }
    }
}
