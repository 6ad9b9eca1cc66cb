use std::sync::Arc;

use cadence_core::JobId;
use thiserror::Error;

/// Errors surfaced synchronously by the scheduler API.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// No job with the given ID exists in the store.
    #[error("Job not found: {id}")]
    JobNotFound { id: JobId },

    /// The caller asked for a result type the job never declared.
    #[error("Result type mismatch for job {id}: job declared {declared}, but caller expects {requested}")]
    TypeMismatch {
        id: JobId,
        declared: &'static str,
        requested: &'static str,
    },

    /// The recurrence mode is recognised but cannot be executed.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// A job definition or recurrence is missing or carries an invalid field.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The execution line finished without recording any result.
    #[error("Result not available for job: {id}")]
    NoResult { id: JobId },

    /// The scheduler was created outside of a Tokio runtime.
    #[error("No Tokio runtime available: {0}")]
    NoRuntime(String),

    /// A blocking await was attempted where the thread cannot block.
    #[error("Cannot block on job result: {0}")]
    BlockingUnsupported(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Why a single execution did not produce a value.
///
/// Cheap to clone so the same error can be read from the latest result and
/// from the execution history any number of times.
#[derive(Debug, Clone, Error)]
pub enum JobError {
    /// The execution line was cancelled while this execution was in flight.
    #[error("Job was cancelled")]
    Cancelled,

    /// The action's own error, kept verbatim.
    #[error("{0:#}")]
    Failed(Arc<anyhow::Error>),
}

impl JobError {
    pub fn failed(err: anyhow::Error) -> Self {
        JobError::Failed(Arc::new(err))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, JobError::Cancelled)
    }

    /// The underlying action error, if this is a failure.
    pub fn source_error(&self) -> Option<&anyhow::Error> {
        match self {
            JobError::Failed(e) => Some(e),
            JobError::Cancelled => None,
        }
    }
}

/// Errors raised by [`JobStorage`](crate::storage::JobStorage) backends.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend exists as an extension point but has no implementation.
    #[error("{backend} job storage does not implement {operation}")]
    Unimplemented {
        backend: &'static str,
        operation: &'static str,
    },
}
