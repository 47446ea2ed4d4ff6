use crate::remote::RemoteError;
use crate::types::{DbId, TaskRef};

/// Errors surfaced by the orchestration layer once it gives up on an operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrchestrationError {
    /// A retryable network or decode failure.
    #[error("Transient network error: {0}")]
    TransientNetwork(#[from] RemoteError),

    #[error("Conversion job {job_id} failed: {message}")]
    RemoteJobFailed { job_id: DbId, message: String },

    /// The job is possibly alive but reported no progress.
    #[error("Conversion job {job_id} made no progress after {attempts} polls")]
    StallTimeout { job_id: DbId, attempts: u32 },

    #[error("Conversion job {job_id} status unavailable after {retries} consecutive errors")]
    ExhaustedRetries { job_id: DbId, retries: u32 },

    #[error("Conversion job {job_id} still processing after {attempts} polls")]
    ExhaustedAttempts { job_id: DbId, attempts: u32 },

    /// Non-fatal: the pending buffer was kept and will be retried.
    #[error("Failed to persist {entities} result(s) for task {task}: {reason}")]
    PersistenceFailure {
        task: TaskRef,
        entities: usize,
        reason: String,
    },
}

impl OrchestrationError {
    /// `true` when retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransientNetwork(_) | Self::PersistenceFailure { .. }
        )
    }
}
