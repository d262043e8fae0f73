//! Pipeline error types

use thiserror::Error;

use tasknorm_client::ClientError;
use tasknorm_core::error::NormalizeError;

/// Errors raised while processing a batch of pulse lines.
///
/// Most variants are per-line defects that the batch loop logs and skips;
/// [`PipelineError::TryAgainLater`] and [`PipelineError::Stopped`] abort
/// the whole batch instead, so the scheduler re-runs it wholesale.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The batch cannot be finished yet and must be retried as a whole
    #[error("batch must be retried: {reason}")]
    TryAgainLater {
        /// Human-readable deferral reason, also used to classify handling
        reason: String,
    },

    /// Shutdown was requested mid-batch
    #[error("shutdown requested, stopping early")]
    Stopped,

    /// The same task id arrived twice in one batch with diverging content
    #[error("duplicate task {task_id} with mismatched content")]
    DuplicateMismatch {
        /// The offending task id
        task_id: String,
    },

    /// A pulse line was not valid JSON
    #[error("bad pulse line: {0}")]
    BadLine(#[from] serde_json::Error),

    /// A pulse line carried no task id
    #[error("pulse line has no status.taskId")]
    MissingTaskId,

    /// An upstream call failed after retries
    #[error(transparent)]
    Client(#[from] ClientError),

    /// Normalization of the raw task failed
    #[error(transparent)]
    Normalize(#[from] NormalizeError),
}

impl PipelineError {
    /// Shorthand for a [`PipelineError::TryAgainLater`]
    pub fn try_again(reason: impl Into<String>) -> Self {
        Self::TryAgainLater {
            reason: reason.into(),
        }
    }

    /// Whether this error ends the batch rather than just its line
    pub fn is_batch_fatal(&self) -> bool {
        matches!(self, Self::TryAgainLater { .. } | Self::Stopped)
    }
}

/// Result alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;
