//! Errors raised inside a pipeline run.

use std::time::Duration;

use thiserror::Error;

use crate::ocr::{JobStatus, OperationHandle};

/// Everything that can go wrong while processing one event.
///
/// The orchestrator never lets these escape; it turns them into
/// [`super::PipelineOutcome::Failure`] records.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The OCR service rejected the job, or never accepted it.
    #[error("OCR service did not accept the job")]
    Submission(#[source] anyhow::Error),

    /// The job reached the `failed` state.
    #[error(
        "job did not succeed (operation {handle}): {}",
        .detail.as_deref().unwrap_or("no detail reported")
    )]
    JobFailed {
        handle: OperationHandle,
        detail: Option<String>,
    },

    /// The assembler was handed a job that hadn't succeeded. This is a bug in
    /// the caller, not an environmental failure.
    #[error("cannot assemble a document from a job with status {status}")]
    Precondition { status: JobStatus },

    /// A blob could not be read or written.
    #[error("storage request failed")]
    Storage(#[source] anyhow::Error),

    /// The job did not reach a terminal state in time.
    #[error("operation {handle} did not finish within {deadline:?}")]
    Timeout {
        handle: OperationHandle,
        deadline: Duration,
    },

    /// We were asked to shut down while waiting on the job.
    #[error("stopped waiting for operation {handle} because of shutdown")]
    Cancelled { handle: OperationHandle },

    /// A fetch, submission or write took longer than we allow for one stage.
    #[error("gave up after {timeout:?}")]
    StageTimeout { timeout: Duration },

    /// We were asked to shut down before a stage finished.
    #[error("interrupted by shutdown")]
    Interrupted,

    /// A status query failed in a way that won't fix itself.
    #[error("cannot query status of operation {handle}")]
    Poll {
        handle: OperationHandle,
        #[source]
        source: anyhow::Error,
    },

    /// The document could not be serialized.
    #[error("cannot encode document as JSON")]
    Encode(#[from] serde_json::Error),

    /// The notification could not be delivered.
    #[error("notification failed")]
    Notification(#[source] anyhow::Error),
}

impl PipelineError {
    /// The full error chain on one line, for outcome records and logs.
    pub fn full_cause(self) -> String {
        format!("{:#}", anyhow::Error::from(self))
    }
}
