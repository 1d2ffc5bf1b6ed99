//! Driving a recognition job from submission to a terminal state.

use std::{sync::Arc, time::Duration};

use keen_retry::RetryResult;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::{
    ocr::{OcrClient, OperationHandle, RecognitionJob},
    prelude::*,
    retry::{RetryPolicy, retry_transient},
};

use super::PipelineError;

/// How often, and for how long, to ask about a job.
#[derive(Clone, Debug)]
pub struct PollPolicy {
    /// Fixed delay between status checks.
    pub interval: Duration,

    /// Give up once this much time has passed since we started waiting.
    pub deadline: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            deadline: Duration::from_secs(5 * 60),
        }
    }
}

/// Submits images to an [`OcrClient`] and waits for the results.
#[derive(Clone, Debug)]
pub struct OperationPoller {
    client: Arc<dyn OcrClient>,
    policy: PollPolicy,
    submit_retry_policy: RetryPolicy,
}

impl OperationPoller {
    /// Create a poller using `client`.
    pub fn new(client: Arc<dyn OcrClient>, policy: PollPolicy) -> Self {
        Self {
            client,
            policy,
            submit_retry_policy: RetryPolicy::short(),
        }
    }

    /// Use a different retry policy for transient submission failures.
    pub fn with_submit_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.submit_retry_policy = retry_policy;
        self
    }

    /// Submit an image and return the handle of the new job.
    ///
    /// Rejections (bad image, bad credentials) fail immediately. Failures the
    /// client reports as transient get a few more tries first.
    #[instrument(level = "debug", skip_all, fields(bytes = image.len()))]
    pub async fn submit(&self, image: &[u8]) -> Result<OperationHandle, PipelineError> {
        retry_transient(&self.submit_retry_policy, "OCR submission", || {
            self.client.submit(image)
        })
        .await
        .map_err(PipelineError::Submission)
    }

    /// Poll `handle` until its job succeeds or fails.
    ///
    /// `notStarted` and `running` mean "ask again after the interval". A
    /// status query that fails transiently counts as a missed tick. Fails with
    /// [`PipelineError::Timeout`] once the deadline passes, and with
    /// [`PipelineError::Cancelled`] as soon as `cancel` fires, even in the
    /// middle of a request or a sleep.
    #[instrument(level = "debug", skip_all, fields(handle = %handle))]
    pub async fn await_completion(
        &self,
        handle: OperationHandle,
        cancel: &CancellationToken,
    ) -> Result<RecognitionJob, PipelineError> {
        let deadline = Instant::now() + self.policy.deadline;
        let mut job = RecognitionJob::submitted(handle);
        let timeout = |job: &RecognitionJob| PipelineError::Timeout {
            handle: job.handle.clone(),
            deadline: self.policy.deadline,
        };
        let cancelled = |job: &RecognitionJob| PipelineError::Cancelled {
            handle: job.handle.clone(),
        };

        loop {
            let query = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled(&job)),
                _ = time::sleep_until(deadline) => return Err(timeout(&job)),
                query = self.client.job_status(&job.handle) => query,
            };

            match query {
                RetryResult::Ok { output, .. } => {
                    if output.status != job.status {
                        debug!(from = %job.status, to = %output.status, "Job status changed");
                    }
                    job.apply(output);
                    if job.status.is_terminal() {
                        return Ok(job);
                    }
                }
                RetryResult::Transient { error, .. } => {
                    warn!("Transient error checking job status, will try again: {error:#}");
                }
                RetryResult::Fatal { error, .. } => {
                    return Err(PipelineError::Poll {
                        handle: job.handle,
                        source: error,
                    });
                }
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled(&job)),
                _ = time::sleep_until(deadline) => return Err(timeout(&job)),
                _ = time::sleep(self.policy.interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        ocr::{JobStatus, StatusReport},
        pipeline::fakes::{ScriptedOcrClient, StatusStep},
    };

    use super::*;

    fn poller(client: Arc<ScriptedOcrClient>, interval_secs: u64, deadline_secs: u64) -> OperationPoller {
        OperationPoller::new(
            client,
            PollPolicy {
                interval: Duration::from_secs(interval_secs),
                deadline: Duration::from_secs(deadline_secs),
            },
        )
        .with_submit_retry_policy(RetryPolicy::none())
    }

    fn succeeded(lines: &[&str]) -> StatusStep {
        StatusStep::Report(StatusReport {
            status: JobStatus::Succeeded,
            pages: vec![lines.iter().map(|line| (*line).to_owned()).collect()],
            failure_detail: None,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_through_pending_states_at_fixed_interval() {
        let client = Arc::new(ScriptedOcrClient::new(vec![
            StatusStep::Report(StatusReport::pending(JobStatus::NotStarted)),
            StatusStep::Report(StatusReport::pending(JobStatus::Running)),
            StatusStep::Report(StatusReport::pending(JobStatus::Running)),
            succeeded(&["hello"]),
        ]));
        let poller = poller(client.clone(), 1, 300);

        let start = Instant::now();
        let job = poller
            .await_completion(OperationHandle::new("op"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.pages, vec![vec!["hello".to_owned()]]);
        assert_eq!(client.status_calls(), 4);
        // Three waits between four checks.
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_job_is_returned_not_raised() {
        let client = Arc::new(ScriptedOcrClient::new(vec![
            StatusStep::Report(StatusReport::pending(JobStatus::Running)),
            StatusStep::Report(StatusReport {
                status: JobStatus::Failed,
                pages: vec![],
                failure_detail: Some("unsupported format".to_owned()),
            }),
        ]));
        let job = poller(client, 1, 300)
            .await_completion(OperationHandle::new("op"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.pages.is_empty());
        assert_eq!(job.failure_detail.as_deref(), Some("unsupported format"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_job_times_out() {
        // The script repeats its last step forever.
        let client = Arc::new(ScriptedOcrClient::new(vec![StatusStep::Report(
            StatusReport::pending(JobStatus::Running),
        )]));
        let start = Instant::now();
        let err = poller(client.clone(), 1, 10)
            .await_completion(OperationHandle::new("op"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Timeout { .. }));
        assert_eq!(start.elapsed(), Duration::from_secs(10));
        assert_eq!(client.status_calls(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_sleep() {
        let client = Arc::new(ScriptedOcrClient::new(vec![StatusStep::Report(
            StatusReport::pending(JobStatus::Running),
        )]));
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_secs(2)).await;
            canceller.cancel();
        });

        let start = Instant::now();
        let err = poller(client, 60, 300)
            .await_completion(OperationHandle::new("op"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled { .. }));
        assert!(start.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_status_errors_are_missed_ticks() {
        let client = Arc::new(ScriptedOcrClient::new(vec![
            StatusStep::Transient("503 Service Unavailable"),
            StatusStep::Transient("429 Too Many Requests"),
            succeeded(&["ok"]),
        ]));
        let job = poller(client.clone(), 1, 300)
            .await_completion(OperationHandle::new("op"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(client.status_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_status_error_aborts() {
        let client = Arc::new(ScriptedOcrClient::new(vec![
            StatusStep::Report(StatusReport::pending(JobStatus::Running)),
            StatusStep::Fatal("404 operation not found"),
            succeeded(&["never seen"]),
        ]));
        let err = poller(client.clone(), 1, 300)
            .await_completion(OperationHandle::new("op"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Poll { .. }));
        assert_eq!(client.status_calls(), 2);
    }

    #[tokio::test]
    async fn test_rejected_submission() {
        let client = Arc::new(ScriptedOcrClient::rejecting_submissions("401 invalid key"));
        let err = poller(client, 1, 300).submit(b"image").await.unwrap_err();
        assert!(matches!(err, PipelineError::Submission(_)));
        assert!(err.full_cause().contains("401 invalid key"));
    }
}
