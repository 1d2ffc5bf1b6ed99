//! Echo OCR engine for testing.
//!
//! This engine "recognizes" UTF-8 text files: form feeds separate pages, and
//! newlines separate lines. Jobs walk through the same states as a real
//! service (`notStarted`, then `running`, then a terminal state), one state
//! per status query, so the whole pipeline can be exercised without network
//! access.
//!
//! Like a real service, the engine forgets jobs a while after they were
//! submitted, so jobs nobody finishes polling don't pile up.

use std::{collections::HashMap, sync::Mutex, time::Duration};

use tokio::time::Instant;

use crate::{
    prelude::*,
    retry::{ClientRetryResult, retry_result_fatal, retry_result_ok},
};

use super::{JobStatus, OcrClient, OperationHandle, PageLines, StatusReport};

/// How long we remember a job after it was submitted.
const JOB_RETENTION: Duration = Duration::from_secs(10 * 60);

/// A job known to the echo engine.
#[derive(Debug)]
struct EchoJob {
    /// When was this job submitted?
    submitted_at: Instant,

    /// How many times has this job been queried?
    queries: u32,

    /// The eventual result: pages, or a failure detail.
    result: Result<Vec<PageLines>, String>,
}

/// Echo engine.
#[derive(Debug, Default)]
pub struct EchoOcrClient {
    jobs: Mutex<HashMap<OperationHandle, EchoJob>>,
}

impl EchoOcrClient {
    /// Create a new echo engine.
    pub fn new() -> Self {
        Self::default()
    }
}

/// Split text into pages of lines.
fn recognize(image: &[u8]) -> Result<Vec<PageLines>, String> {
    let text = std::str::from_utf8(image)
        .map_err(|err| format!("InvalidImageFormat: input is not UTF-8 text ({err})"))?;
    Ok(text
        .split('\u{c}')
        .map(|page| {
            page.lines()
                .filter(|line| !line.trim().is_empty())
                .map(str::to_owned)
                .collect()
        })
        .collect())
}

#[async_trait]
impl OcrClient for EchoOcrClient {
    async fn submit(&self, image: &[u8]) -> ClientRetryResult<OperationHandle> {
        if image.is_empty() {
            return retry_result_fatal(anyhow!("InvalidImageSize: image is empty"));
        }
        let handle = OperationHandle::new(uuid::Uuid::new_v4().to_string());
        let now = Instant::now();
        let job = EchoJob {
            submitted_at: now,
            queries: 0,
            result: recognize(image),
        };
        let mut jobs = self.jobs.lock().expect("lock poisoned");
        jobs.retain(|_, job| now.duration_since(job.submitted_at) < JOB_RETENTION);
        jobs.insert(handle.clone(), job);
        retry_result_ok(handle)
    }

    async fn job_status(&self, handle: &OperationHandle) -> ClientRetryResult<StatusReport> {
        let mut jobs = self.jobs.lock().expect("lock poisoned");
        let queries = match jobs.get_mut(handle) {
            Some(job) => {
                job.queries += 1;
                job.queries
            }
            None => return retry_result_fatal(anyhow!("unknown operation: {handle}")),
        };
        let report = match queries {
            1 => StatusReport::pending(JobStatus::NotStarted),
            2 => StatusReport::pending(JobStatus::Running),
            // Terminal. Nobody should ask about this job again.
            _ => match jobs.remove(handle).map(|job| job.result) {
                Some(Ok(pages)) => StatusReport {
                    status: JobStatus::Succeeded,
                    pages,
                    failure_detail: None,
                },
                Some(Err(detail)) => StatusReport {
                    status: JobStatus::Failed,
                    pages: vec![],
                    failure_detail: Some(detail),
                },
                None => return retry_result_fatal(anyhow!("unknown operation: {handle}")),
            },
        };
        retry_result_ok(report)
    }
}
