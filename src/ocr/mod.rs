//! OCR service interface.
//!
//! The OCR collaborator runs recognition as an asynchronous, server-side job:
//! we submit image bytes, get back an opaque handle, and then ask about that
//! handle until the job reaches a terminal state.

use std::{fmt, sync::Arc};

use clap::{Args, ValueEnum};
use crate::{prelude::*, rate_limit::RateLimit, retry::ClientRetryResult, secret::Secret};

pub mod azure_read;
pub mod echo;

/// Opaque identifier for a submitted recognition job.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct OperationHandle(String);

impl OperationHandle {
    /// Wrap an identifier assigned by the OCR service.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Status of a recognition job.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum JobStatus {
    /// Accepted, but not picked up yet.
    NotStarted,
    /// In progress.
    Running,
    /// Finished with results.
    Succeeded,
    /// Finished without results.
    Failed,
}

impl JobStatus {
    /// Will this job ever change status again?
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobStatus::NotStarted => "notStarted",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One recognized page: lines in the order the service returned them.
pub type PageLines = Vec<String>;

/// What the OCR service told us about a job on one status query.
#[derive(Clone, Debug, PartialEq)]
pub struct StatusReport {
    /// The job's current status.
    pub status: JobStatus,

    /// Recognized pages. Only populated once `status` is
    /// [`JobStatus::Succeeded`].
    pub pages: Vec<PageLines>,

    /// Why the job failed, if the service said.
    pub failure_detail: Option<String>,
}

impl StatusReport {
    /// A report for a job that is still going.
    pub fn pending(status: JobStatus) -> Self {
        Self {
            status,
            pages: vec![],
            failure_detail: None,
        }
    }
}

/// A recognition job as tracked by the poller.
#[derive(Clone, Debug, PartialEq)]
pub struct RecognitionJob {
    /// Handle assigned at submission.
    pub handle: OperationHandle,

    /// Most recently observed status.
    pub status: JobStatus,

    /// Pages, populated only when `status` is [`JobStatus::Succeeded`].
    pub pages: Vec<PageLines>,

    /// Failure detail reported by the service, if any.
    pub failure_detail: Option<String>,
}

impl RecognitionJob {
    /// A freshly submitted job.
    pub fn submitted(handle: OperationHandle) -> Self {
        Self {
            handle,
            status: JobStatus::NotStarted,
            pages: vec![],
            failure_detail: None,
        }
    }

    /// Record a status report.
    ///
    /// Pages are kept only for succeeded jobs, so a failed or pending job never
    /// carries partial results.
    pub fn apply(&mut self, report: StatusReport) {
        self.status = report.status;
        self.pages = if report.status == JobStatus::Succeeded {
            report.pages
        } else {
            vec![]
        };
        self.failure_detail = report.failure_detail;
    }
}

/// Interface to an asynchronous OCR service.
///
/// Implementations must be cheap to share between concurrent pipeline runs.
#[async_trait]
pub trait OcrClient: fmt::Debug + Send + Sync + 'static {
    /// Submit an image, returning the handle of the new job.
    async fn submit(&self, image: &[u8]) -> ClientRetryResult<OperationHandle>;

    /// Ask about the current state of a job.
    async fn job_status(&self, handle: &OperationHandle) -> ClientRetryResult<StatusReport>;
}

/// Our different OCR engines.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[clap(rename_all = "kebab-case")]
pub enum OcrEngineType {
    /// Azure Computer Vision "Read" API.
    #[default]
    AzureRead,

    /// Treat the input as UTF-8 text. For local testing.
    Echo,
}

/// OCR-related options.
#[derive(Args, Clone, Debug)]
pub struct OcrOpts {
    /// The OCR engine to use.
    #[clap(long = "ocr", env = "OCR_ENGINE", value_enum, default_value_t = OcrEngineType::default())]
    pub engine: OcrEngineType,

    /// Azure Computer Vision endpoint, like
    /// `https://myvision.cognitiveservices.azure.com`.
    #[clap(long, env = "VISION_ENDPOINT")]
    pub vision_endpoint: Option<String>,

    /// Azure Computer Vision subscription key.
    #[clap(long, env = "VISION_KEY", hide_env_values = true)]
    pub vision_key: Option<Secret>,

    /// A rate limit for OCR API requests (submissions and status checks), of
    /// the form "20/m" or "10/s".
    #[clap(long, env = "OCR_RATE_LIMIT")]
    pub ocr_rate_limit: Option<RateLimit>,
}

impl OcrOpts {
    /// Instantiate the configured OCR client.
    ///
    /// Missing settings are reported here, once, before any event is handled.
    pub fn create_client(&self) -> Result<Arc<dyn OcrClient>> {
        match self.engine {
            OcrEngineType::AzureRead => {
                let endpoint = self.vision_endpoint.as_deref().ok_or_else(|| {
                    anyhow!("VISION_ENDPOINT must be set to use the azure-read OCR engine")
                })?;
                let key = self.vision_key.clone().ok_or_else(|| {
                    anyhow!("VISION_KEY must be set to use the azure-read OCR engine")
                })?;
                Ok(Arc::new(azure_read::AzureReadClient::new(
                    endpoint,
                    key,
                    self.ocr_rate_limit.as_ref(),
                )?))
            }
            OcrEngineType::Echo => Ok(Arc::new(echo::EchoOcrClient::new())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(!JobStatus::NotStarted.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Succeeded.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_status_wire_names() {
        let status: JobStatus = serde_json::from_str(r#""notStarted""#).unwrap();
        assert_eq!(status, JobStatus::NotStarted);
        assert_eq!(JobStatus::NotStarted.to_string(), "notStarted");
        assert!(serde_json::from_str::<JobStatus>(r#""paused""#).is_err());
    }

    #[test]
    fn test_apply_drops_pages_unless_succeeded() {
        let mut job = RecognitionJob::submitted(OperationHandle::new("op-1"));
        job.apply(StatusReport {
            status: JobStatus::Failed,
            pages: vec![vec!["stray".to_owned()]],
            failure_detail: Some("bad image".to_owned()),
        });
        assert!(job.pages.is_empty());
        assert_eq!(job.failure_detail.as_deref(), Some("bad image"));

        job.apply(StatusReport {
            status: JobStatus::Succeeded,
            pages: vec![vec!["a".to_owned()]],
            failure_detail: None,
        });
        assert_eq!(job.pages, vec![vec!["a".to_owned()]]);
    }

    #[test]
    fn test_missing_vision_settings_are_fatal() {
        let opts = OcrOpts {
            engine: OcrEngineType::AzureRead,
            vision_endpoint: None,
            vision_key: None,
            ocr_rate_limit: None,
        };
        let err = opts.create_client().unwrap_err();
        assert!(err.to_string().contains("VISION_ENDPOINT"));
    }
}
