//! OCR using the Azure Computer Vision "Read" API (v3.2).
//!
//! Submitting an image returns `202 Accepted` with an `Operation-Location`
//! header pointing at the job. The job is then polled with `GET` until its
//! `status` is `succeeded` or `failed`.

use std::fmt;

use leaky_bucket::RateLimiter;
use reqwest::{StatusCode, Url, header};

use crate::{
    prelude::*,
    rate_limit::RateLimit,
    retry::{
        ClientRetryResult, IsKnownTransient as _, http_client, retry_result_fatal,
        retry_result_ok, retry_result_transient, try_fatal, try_potentially_transient,
    },
    secret::Secret,
};

use super::{JobStatus, OcrClient, OperationHandle, PageLines, StatusReport};

/// Header carrying the subscription key.
const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

/// Header carrying the URL of a newly created job.
const OPERATION_LOCATION_HEADER: &str = "Operation-Location";

/// OCR client wrapping the Azure Read API.
pub struct AzureReadClient {
    /// Shared HTTP client.
    http: reqwest::Client,

    /// `POST` target for new jobs.
    analyze_url: Url,

    /// Base URL for job results. Operation IDs are appended to this.
    results_url: Url,

    /// Subscription key.
    key: Secret,

    /// Optional rate limiter, applied to every request.
    rate_limiter: Option<RateLimiter>,
}

impl AzureReadClient {
    /// Create a new client for the resource at `endpoint`.
    pub fn new(endpoint: &str, key: Secret, rate_limit: Option<&RateLimit>) -> Result<Self> {
        let endpoint = endpoint.trim_end_matches('/');
        let analyze_url = Url::parse(&format!("{endpoint}/vision/v3.2/read/analyze"))
            .with_context(|| format!("invalid VISION_ENDPOINT: {endpoint:?}"))?;
        let results_url = Url::parse(&format!("{endpoint}/vision/v3.2/read/analyzeResults/"))
            .with_context(|| format!("invalid VISION_ENDPOINT: {endpoint:?}"))?;
        Ok(Self {
            http: http_client()?,
            analyze_url,
            results_url,
            key,
            rate_limiter: rate_limit.map(RateLimit::to_rate_limiter),
        })
    }

    /// Wait for our turn, if we're rate limited.
    async fn throttle(&self) {
        if let Some(rate_limiter) = &self.rate_limiter {
            rate_limiter.acquire_one().await;
        }
    }
}

impl fmt::Debug for AzureReadClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureReadClient")
            .field("analyze_url", &self.analyze_url.as_str())
            .field("rate_limited", &self.rate_limiter.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl OcrClient for AzureReadClient {
    #[instrument(level = "debug", skip_all, fields(bytes = image.len()))]
    async fn submit(&self, image: &[u8]) -> ClientRetryResult<OperationHandle> {
        self.throttle().await;
        let response = match self
            .http
            .post(self.analyze_url.clone())
            .header(SUBSCRIPTION_KEY_HEADER, self.key.expose())
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(image.to_vec())
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => return submission_send_error(err),
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return service_error("submission", status, &body);
        }

        let location = try_fatal!(
            response
                .headers()
                .get(OPERATION_LOCATION_HEADER)
                .ok_or_else(|| anyhow!("Read API response has no {OPERATION_LOCATION_HEADER} header"))
                .and_then(|value| value
                    .to_str()
                    .context("Operation-Location header is not valid text"))
        );
        let handle = try_fatal!(operation_id_from_location(location));
        debug!(%handle, "Read job submitted");
        retry_result_ok(handle)
    }

    #[instrument(level = "debug", skip_all, fields(handle = %handle))]
    async fn job_status(&self, handle: &OperationHandle) -> ClientRetryResult<StatusReport> {
        let url = try_fatal!(
            self.results_url
                .join(handle.as_str())
                .with_context(|| format!("cannot build result URL for {handle}"))
        );
        self.throttle().await;
        let response = try_potentially_transient!(
            self.http
                .get(url)
                .header(SUBSCRIPTION_KEY_HEADER, self.key.expose())
                .send()
                .await
        );

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return service_error("status query", status, &body);
        }

        let body = try_potentially_transient!(response.text().await);
        trace!(%body, "Read result");
        let result = try_fatal!(
            serde_json::from_str::<ReadOperationResult>(&body)
                .with_context(|| format!("cannot parse Read API result: {body:?}"))
        );
        retry_result_ok(result.into_report())
    }
}

/// Turn a non-2xx response into a transient or fatal error.
fn service_error<T>(what: &str, status: StatusCode, body: &str) -> ClientRetryResult<T> {
    let detail = serde_json::from_str::<ErrorResponse>(body)
        .map(|response| format!("{}: {}", response.error.code, response.error.message))
        .unwrap_or_else(|_| body.to_owned());
    let error = anyhow!("Read API {what} failed with {status}: {detail}");
    if status.is_known_transient() {
        retry_result_transient(error)
    } else {
        retry_result_fatal(error)
    }
}

/// Classify a failure to send a job.
///
/// Creating a job isn't idempotent. Once the request may have reached the
/// service, sending it again could start a second job, so only failures to
/// connect are worth another try.
fn submission_send_error<T>(err: reqwest::Error) -> ClientRetryResult<T> {
    let connect_failed = err.is_connect();
    let error = anyhow::Error::from(err).context("cannot send Read API submission");
    if connect_failed {
        retry_result_transient(error)
    } else {
        retry_result_fatal(error)
    }
}

/// Extract the operation ID from an `Operation-Location` URL. It's the last
/// path segment.
fn operation_id_from_location(location: &str) -> Result<OperationHandle> {
    let url = Url::parse(location)
        .with_context(|| format!("invalid Operation-Location: {location:?}"))?;
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|id| !id.is_empty())
        .map(OperationHandle::new)
        .ok_or_else(|| anyhow!("no operation ID in Operation-Location: {location:?}"))
}

/// Body of a `GET analyzeResults/{id}` response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadOperationResult {
    status: JobStatus,
    #[serde(default)]
    analyze_result: Option<AnalyzeResult>,
    #[serde(default)]
    error: Option<ErrorDetail>,
}

impl ReadOperationResult {
    fn into_report(self) -> StatusReport {
        let pages = match (self.status, self.analyze_result) {
            (JobStatus::Succeeded, Some(analyze_result)) => {
                let mut read_results = analyze_result.read_results;
                // Stable, so duplicate page numbers keep service order.
                read_results.sort_by_key(|result| result.page);
                read_results
                    .into_iter()
                    .map(|result| -> PageLines {
                        result.lines.into_iter().map(|line| line.text).collect()
                    })
                    .collect()
            }
            _ => vec![],
        };
        StatusReport {
            status: self.status,
            pages,
            failure_detail: self
                .error
                .map(|error| format!("{}: {}", error.code, error.message)),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeResult {
    #[serde(default)]
    read_results: Vec<ReadResult>,
}

#[derive(Debug, Deserialize)]
struct ReadResult {
    page: u32,
    #[serde(default)]
    lines: Vec<ReadLine>,
}

#[derive(Debug, Deserialize)]
struct ReadLine {
    text: String,
}

/// Error body returned by Cognitive Services.
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    code: String,
    message: String,
}
