//! Azure Blob Storage over REST, authorized with a shared access signature.

use std::fmt;

use reqwest::{Response, StatusCode, Url, header};

use crate::{
    prelude::*,
    retry::{
        ClientRetryResult, IsKnownTransient as _, RetryPolicy, http_client, retry_result_fatal,
        retry_result_ok, retry_result_transient, retry_transient, try_potentially_transient,
    },
    secret::Secret,
};

use super::{BlobLocation, BlobStore};

/// Blob service REST API version we speak.
const API_VERSION: &str = "2023-11-03";

/// Azure Blob Storage client.
pub struct AzureBlobStore {
    http: reqwest::Client,

    /// Like `https://myaccount.blob.core.windows.net/`.
    account_url: Url,

    /// SAS query string, without the leading `?`.
    sas_token: Secret,

    /// Downloads and overwriting uploads are idempotent, so we retry them.
    retry_policy: RetryPolicy,
}

impl AzureBlobStore {
    /// Create a new client.
    pub fn new(account_url: &str, sas_token: Secret) -> Result<Self> {
        let account_url = Url::parse(account_url)
            .with_context(|| format!("invalid AZURE_STORAGE_ACCOUNT_URL: {account_url:?}"))?;
        if account_url.cannot_be_a_base() {
            return Err(anyhow!(
                "invalid AZURE_STORAGE_ACCOUNT_URL: {:?}",
                account_url.as_str()
            ));
        }
        let sas_token = sas_token.expose().trim_start_matches('?').parse::<Secret>()?;
        Ok(Self {
            http: http_client()?,
            account_url,
            sas_token,
            retry_policy: RetryPolicy::short(),
        })
    }

    /// Build the signed URL for a blob.
    fn blob_url(&self, location: &BlobLocation) -> Result<Url> {
        let mut url = self.account_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| anyhow!("account URL cannot have a path"))?;
            segments.pop_if_empty().push(&location.container);
            for segment in location.name.split('/') {
                segments.push(segment);
            }
        }
        url.set_query(Some(self.sas_token.expose()));
        Ok(url)
    }

    async fn get_once(&self, url: &Url) -> ClientRetryResult<Vec<u8>> {
        let response = try_potentially_transient!(
            self.http
                .get(url.clone())
                .header("x-ms-version", API_VERSION)
                .send()
                .await
        );
        let response = match check_status(response, "download").await {
            Ok(response) => response,
            Err(result) => return result,
        };
        let bytes = try_potentially_transient!(response.bytes().await);
        retry_result_ok(bytes.to_vec())
    }

    async fn put_once(&self, url: &Url, data: &[u8], content_type: &str) -> ClientRetryResult<()> {
        let response = try_potentially_transient!(
            self.http
                .put(url.clone())
                .header("x-ms-version", API_VERSION)
                .header("x-ms-blob-type", "BlockBlob")
                .header(header::CONTENT_TYPE, content_type)
                .body(data.to_vec())
                .send()
                .await
        );
        match check_status(response, "upload").await {
            Ok(_) => retry_result_ok(()),
            Err(result) => result,
        }
    }
}

impl fmt::Debug for AzureBlobStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureBlobStore")
            .field("account_url", &self.account_url.as_str())
            .finish_non_exhaustive()
    }
}

/// Pass successful responses through; turn the rest into retry results.
async fn check_status<T>(
    response: Response,
    what: &str,
) -> Result<Response, ClientRetryResult<T>> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    // Error details come back in an `x-ms-error-code` header and an XML body.
    let code = response
        .headers()
        .get("x-ms-error-code")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown")
        .to_owned();
    let body = response.text().await.unwrap_or_default();
    let error = anyhow!("blob {what} failed with {status} ({code}): {body}");
    Err(if status.is_known_transient() || status == StatusCode::INTERNAL_SERVER_ERROR {
        retry_result_transient(error)
    } else {
        retry_result_fatal(error)
    })
}

#[async_trait]
impl BlobStore for AzureBlobStore {
    #[instrument(level = "debug", skip_all, fields(location = %location))]
    async fn get(&self, location: &BlobLocation) -> Result<Vec<u8>> {
        let url = self.blob_url(location)?;
        retry_transient(&self.retry_policy, "blob download", || self.get_once(&url))
            .await
            .with_context(|| format!("Failed to download blob {location}"))
    }

    #[instrument(level = "debug", skip_all, fields(location = %location, bytes = data.len()))]
    async fn put(
        &self,
        location: &BlobLocation,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<()> {
        let url = self.blob_url(location)?;
        retry_transient(&self.retry_policy, "blob upload", || {
            self.put_once(&url, &data, content_type)
        })
        .await
        .with_context(|| format!("Failed to upload blob {location}"))
    }
}
