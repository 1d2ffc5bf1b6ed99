//! Amazon S3 storage. Containers are buckets, blob names are keys.

use aws_config::BehaviorVersion;
use aws_sdk_s3::{Client, primitives::ByteStream};

use crate::prelude::*;

use super::{BlobLocation, BlobStore};

/// S3 client. The AWS SDK retries throttling and transient network errors
/// on its own, using the standard retry mode.
#[derive(Debug)]
pub struct S3BlobStore {
    client: Client,
}

impl S3BlobStore {
    /// Create a client using the user's AWS configuration and the standard
    /// credential chain.
    pub async fn new() -> Result<Self> {
        let config = aws_config::load_defaults(BehaviorVersion::v2025_01_17()).await;
        Ok(Self {
            client: Client::new(&config),
        })
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    #[instrument(level = "debug", skip_all, fields(location = %location))]
    async fn get(&self, location: &BlobLocation) -> Result<Vec<u8>> {
        let output = self
            .client
            .get_object()
            .bucket(&location.container)
            .key(&location.name)
            .send()
            .await
            .with_context(|| format!("Failed to download s3://{location}"))?;
        let bytes = output
            .body
            .collect()
            .await
            .with_context(|| format!("Failed to read body of s3://{location}"))?;
        Ok(bytes.into_bytes().to_vec())
    }

    #[instrument(level = "debug", skip_all, fields(location = %location, bytes = data.len()))]
    async fn put(
        &self,
        location: &BlobLocation,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<()> {
        self.client
            .put_object()
            .bucket(&location.container)
            .key(&location.name)
            .content_type(content_type)
            .body(ByteStream::from(data))
            .send()
            .await
            .with_context(|| format!("Failed to upload s3://{location}"))?;
        Ok(())
    }
}
