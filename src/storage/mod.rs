//! Blob storage interface.
//!
//! Both the input store (where new images land) and the output store (where
//! we write JSON results) are containers of named blobs. Containers map to
//! directories, Azure Blob containers, or S3 buckets, depending on the
//! backend.

use std::{fmt, sync::Arc};

use clap::{Args, ValueEnum};
use schemars::JsonSchema;

use crate::{prelude::*, secret::Secret};

pub mod azure;
pub mod local;
pub mod s3;

/// Where a blob lives.
#[derive(Clone, Debug, Deserialize, Eq, Hash, JsonSchema, PartialEq, Serialize)]
pub struct BlobLocation {
    /// The container (or bucket, or top-level directory).
    pub container: String,

    /// The blob name within the container. May contain `/`.
    pub name: String,
}

impl BlobLocation {
    /// Create a new location.
    pub fn new(container: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for BlobLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.container, self.name)
    }
}

/// Interface to a blob store.
#[async_trait]
pub trait BlobStore: fmt::Debug + Send + Sync + 'static {
    /// Download a blob.
    async fn get(&self, location: &BlobLocation) -> Result<Vec<u8>>;

    /// Upload a blob, replacing any existing blob with the same name.
    async fn put(&self, location: &BlobLocation, data: Vec<u8>, content_type: &str)
    -> Result<()>;
}

/// Our different storage backends.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[clap(rename_all = "snake_case")]
pub enum StoreBackend {
    /// A local directory, with one subdirectory per container.
    Local,

    /// Azure Blob Storage, authorized with a SAS token.
    #[default]
    Azure,

    /// Amazon S3, using standard AWS credentials. Containers are buckets.
    S3,
}

/// Storage options.
#[derive(Args, Clone, Debug)]
pub struct StoreOpts {
    /// The storage backend holding both containers.
    #[clap(long = "store", env = "STORE_BACKEND", value_enum, default_value_t = StoreBackend::default())]
    pub backend: StoreBackend,

    /// Container watched for new images.
    #[clap(long, env = "INPUT_CONTAINER")]
    pub input_container: String,

    /// Container receiving JSON results.
    #[clap(long, env = "OUTPUT_CONTAINER")]
    pub output_container: String,

    /// Root directory for the `local` backend.
    #[clap(long, env = "LOCAL_STORE_ROOT")]
    pub local_store_root: Option<PathBuf>,

    /// Storage account URL for the `azure` backend, like
    /// `https://myaccount.blob.core.windows.net`.
    #[clap(long, env = "AZURE_STORAGE_ACCOUNT_URL")]
    pub azure_storage_account_url: Option<String>,

    /// Shared access signature for the `azure` backend. Needs read access to
    /// the input container and create/write access to the output container.
    #[clap(long, env = "AZURE_STORAGE_SAS_TOKEN", hide_env_values = true)]
    pub azure_storage_sas_token: Option<Secret>,
}

impl StoreOpts {
    /// Check our settings and create the configured store.
    ///
    /// One store serves both containers.
    pub async fn create_store(&self) -> Result<Arc<dyn BlobStore>> {
        check_container_name("INPUT_CONTAINER", &self.input_container)?;
        check_container_name("OUTPUT_CONTAINER", &self.output_container)?;
        match self.backend {
            StoreBackend::Local => {
                let root = self.local_store_root.as_deref().ok_or_else(|| {
                    anyhow!("LOCAL_STORE_ROOT must be set to use the local store")
                })?;
                Ok(Arc::new(local::LocalBlobStore::new(root)?))
            }
            StoreBackend::Azure => {
                let account_url = self.azure_storage_account_url.as_deref().ok_or_else(|| {
                    anyhow!("AZURE_STORAGE_ACCOUNT_URL must be set to use the azure store")
                })?;
                let sas_token = self.azure_storage_sas_token.clone().ok_or_else(|| {
                    anyhow!("AZURE_STORAGE_SAS_TOKEN must be set to use the azure store")
                })?;
                Ok(Arc::new(azure::AzureBlobStore::new(account_url, sas_token)?))
            }
            StoreBackend::S3 => Ok(Arc::new(s3::S3BlobStore::new().await?)),
        }
    }
}

/// Container names end up in URLs and paths, so keep them simple.
fn check_container_name(setting: &str, name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') || name == "." || name == ".." {
        return Err(anyhow!("{setting} is not a valid container name: {name:?}"));
    }
    Ok(())
}
