//! Blob store backed by a local directory.

use std::path::Component;

use tokio::fs;

use crate::prelude::*;

use super::{BlobLocation, BlobStore};

/// A directory with one subdirectory per container.
#[derive(Debug)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    /// Create a store rooted at `root`, which must already exist.
    pub fn new(root: &Path) -> Result<Self> {
        if !root.is_dir() {
            return Err(anyhow!("LOCAL_STORE_ROOT is not a directory: {:?}", root));
        }
        Ok(Self {
            root: root.to_owned(),
        })
    }

    /// Map a location to a path under our root, refusing anything that could
    /// escape it.
    fn path_for(&self, location: &BlobLocation) -> Result<PathBuf> {
        let relative = Path::new(&location.container).join(&location.name);
        let is_plain = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
        if !is_plain || location.name.is_empty() {
            return Err(anyhow!("refusing unsafe blob location {location}"));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    #[instrument(level = "debug", skip_all, fields(location = %location))]
    async fn get(&self, location: &BlobLocation) -> Result<Vec<u8>> {
        let path = self.path_for(location)?;
        fs::read(&path)
            .await
            .with_context(|| format!("Failed to read blob at path: {:?}", path))
    }

    #[instrument(level = "debug", skip_all, fields(location = %location, bytes = data.len()))]
    async fn put(
        &self,
        location: &BlobLocation,
        data: Vec<u8>,
        _content_type: &str,
    ) -> Result<()> {
        let path = self.path_for(location)?;
        let parent = path
            .parent()
            .ok_or_else(|| anyhow!("blob path has no parent: {:?}", path))?;
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create directory: {:?}", parent))?;

        // Write next to the target and rename over it, so readers never see a
        // half-written blob.
        let file_name = path
            .file_name()
            .ok_or_else(|| anyhow!("blob path has no file name: {:?}", path))?
            .to_string_lossy();
        let tmp_path = parent.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));
        fs::write(&tmp_path, &data)
            .await
            .with_context(|| format!("Failed to write file at path: {:?}", tmp_path))?;
        if let Err(err) = fs::rename(&tmp_path, &path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err).with_context(|| format!("Failed to replace file at path: {:?}", path));
        }
        Ok(())
    }
}
