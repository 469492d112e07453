use std::path::PathBuf;

use async_trait::async_trait;
use log::info;

/// Client contract for the external object store used by assignment
/// submissions. The core validates before uploading and persists nothing
/// when an upload fails.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` under `key` and return the public URL.
    async fn upload_file(
        &self,
        key: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<String, ObjectStoreError>;
}

#[derive(Debug, thiserror::Error)]
#[error("object store error: {0}")]
pub struct ObjectStoreError(pub String);

/// Filesystem-backed store for local development and tests.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root taken from the loaded configuration.
    pub fn from_config() -> Self {
        Self::new(common::Config::get().submission_storage_root.clone())
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn upload_file(
        &self,
        key: &str,
        bytes: &[u8],
        _content_type: &str,
    ) -> Result<String, ObjectStoreError> {
        let path = self.root.join(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ObjectStoreError(format!("failed to create directory: {e}")))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| ObjectStoreError(format!("failed to write file: {e}")))?;

        info!("stored {} bytes at {}", bytes.len(), path.display());
        Ok(format!("file://{}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn writes_bytes_under_key() {
        let temp = TempDir::new().unwrap();
        let store = FsObjectStore::new(temp.path());

        let url = store
            .upload_file("a/1/report.pdf", b"content", "application/pdf")
            .await
            .unwrap();

        assert!(url.starts_with("file://"));
        let written = std::fs::read(temp.path().join("a/1/report.pdf")).unwrap();
        assert_eq!(written, b"content");
    }
}
