//! Filesystem media store, the stand-in for the external image host.
//!
//! Incoming uploads are first written to a spool directory; the upload step
//! then moves the data into durable media storage. Callers are responsible
//! for removing the spooled copy after the upload attempt, on success and
//! failure alike, so a failed upload leaves nothing behind.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ApiError;

#[derive(Debug, Clone)]
pub struct MediaStore {
    base_path: PathBuf,
    spool_path: PathBuf,
    max_size: usize,
}

impl MediaStore {
    pub async fn new(base_path: PathBuf, max_size: usize) -> Result<Self, ApiError> {
        let spool_path = base_path.join("spool");
        fs::create_dir_all(&spool_path).await.map_err(|e| {
            ApiError::Internal(format!(
                "Failed to create media directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;

        info!(path = %base_path.display(), "Media store initialized");

        Ok(Self {
            base_path,
            spool_path,
            max_size,
        })
    }

    pub fn spool_dir(&self) -> &Path {
        &self.spool_path
    }

    /// Write incoming bytes to a temporary spool file and return its path.
    pub async fn spool(&self, data: &[u8]) -> Result<PathBuf, ApiError> {
        let path = self.spool_path.join(format!("{}.tmp", Uuid::new_v4()));
        fs::write(&path, data)
            .await
            .map_err(|e| ApiError::Internal(format!("Failed to spool upload: {e}")))?;
        debug!(path = %path.display(), size = data.len(), "Spooled upload");
        Ok(path)
    }

    /// Upload a spooled file into durable media storage. Does not remove the
    /// spooled file; that is the caller's cleanup obligation.
    pub async fn upload(&self, spooled: &Path) -> Result<Uuid, ApiError> {
        let data = fs::read(spooled)
            .await
            .map_err(|e| ApiError::MediaUploadFailed(format!("spooled file unreadable: {e}")))?;

        if data.is_empty() {
            return Err(ApiError::MediaUploadFailed("empty upload".to_string()));
        }
        if data.len() > self.max_size {
            return Err(ApiError::MediaUploadFailed(format!(
                "{} bytes exceeds limit of {}",
                data.len(),
                self.max_size
            )));
        }

        let id = Uuid::new_v4();
        let path = self.base_path.join(id.to_string());
        fs::write(&path, &data)
            .await
            .map_err(|e| ApiError::MediaUploadFailed(format!("write failed: {e}")))?;

        debug!(id = %id, size = data.len(), "Stored media");
        Ok(id)
    }

    pub async fn get(&self, id: Uuid) -> Result<Vec<u8>, ApiError> {
        let path = self.base_path.join(id.to_string());

        if !path.exists() {
            return Err(ApiError::MediaNotFound(id));
        }

        fs::read(&path)
            .await
            .map_err(|e| ApiError::Internal(format!("Failed to read media {id}: {e}")))
    }

    /// Public URL under which a stored media id is served.
    pub fn url_for(id: Uuid) -> String {
        format!("/media/{id}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn test_store(max_size: usize) -> (MediaStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = MediaStore::new(dir.path().join("media"), max_size)
            .await
            .unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn spool_upload_get_round_trip() {
        let (store, _dir) = test_store(1024).await;
        let data = b"image-bytes";

        let spooled = store.spool(data).await.unwrap();
        let id = store.upload(&spooled).await.unwrap();
        fs::remove_file(&spooled).await.unwrap();

        assert_eq!(store.get(id).await.unwrap(), data);
    }

    #[tokio::test]
    async fn oversized_upload_fails() {
        let (store, _dir) = test_store(8).await;

        let spooled = store.spool(&[0u8; 64]).await.unwrap();
        let result = store.upload(&spooled).await;
        assert!(matches!(result, Err(ApiError::MediaUploadFailed(_))));
    }

    #[tokio::test]
    async fn empty_upload_fails() {
        let (store, _dir) = test_store(1024).await;

        let spooled = store.spool(b"").await.unwrap();
        assert!(store.upload(&spooled).await.is_err());
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let (store, _dir) = test_store(1024).await;
        let missing = Uuid::new_v4();
        assert!(matches!(
            store.get(missing).await,
            Err(ApiError::MediaNotFound(id)) if id == missing
        ));
    }
}
