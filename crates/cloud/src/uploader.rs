//! Concurrent upload of generated files.
//!
//! [`Uploader::upload_all`] spawns one task per file and waits for every
//! task before returning, so callers never observe a partial URL list.
//! Each task owns its slot index; results are placed after the join.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use relay_core::config::StorageSettings;
use tokio::task::JoinSet;

use crate::store::{ObjectStore, S3ObjectStore};

/// Lifetime of the pre-signed URLs handed back to callers.
pub const PRESIGNED_URL_TTL: Duration = Duration::from_secs(3600);

/// Key prefix used when no object storage is configured.
pub const SIMULATED_UPLOAD_DIR: &str = "simulated_uploaded";

/// Length of the random object name.
const SHORT_ID_LEN: usize = 8;

/// Errors from uploading a file.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// The local file could not be opened for upload.
    #[error("Failed to read {path}: {message}")]
    Read { path: String, message: String },

    /// The store rejected or failed the object write.
    #[error("Failed to upload object {key}: {message}")]
    Put { key: String, message: String },

    /// No download URL could be signed for the object.
    #[error("Failed to presign object {key}: {message}")]
    Presign { key: String, message: String },

    /// An upload task panicked or was cancelled.
    #[error("Upload task failed: {0}")]
    Task(String),
}

/// Uploads files to object storage, or simulates it when unconfigured.
///
/// Cheap to clone.
#[derive(Clone)]
pub struct Uploader {
    store: Option<Arc<dyn ObjectStore>>,
    url_ttl: Duration,
}

impl Uploader {
    /// `None` selects the local fallback.
    pub fn new(store: Option<Arc<dyn ObjectStore>>) -> Self {
        Self {
            store,
            url_ttl: PRESIGNED_URL_TTL,
        }
    }

    /// Build an uploader from optional storage settings.
    pub async fn from_settings(settings: Option<&StorageSettings>) -> Self {
        match settings {
            Some(settings) => {
                let store = S3ObjectStore::from_settings(settings).await;
                Self::new(Some(Arc::new(store)))
            }
            None => {
                tracing::warn!("No bucket endpoint set, uploads go to '{SIMULATED_UPLOAD_DIR}'");
                Self::new(None)
            }
        }
    }

    /// Upload a single file and return its URL.
    pub async fn upload_file(&self, job_id: &str, path: &Path) -> Result<String, UploadError> {
        let short_id = short_id();
        let extension = extension(path);

        let Some(store) = &self.store else {
            let location = format!("{SIMULATED_UPLOAD_DIR}/{short_id}{extension}");
            tracing::info!(
                job_id,
                path = %path.display(),
                location = %location,
                "Simulated upload",
            );
            return Ok(location);
        };

        let key = remote_key(job_id, path, &short_id);
        store.put_file(&key, path).await?;
        let url = store.presign_get(&key, self.url_ttl).await?;

        tracing::info!(job_id, path = %path.display(), key = %key, "Uploaded file");
        Ok(url)
    }

    /// Upload every path concurrently.
    ///
    /// The result has one URL per path, in the order of `paths`. All
    /// uploads run to completion; if any failed, the first failure
    /// observed is returned and the other URLs are discarded.
    pub async fn upload_all(
        &self,
        job_id: &str,
        paths: Vec<PathBuf>,
    ) -> Result<Vec<String>, UploadError> {
        let mut slots: Vec<Option<String>> = vec![None; paths.len()];
        let mut tasks = JoinSet::new();

        for (index, path) in paths.into_iter().enumerate() {
            let uploader = self.clone();
            let job_id = job_id.to_string();
            tasks.spawn(async move { (index, uploader.upload_file(&job_id, &path).await) });
        }

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Ok(url))) => slots[index] = Some(url),
                Ok((index, Err(e))) => {
                    tracing::error!(job_id, index, error = %e, "Upload failed");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
                Err(e) => {
                    tracing::error!(job_id, error = %e, "Upload task panicked or was cancelled");
                    if first_error.is_none() {
                        first_error = Some(UploadError::Task(e.to_string()));
                    }
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        slots
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| UploadError::Task("upload slot left empty".to_string()))
    }
}

/// Random 8-character object name.
fn short_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(SHORT_ID_LEN);
    id
}

/// File extension including the leading dot, or empty.
fn extension(path: &Path) -> String {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default()
}

/// `{parent directory name}/{job id}/{short id}{extension}`.
fn remote_key(job_id: &str, path: &Path, short_id: &str) -> String {
    let extension = extension(path);
    match path
        .parent()
        .and_then(Path::file_name)
        .map(|dir| dir.to_string_lossy())
    {
        Some(dir) => format!("{dir}/{job_id}/{short_id}{extension}"),
        None => format!("{job_id}/{short_id}{extension}"),
    }
}
