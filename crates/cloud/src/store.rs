//! Object storage seam and its S3-compatible implementation.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use relay_core::config::StorageSettings;

use crate::uploader::UploadError;

/// Provider name reported by the static credentials.
const CREDENTIALS_PROVIDER: &str = "relay-environment";

/// The two storage operations the relay needs.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload the file at `path` under `key`.
    async fn put_file(&self, key: &str, path: &Path) -> Result<(), UploadError>;

    /// Produce a pre-signed GET URL for `key` valid for `expires_in`.
    async fn presign_get(&self, key: &str, expires_in: Duration) -> Result<String, UploadError>;
}

/// [`ObjectStore`] backed by any S3-compatible service.
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3ObjectStore {
    /// Build a client from static settings (endpoint, key pair, bucket).
    pub async fn from_settings(settings: &StorageSettings) -> Self {
        let credentials = Credentials::new(
            settings.access_key_id.clone(),
            settings.secret_access_key.clone(),
            None,
            None,
            CREDENTIALS_PROVIDER,
        );

        let shared = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()))
            .endpoint_url(settings.endpoint_url.clone())
            .credentials_provider(credentials)
            .load()
            .await;

        tracing::info!(
            endpoint = %settings.endpoint_url,
            bucket = %settings.bucket_name,
            "Object storage configured",
        );

        Self {
            client: aws_sdk_s3::Client::new(&shared),
            bucket: settings.bucket_name.clone(),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put_file(&self, key: &str, path: &Path) -> Result<(), UploadError> {
        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| UploadError::Read {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| UploadError::Put {
                key: key.to_string(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        Ok(())
    }

    async fn presign_get(&self, key: &str, expires_in: Duration) -> Result<String, UploadError> {
        let presign_error = |message: String| UploadError::Presign {
            key: key.to_string(),
            message,
        };

        let config =
            PresigningConfig::expires_in(expires_in).map_err(|e| presign_error(e.to_string()))?;
        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(config)
            .await
            .map_err(|e| presign_error(DisplayErrorContext(&e).to_string()))?;

        Ok(request.uri().to_string())
    }
}
