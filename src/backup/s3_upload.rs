// pgsnapshot/src/backup/s3_upload.rs
use std::path::Path;

use async_trait::async_trait;
use aws_sdk_s3 as s3;
use s3::config::{BehaviorVersion, Credentials, Region};
use s3::error::DisplayErrorContext;
use s3::primitives::ByteStream;
use tracing::info;

use super::storage::ObjectStore;
use crate::config::S3Config;
use crate::errors::{BackupError, BoxError, Result};

/// Uploads artifacts to S3 or an S3-compatible service (DigitalOcean
/// Spaces, MinIO).
pub struct S3Store {
    client: s3::Client,
    bucket: String,
    folder_prefix: Option<String>,
}

impl S3Store {
    /// Builds the client. Static credentials are used when configured,
    /// otherwise the default AWS provider chain.
    pub async fn connect(config: &S3Config) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));
        if let Some(endpoint) = &config.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        if let (Some(key_id), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
            loader = loader.credentials_provider(Credentials::new(key_id, secret, None, None, "Static"));
        }
        let sdk_config = loader.load().await;

        // Custom endpoints rarely support virtual-hosted bucket names.
        let s3_config = s3::config::Builder::from(&sdk_config)
            .force_path_style(config.endpoint_url.is_some())
            .build();

        S3Store {
            client: s3::Client::from_conf(s3_config),
            bucket: config.bucket_name.clone(),
            folder_prefix: config.folder_prefix.clone(),
        }
    }

    fn fail<E>(&self, key: &str, error: E) -> BackupError
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let message = DisplayErrorContext(&error).to_string();
        BackupError::Transfer {
            destination: self.destination(),
            key: key.to_string(),
            message,
            source: Some(BoxError::from(error)),
        }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    fn destination(&self) -> String {
        format!("s3://{}", self.bucket)
    }

    fn object_key(&self, filename: &str) -> String {
        object_key(self.folder_prefix.as_deref(), filename)
    }

    async fn upload(&self, key: &str, path: &Path) -> Result<String> {
        info!(
            file = %path.display(),
            bucket = %self.bucket,
            key,
            "uploading artifact"
        );

        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| self.fail(key, e))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| self.fail(key, e))?;

        Ok(format!("s3://{}/{}", self.bucket, key))
    }

    async fn check(&self) -> Result<()> {
        // HeadBucket needs only access to the target bucket, unlike ListBuckets.
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| self.fail("<check>", e))?;
        info!(bucket = %self.bucket, "target bucket is accessible");
        Ok(())
    }
}

/// `folder/filename`, tolerating stray slashes around the folder.
pub fn object_key(folder_prefix: Option<&str>, filename: &str) -> String {
    match folder_prefix.map(|p| p.trim_matches('/')) {
        Some(folder) if !folder.is_empty() => format!("{folder}/{filename}"),
        _ => filename.to_string(),
    }
}
