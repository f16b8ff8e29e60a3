//! AWS S3 storage implementation.
//!
//! Each key is one object under `{bucket}/{prefix}/`. `PutObject` replaces an
//! object in a single step, which gives the per-key atomicity snapshots need.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;

use crate::error::{AppError, Result};
use crate::storage::KeyValueStore;

/// S3-backed key-value store.
#[derive(Debug, Clone)]
pub struct S3Storage {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3Storage {
    /// Create a new S3 storage instance.
    pub fn new(client: Client, bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            prefix: prefix.into(),
        }
    }

    /// Create S3 storage from environment configuration.
    pub async fn from_env() -> Result<Self> {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let client = Client::new(&config);

        let bucket = std::env::var("MONITOR_BUCKET")
            .map_err(|_| AppError::config("MONITOR_BUCKET is not set"))?;
        let prefix = std::env::var("MONITOR_PREFIX").unwrap_or_else(|_| "sitemap-monitor".to_string());

        log::info!("Using s3://{}/{}", bucket, prefix);
        Ok(Self::new(client, bucket, prefix))
    }

    fn object_key(&self, key: &str) -> String {
        let prefix = self.prefix.trim_end_matches('/');
        if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", prefix, key)
        }
    }
}

#[async_trait]
impl KeyValueStore for S3Storage {
    async fn read_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let object_key = self.object_key(key);
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .send()
            .await;

        match result {
            Ok(output) => {
                let bytes = output
                    .body
                    .collect()
                    .await
                    .map_err(|e| AppError::store(key, e))?;
                Ok(Some(bytes.into_bytes().to_vec()))
            }
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_no_such_key() {
                    log::debug!("No object at s3://{}/{}", self.bucket, object_key);
                    Ok(None)
                } else {
                    Err(AppError::store(key, service_err))
                }
            }
        }
    }

    async fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let object_key = self.object_key(key);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .body(ByteStream::from(bytes.to_vec()))
            .content_type("application/json")
            .send()
            .await
            .map_err(|e| AppError::store(key, e.into_service_error()))?;

        log::debug!("Wrote {} bytes to s3://{}/{}", bytes.len(), self.bucket, object_key);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        // DeleteObject succeeds for missing keys
        let object_key = self.object_key(key);
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .send()
            .await
            .map_err(|e| AppError::store(key, e.into_service_error()))?;

        log::debug!("Deleted s3://{}/{}", self.bucket, object_key);
        Ok(())
    }
}
