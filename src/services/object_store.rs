//! Authenticated access to the S3-compatible bucket (R2 / Storj).
//!
//! Everything that talks to the bucket goes through the `ObjectStorage`
//! trait so the upload writer, resolver fallback, and deletion coordinator
//! can be exercised against an in-memory store in tests. The production
//! implementation wraps a `rust-s3` bucket client built once at startup.

use crate::config::StorageConfig;
use async_trait::async_trait;
use bytes::Bytes;
use s3::Bucket;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::region::Region;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error("object store error: {0}")]
    Backend(String),
}

/// An object fetched through the authenticated path. The content type comes
/// from the stored object's metadata when the backend reports one.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub bytes: Bytes,
    pub content_type: Option<String>,
}

/// Blob operations against the configured bucket.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Write (create or overwrite) an object with the given content type.
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<(), StoreError>;

    /// Read an object. Returns `StoreError::NotFound` if absent.
    async fn get(&self, key: &str) -> Result<StoredObject, StoreError>;

    /// Delete an object. No-op if absent.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

pub struct S3Backend {
    bucket: Box<Bucket>,
}

impl std::fmt::Debug for S3Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Backend").finish_non_exhaustive()
    }
}

impl S3Backend {
    /// Build a bucket client from the storage configuration. Callers must
    /// only invoke this when `config.has_credentials()` holds.
    pub fn new(config: &StorageConfig) -> Result<Self, StoreError> {
        let endpoint = config
            .endpoint_url()
            .ok_or_else(|| StoreError::Backend("storage endpoint required".into()))?;
        let region = Region::Custom {
            region: config.region.clone(),
            endpoint,
        };

        let credentials = Credentials::new(
            config.access_key_id.as_deref(),
            config.secret_access_key.as_deref(),
            None,
            None,
            None,
        )
        .map_err(|e| StoreError::Backend(format!("credentials: {e}")))?;

        let bucket_name = config
            .bucket
            .as_deref()
            .ok_or_else(|| StoreError::Backend("bucket name required".into()))?;

        let mut bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StoreError::Backend(format!("bucket: {e}")))?;
        bucket.set_path_style();

        Ok(Self { bucket })
    }
}

fn map_s3_error(e: S3Error) -> StoreError {
    StoreError::Backend(format!("s3: {e}"))
}

#[async_trait]
impl ObjectStorage for S3Backend {
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<(), StoreError> {
        let response = self
            .bucket
            .put_object_with_content_type(key, &data, content_type)
            .await
            .map_err(map_s3_error)?;
        if response.status_code() >= 300 {
            return Err(StoreError::Backend(format!(
                "s3 put {}: status {}",
                key,
                response.status_code()
            )));
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<StoredObject, StoreError> {
        let response = self.bucket.get_object(key).await.map_err(map_s3_error)?;
        if response.status_code() == 404 {
            return Err(StoreError::NotFound(key.to_string()));
        }
        if response.status_code() >= 400 {
            return Err(StoreError::Backend(format!(
                "s3 get {}: status {}",
                key,
                response.status_code()
            )));
        }
        let content_type = response.headers().get("content-type").cloned();
        Ok(StoredObject {
            bytes: Bytes::from(response.to_vec()),
            content_type,
        })
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.bucket.delete_object(key).await.map_err(map_s3_error)?;
        Ok(())
    }
}
