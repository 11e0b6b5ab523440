//! Storage abstraction trait
//!
//! This module defines the Storage trait that all object store backends must implement.

use crate::StorageBackend;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sensorvault_core::RetryClassify;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Presign failed: {0}")]
    PresignFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("Bucket operation failed: {0}")]
    BucketFailed(String),

    /// Network failure, throttling or a 5xx from the backend
    #[error("Storage backend unavailable: {0}")]
    Unavailable(String),

    #[error("Storage operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl RetryClassify for StorageError {
    fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Unavailable(_) | StorageError::Timeout(_))
    }

    fn timed_out(after: Duration) -> Self {
        StorageError::Timeout(after)
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// One entry of a bucket listing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Storage abstraction trait
///
/// All object store backends must implement this trait. Every call names its
/// bucket explicitly because payloads are spread over one bucket per content
/// family.
///
/// **Key format:** `{dev_id}/{yyyy}/{mm}/{dd}/{filename}`. See the crate root documentation.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Create the bucket if it does not exist yet
    async fn ensure_bucket(&self, bucket: &str) -> StorageResult<()>;

    /// Generate a presigned PUT URL for a direct upload
    async fn presigned_put_url(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> StorageResult<String>;

    /// Generate a presigned GET URL
    ///
    /// With `download_as` set, the response carries
    /// `Content-Disposition: attachment; filename="..."` so browsers save the file.
    async fn presigned_get_url(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
        download_as: Option<&str>,
    ) -> StorageResult<String>;

    /// Check if an object exists
    async fn exists(&self, bucket: &str, key: &str) -> StorageResult<bool>;

    /// List every object in the bucket (recursively), optionally under a prefix
    async fn list_objects(&self, bucket: &str, prefix: Option<&str>)
        -> StorageResult<Vec<ObjectInfo>>;

    /// Delete an object by key
    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()>;

    /// Get the storage backend type
    fn backend_type(&self) -> StorageBackend;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(StorageError::Unavailable("connection refused".into()).is_retryable());
        assert!(StorageError::timed_out(Duration::from_secs(5)).is_retryable());
        assert!(!StorageError::NotFound("7/a.jpg".into()).is_retryable());
        assert!(!StorageError::PresignFailed("bad expiry".into()).is_retryable());
        assert!(!StorageError::BackendError("AccessDenied".into()).is_retryable());
    }
}
