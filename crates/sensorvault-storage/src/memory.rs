//! In-memory object store for local development and tests.
//!
//! Presigned URLs use the `memory://{bucket}/{key}` scheme; uploads are
//! simulated with [`MemoryStorage::put_object`].

use crate::keys::validate_key;
use crate::traits::{ObjectInfo, Storage, StorageError, StorageResult};
use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    content_type: String,
    last_modified: DateTime<Utc>,
}

type Buckets = HashMap<String, BTreeMap<String, StoredObject>>;

/// Object store kept entirely in process memory
#[derive(Clone, Default)]
pub struct MemoryStorage {
    buckets: Arc<RwLock<Buckets>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object, creating the bucket if needed (stands in for a client PUT)
    pub async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        data: impl Into<Bytes>,
    ) -> StorageResult<()> {
        validate_key(key)?;
        let mut buckets = self.buckets.write().await;
        buckets.entry(bucket.to_string()).or_default().insert(
            key.to_string(),
            StoredObject {
                data: data.into(),
                content_type: content_type.to_string(),
                last_modified: Utc::now(),
            },
        );
        Ok(())
    }

    /// Object bytes and content type, for assertions
    pub async fn get_object(&self, bucket: &str, key: &str) -> Option<(Bytes, String)> {
        let buckets = self.buckets.read().await;
        buckets
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .map(|object| (object.data.clone(), object.content_type.clone()))
    }

    pub async fn has_bucket(&self, bucket: &str) -> bool {
        self.buckets.read().await.contains_key(bucket)
    }

    fn presigned_url(method: &str, bucket: &str, key: &str, expires_in: Duration) -> String {
        format!(
            "memory://{}/{}?method={}&expires_in={}",
            bucket,
            key,
            method,
            expires_in.as_secs()
        )
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn ensure_bucket(&self, bucket: &str) -> StorageResult<()> {
        let mut buckets = self.buckets.write().await;
        if !buckets.contains_key(bucket) {
            buckets.insert(bucket.to_string(), BTreeMap::new());
            tracing::info!(bucket = %bucket, "Bucket created");
        }
        Ok(())
    }

    async fn presigned_put_url(
        &self,
        bucket: &str,
        key: &str,
        _content_type: &str,
        expires_in: Duration,
    ) -> StorageResult<String> {
        validate_key(key)?;
        Ok(Self::presigned_url("PUT", bucket, key, expires_in))
    }

    async fn presigned_get_url(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
        download_as: Option<&str>,
    ) -> StorageResult<String> {
        validate_key(key)?;
        let url = Self::presigned_url("GET", bucket, key, expires_in);
        Ok(match download_as {
            Some(filename) => format!("{}&attachment={}", url, filename),
            None => url,
        })
    }

    async fn exists(&self, bucket: &str, key: &str) -> StorageResult<bool> {
        let buckets = self.buckets.read().await;
        Ok(buckets
            .get(bucket)
            .map(|objects| objects.contains_key(key))
            .unwrap_or(false))
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: Option<&str>,
    ) -> StorageResult<Vec<ObjectInfo>> {
        let buckets = self.buckets.read().await;
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| StorageError::NotFound(format!("bucket {}", bucket)))?;

        Ok(objects
            .iter()
            .filter(|(key, _)| prefix.map_or(true, |p| key.starts_with(p)))
            .map(|(key, object)| ObjectInfo {
                key: key.clone(),
                size: object.data.len() as u64,
                last_modified: Some(object.last_modified),
            })
            .collect())
    }

    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()> {
        let mut buckets = self.buckets.write().await;
        if let Some(objects) = buckets.get_mut(bucket) {
            objects.remove(key);
        }
        Ok(())
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Memory
    }
}
