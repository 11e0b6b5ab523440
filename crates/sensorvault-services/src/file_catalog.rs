use chrono::{DateTime, Utc};
use sensorvault_core::constants::MAX_PAGE_SIZE;
use sensorvault_core::{Access, AppError, AppResult, DeviceId, Page, Principal, RetryExecutor};
use sensorvault_storage::keys::{filename_from_key, key_belongs_to_device, validate_key};
use sensorvault_storage::Storage;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::permission::PermissionGate;
use crate::sink::from_storage_error;

/// One stored object with a time-boxed preview link
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileEntry {
    pub key: String,
    pub filename: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
    pub preview_url: String,
}

/// Device-scoped browsing of objects already in the object store
#[derive(Clone)]
pub struct FileCatalog {
    gate: PermissionGate,
    storage: Arc<dyn Storage>,
    retry: RetryExecutor,
    preview_ttl: Duration,
    download_ttl: Duration,
}

impl FileCatalog {
    pub fn new(
        gate: PermissionGate,
        storage: Arc<dyn Storage>,
        retry: RetryExecutor,
        preview_ttl: Duration,
        download_ttl: Duration,
    ) -> Self {
        Self {
            gate,
            storage,
            retry,
            preview_ttl,
            download_ttl,
        }
    }

    /// List a device's objects in `bucket`, one page at a time.
    ///
    /// `total` counts the device's objects; a page past the end is empty.
    #[tracing::instrument(skip(self), fields(uid = principal.uid))]
    pub async fn list(
        &self,
        principal: &Principal,
        bucket: &str,
        dev_id: DeviceId,
        page: u32,
        page_size: u32,
    ) -> AppResult<Page<FileEntry>> {
        if page == 0 {
            return Err(AppError::InvalidInput("Page must be at least 1".to_string()));
        }
        if page_size == 0 || page_size > MAX_PAGE_SIZE {
            return Err(AppError::InvalidInput(format!(
                "Page size must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }
        self.gate.authorize(principal, dev_id, Access::Read).await?;

        let storage = &self.storage;
        let prefix = dev_id.object_prefix();
        let scope = prefix.as_str();
        let objects = self
            .retry
            .run("list_objects", move || storage.list_objects(bucket, Some(scope)))
            .await
            .map_err(from_storage_error)?;

        // Backends may ignore the prefix hint
        let owned: Vec<_> = objects
            .into_iter()
            .filter(|object| key_belongs_to_device(&object.key, dev_id))
            .collect();
        let total = owned.len() as u64;

        let skip = (page as usize - 1).saturating_mul(page_size as usize);
        let mut items = Vec::new();
        for object in owned.into_iter().skip(skip).take(page_size as usize) {
            let key = object.key.as_str();
            let ttl = self.preview_ttl;
            let preview_url = self
                .retry
                .run("presigned_get_url", move || {
                    storage.presigned_get_url(bucket, key, ttl, None)
                })
                .await
                .map_err(from_storage_error)?;

            items.push(FileEntry {
                filename: filename_from_key(&object.key).to_string(),
                key: object.key,
                size: object.size,
                last_modified: object.last_modified,
                preview_url,
            });
        }

        tracing::debug!(bucket, total, returned = items.len(), "Files listed");
        Ok(Page {
            items,
            total,
            page,
            page_size,
        })
    }

    /// Short-lived link that downloads the object as an attachment
    pub async fn download_url(
        &self,
        principal: &Principal,
        dev_id: DeviceId,
        bucket: &str,
        key: &str,
    ) -> AppResult<String> {
        validate_key(key).map_err(from_storage_error)?;
        if !key_belongs_to_device(key, dev_id) {
            return Err(AppError::InvalidInput(format!(
                "Object key {} is outside device {}",
                key, dev_id
            )));
        }
        self.gate.authorize(principal, dev_id, Access::Read).await?;

        let storage = &self.storage;
        let ttl = self.download_ttl;
        let filename = filename_from_key(key);
        self.retry
            .run("presigned_get_url", move || {
                storage.presigned_get_url(bucket, key, ttl, Some(filename))
            })
            .await
            .map_err(from_storage_error)
    }
}
