use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::device::DeviceId;
use super::metadata::NewMetadata;

/// Pending direct upload, held in memory until consumed or expired
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadSession {
    pub upload_id: String,
    /// Assigned at grant time so a retried completion reuses it
    pub data_id: i64,
    pub dev_id: DeviceId,
    pub bucket: String,
    pub object_key: String,
    pub filename: String,
    pub content_type: String,
    pub uid: i64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl UploadSession {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Request for a presigned upload location
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UploadGrantRequest {
    pub dev_id: DeviceId,
    /// Original filename
    #[validate(length(
        min = 1,
        max = 255,
        message = "Filename must be between 1 and 255 characters"
    ))]
    pub filename: String,
    /// Bucket override; derived from the content type when absent
    #[serde(default)]
    #[validate(length(
        min = 3,
        max = 63,
        message = "Bucket must be between 3 and 63 characters"
    ))]
    pub bucket: Option<String>,
    /// Content type override; derived from the extension when absent
    #[serde(default)]
    #[validate(length(
        min = 1,
        max = 255,
        message = "Content type must be between 1 and 255 characters"
    ))]
    pub content_type: Option<String>,
}

/// Presigned upload location handed back to the device
#[derive(Debug, Clone, Serialize)]
pub struct UploadGrant {
    /// Token to quote when completing the upload
    pub upload_id: String,
    /// Presigned PUT URL
    pub upload_url: String,
    pub bucket: String,
    pub object_key: String,
    pub content_type: String,
    /// Seconds until the grant expires
    pub expires_in: u64,
}

/// Confirmation that a direct upload finished
#[derive(Debug, Clone, Deserialize)]
pub struct CompleteUploadRequest {
    pub metadata: NewMetadata,
    pub upload_id: String,
    /// Overrides the bucket recorded in the session
    #[serde(default)]
    pub bucket: Option<String>,
    /// Overrides the object key recorded in the session
    #[serde(default)]
    pub object_key: Option<String>,
}
