//! Shared key, bucket and content-type derivation for storage backends.
//!
//! Key format: `{dev_id}/{yyyy}/{mm}/{dd}/{filename}` with zero-padded month and day.

use chrono::{DateTime, Datelike, Utc};
use sensorvault_core::constants::{
    AUDIO_BUCKET, DEFAULT_CONTENT_TYPE, FILE_BUCKET, IMAGE_BUCKET, VIDEO_BUCKET,
};
use sensorvault_core::DeviceId;

use crate::traits::{StorageError, StorageResult};

/// Generate the object key for a device upload on the given date.
pub fn generate_object_key(dev_id: DeviceId, date: DateTime<Utc>, filename: &str) -> String {
    format!(
        "{}/{:04}/{:02}/{:02}/{}",
        dev_id,
        date.year(),
        date.month(),
        date.day(),
        filename
    )
}

/// Whether `key` belongs to the device (`"{dev_id}/"` prefix).
pub fn key_belongs_to_device(key: &str, dev_id: DeviceId) -> bool {
    key.starts_with(&dev_id.object_prefix())
}

/// Last path segment of a key
pub fn filename_from_key(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// Reject keys that could escape the device namespace.
pub fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey("key cannot be empty".to_string()));
    }
    if key.starts_with('/') {
        return Err(StorageError::InvalidKey(format!(
            "key must not start with '/': {}",
            key
        )));
    }
    if key.split('/').any(|segment| segment == "..") {
        return Err(StorageError::InvalidKey(format!(
            "key must not contain '..': {}",
            key
        )));
    }
    Ok(())
}

/// Bucket for a content type: image/video/audio families get their own bucket.
pub fn bucket_for_content_type(content_type: &str) -> &'static str {
    let family = content_type
        .split('/')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match family.as_str() {
        "image" => IMAGE_BUCKET,
        "video" => VIDEO_BUCKET,
        "audio" => AUDIO_BUCKET,
        _ => FILE_BUCKET,
    }
}

/// Content type from the file extension, `application/octet-stream` when unknown.
pub fn content_type_for_filename(filename: &str) -> &'static str {
    let extension = match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => ext.to_ascii_lowercase(),
        _ => return DEFAULT_CONTENT_TYPE,
    };

    match extension.as_str() {
        // Images
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "svg" => "image/svg+xml",
        // Video
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "h264" => "video/h264",
        // Audio
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "flac" => "audio/flac",
        "ogg" => "audio/ogg",
        "m4a" => "audio/mp4",
        "aac" => "audio/aac",
        // Documents and data
        "pdf" => "application/pdf",
        "json" => "application/json",
        "csv" => "text/csv",
        "txt" | "log" => "text/plain",
        "zip" => "application/zip",
        _ => DEFAULT_CONTENT_TYPE,
    }
}
