//! Shared constants

/// Bucket for `image/*` uploads
pub const IMAGE_BUCKET: &str = "image";
/// Bucket for `video/*` uploads
pub const VIDEO_BUCKET: &str = "video";
/// Bucket for `audio/*` uploads
pub const AUDIO_BUCKET: &str = "audio";
/// Bucket for every other content type
pub const FILE_BUCKET: &str = "file";

/// Buckets ensured at start-up
pub const WELL_KNOWN_BUCKETS: [&str; 4] = [IMAGE_BUCKET, VIDEO_BUCKET, AUDIO_BUCKET, FILE_BUCKET];

/// Tag carrying the device id on every series point
pub const DEV_ID_TAG: &str = "dev_id";
/// Tag carrying the quality score on every series point
pub const QUALITY_TAG: &str = "quality";
/// Field a point may carry to override the batch quality score
pub const QUALITY_SCORE_FIELD: &str = "quality_score";

/// Tags the ingestion path owns; callers cannot set them through fields
pub const RESERVED_TAGS: [&str; 2] = [DEV_ID_TAG, QUALITY_TAG];

/// Maximum number of users bound to one device
pub const MAX_BINDINGS_PER_DEVICE: i64 = 3;

/// Records with a quality score below this are counted as abnormal
pub const ABNORMAL_QUALITY_THRESHOLD: f64 = 30.0;

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Upper bound on upload filenames (characters)
pub const MAX_FILENAME_LENGTH: u64 = 255;

/// Bounds on the upload grant lifetime
pub const MIN_UPLOAD_SESSION_TTL_SECS: u64 = 15 * 60;
pub const MAX_UPLOAD_SESSION_TTL_SECS: u64 = 30 * 60;

/// Maximum page size accepted by listing operations
pub const MAX_PAGE_SIZE: u32 = 1000;
