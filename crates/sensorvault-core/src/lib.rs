//! Sensorvault Core Library
//!
//! This crate provides the domain models, error types, configuration and the
//! small runtime primitives (retry executor, ID generator) shared by every
//! Sensorvault component.

pub mod config;
pub mod constants;
pub mod error;
pub mod id;
pub mod models;
pub mod retry;
pub mod storage_types;
pub mod validation;

// Re-export commonly used types
pub use config::{Config, IngestConfig, SinkConfig, StorageConfig, TimeSeriesConfig};
pub use error::{AppError, AppResult, ErrorMetadata, LogLevel};
pub use id::{IdGenerator, Snowflake};
pub use models::{
    Access, CompleteUploadRequest, DataDetails, DataStatistics, DataType, DeleteOutcome,
    DeviceBinding, DeviceId, FieldValue, FileDetails, Metadata, MetadataFilter, NewMetadata, Page,
    PermissionLevel, Point, Principal, Role, SeriesDetails, SortField, SortOrder, UploadGrant,
    UploadGrantRequest, UploadSession,
};
pub use retry::{RetryClassify, RetryExecutor};
pub use storage_types::StorageBackend;
