//! Sensorvault Storage Library
//!
//! This crate provides the object store abstraction used for binary sensor
//! payloads (images, audio, video and other files). It includes the `Storage`
//! trait and implementations for S3-compatible stores (MinIO, AWS) and an
//! in-memory store.
//!
//! # Object layout
//!
//! Objects live in one bucket per content family (`image`, `video`, `audio`,
//! `file`) under device-scoped keys:
//!
//! - `{dev_id}/{yyyy}/{mm}/{dd}/{filename}`
//!
//! Keys must not contain `..` or a leading `/`. Key, bucket and content-type
//! derivation is centralized in the `keys` module so all backends stay consistent.

pub mod factory;
pub mod keys;
#[cfg(feature = "storage-memory")]
pub mod memory;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod traits;

// Re-export commonly used types
pub use factory::create_storage;
#[cfg(feature = "storage-memory")]
pub use memory::MemoryStorage;
#[cfg(feature = "storage-s3")]
pub use s3::S3Storage;
pub use sensorvault_core::StorageBackend;
pub use traits::{ObjectInfo, Storage, StorageError, StorageResult};
