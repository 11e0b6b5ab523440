//! Sensorvault Services Layer
//!
//! The ingestion-and-query coordination layer: permission checks, upload
//! sessions, the two-sink write path, time-series reads and the file
//! catalog. Every sink is an injected `Arc<dyn ...>`; [`Services`] is the
//! composition root that builds the real ones from [`sensorvault_core::Config`].

pub mod file_catalog;
pub mod ingest;
pub mod permission;
pub mod query;
pub mod setup;
pub mod sink;
pub mod telemetry;
pub mod upload_session;

pub use file_catalog::{FileCatalog, FileEntry};
pub use ingest::IngestionCoordinator;
pub use permission::PermissionGate;
pub use query::QueryService;
pub use setup::{Services, Sinks};
pub use telemetry::init_tracing;
pub use upload_session::{NewSession, UploadSessionManager};

pub use sensorvault_db::{DeviceRegistry, MetadataStore, PermissionSource};
pub use sensorvault_storage::{Storage, StorageError};
pub use sensorvault_timeseries::{QueryOptions, TimeSeriesStore};
