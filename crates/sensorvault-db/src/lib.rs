//! Database repositories for the metadata store and the permission source
//!
//! Each sink is exposed as an async trait (`MetadataStore`, `PermissionSource`,
//! `DeviceRegistry`) so services hold `Arc<dyn ...>` and tests can substitute
//! in-memory fakes. The PostgreSQL implementations use dynamic sqlx queries.

pub mod device;
pub mod device_user;
pub mod metadata;
pub mod setup;

pub use device::{DeviceRegistry, DeviceRepository};
pub use device_user::{DeviceUserRepository, PermissionSource};
pub use metadata::{MetadataRepository, MetadataStore};
pub use setup::{connect, run_migrations};
