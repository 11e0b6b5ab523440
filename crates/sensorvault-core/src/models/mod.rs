//! Data models for the ingestion and query layer
//!
//! Organized by domain: device access, series points, metadata records and
//! upload sessions.

mod device;
mod metadata;
mod series;
mod upload;

pub use device::*;
pub use metadata::*;
pub use series::*;
pub use upload::*;
