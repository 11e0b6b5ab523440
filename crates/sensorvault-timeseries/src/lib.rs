//! Sensorvault Time-Series Library
//!
//! Everything that speaks to the time-series store:
//!
//! - `line_protocol`: point encoding (and decoding) in InfluxDB line protocol
//! - `query`: read planning (validation, downsampling, SQL construction) and row decoding
//! - `client`: the `TimeSeriesStore` trait and the InfluxDB 3 HTTP client

pub mod client;
pub mod error;
pub mod line_protocol;
pub mod query;

pub use client::{InfluxDb3Client, Row, TimeSeriesStore};
pub use error::{TimeSeriesError, TimeSeriesResult};
pub use query::{decode_rows, plan, Aggregate, QueryOptions, QueryPlan, QueryShape};
