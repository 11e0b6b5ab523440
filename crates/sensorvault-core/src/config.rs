//! Configuration module
//!
//! This module provides the configuration structures for the ingestion and
//! query layer: metadata database, time-series store, object store, sink retry
//! policy and upload session lifetimes. Everything is read from environment
//! variables (optionally seeded from a `.env` file).

use std::env;
use std::time::Duration;

use crate::constants::{MAX_UPLOAD_SESSION_TTL_SECS, MIN_UPLOAD_SESSION_TTL_SECS};
use crate::storage_types::StorageBackend;

// Common constants
const MAX_CONNECTIONS: u32 = 20;
const CONNECTION_TIMEOUT_SECS: u64 = 30;
const INFLUXDB_HOST: &str = "http://localhost:8181";
const INFLUXDB_DATABASE: &str = "sensors";
const S3_REGION: &str = "us-east-1";
const UPLOAD_SESSION_TTL_SECS: u64 = 1800;
const UPLOAD_SESSION_SWEEP_INTERVAL_SECS: u64 = 60;
const PREVIEW_URL_TTL_SECS: u64 = 1800;
const DOWNLOAD_URL_TTL_SECS: u64 = 300;
const SINK_TIMEOUT_MS: u64 = 5000;
const SINK_MAX_RETRIES: u32 = 3;
const SINK_RETRY_BASE_DELAY_MS: u64 = 200;
const QUERY_LIMIT_POINTS: u32 = 6000;
const WRITE_BATCH_SIZE: usize = 5000;

/// Time-series store (InfluxDB 3) connection settings
#[derive(Clone, Debug)]
pub struct TimeSeriesConfig {
    pub host: String,
    pub token: Option<String>,
    pub database: String,
    /// Default point budget for queries that do not set one
    pub query_limit_points: u32,
    /// Maximum number of points per write request
    pub write_batch_size: usize,
}

/// Object store settings
#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub s3_endpoint: Option<String>, // MinIO or another S3-compatible provider
    pub s3_region: String,
    pub aws_access_key_id: Option<String>,
    pub aws_secret_access_key: Option<String>,
}

/// Retry policy applied to every sink call
#[derive(Clone, Debug)]
pub struct SinkConfig {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
}

impl SinkConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            timeout_ms: SINK_TIMEOUT_MS,
            max_retries: SINK_MAX_RETRIES,
            retry_base_delay_ms: SINK_RETRY_BASE_DELAY_MS,
        }
    }
}

/// Upload grant and link lifetimes
#[derive(Clone, Debug)]
pub struct IngestConfig {
    pub upload_session_ttl_secs: u64,
    pub upload_session_sweep_interval_secs: u64,
    pub preview_url_ttl_secs: u64,
    pub download_url_ttl_secs: u64,
}

impl IngestConfig {
    pub fn upload_session_ttl(&self) -> Duration {
        Duration::from_secs(self.upload_session_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.upload_session_sweep_interval_secs)
    }

    pub fn preview_url_ttl(&self) -> Duration {
        Duration::from_secs(self.preview_url_ttl_secs)
    }

    pub fn download_url_ttl(&self) -> Duration {
        Duration::from_secs(self.download_url_ttl_secs)
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            upload_session_ttl_secs: UPLOAD_SESSION_TTL_SECS,
            upload_session_sweep_interval_secs: UPLOAD_SESSION_SWEEP_INTERVAL_SECS,
            preview_url_ttl_secs: PREVIEW_URL_TTL_SECS,
            download_url_ttl_secs: DOWNLOAD_URL_TTL_SECS,
        }
    }
}

/// Application configuration.
#[derive(Clone, Debug)]
pub struct Config {
    pub environment: String,
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
    pub timeseries: TimeSeriesConfig,
    pub storage: StorageConfig,
    pub sink: SinkConfig,
    pub ingest: IngestConfig,
    pub snowflake_machine_id: Option<u8>,
    pub snowflake_datacenter_id: Option<u8>,
}

impl Config {
    /// Check if the application is running in production mode
    pub fn is_production(&self) -> bool {
        self.environment.to_lowercase() == "production"
    }

    pub fn from_env() -> Result<Self, anyhow::Error> {
        // Missing .env is fine; variables may come from the process environment
        let _ = dotenvy::dotenv();

        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;

        let storage_backend = env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| StorageBackend::S3.to_string())
            .parse::<StorageBackend>()?;

        let config = Config {
            environment,
            database_url,
            db_max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| MAX_CONNECTIONS.to_string())
                .parse()
                .unwrap_or(MAX_CONNECTIONS),
            db_timeout_seconds: env::var("DB_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| CONNECTION_TIMEOUT_SECS.to_string())
                .parse()
                .unwrap_or(CONNECTION_TIMEOUT_SECS),
            timeseries: TimeSeriesConfig {
                host: env::var("INFLUXDB_HOST").unwrap_or_else(|_| INFLUXDB_HOST.to_string()),
                token: env::var("INFLUXDB_TOKEN").ok().filter(|t| !t.is_empty()),
                database: env::var("INFLUXDB_DATABASE")
                    .unwrap_or_else(|_| INFLUXDB_DATABASE.to_string()),
                query_limit_points: env::var("QUERY_LIMIT_POINTS")
                    .unwrap_or_else(|_| QUERY_LIMIT_POINTS.to_string())
                    .parse()
                    .unwrap_or(QUERY_LIMIT_POINTS),
                write_batch_size: env::var("WRITE_BATCH_SIZE")
                    .unwrap_or_else(|_| WRITE_BATCH_SIZE.to_string())
                    .parse()
                    .unwrap_or(WRITE_BATCH_SIZE),
            },
            storage: StorageConfig {
                backend: storage_backend,
                s3_endpoint: env::var("S3_ENDPOINT").ok().filter(|e| !e.is_empty()),
                s3_region: env::var("S3_REGION").unwrap_or_else(|_| S3_REGION.to_string()),
                aws_access_key_id: env::var("AWS_ACCESS_KEY_ID").ok(),
                aws_secret_access_key: env::var("AWS_SECRET_ACCESS_KEY").ok(),
            },
            sink: SinkConfig {
                timeout_ms: env::var("SINK_TIMEOUT_MS")
                    .unwrap_or_else(|_| SINK_TIMEOUT_MS.to_string())
                    .parse()
                    .unwrap_or(SINK_TIMEOUT_MS),
                max_retries: env::var("SINK_MAX_RETRIES")
                    .unwrap_or_else(|_| SINK_MAX_RETRIES.to_string())
                    .parse()
                    .unwrap_or(SINK_MAX_RETRIES),
                retry_base_delay_ms: env::var("SINK_RETRY_BASE_DELAY_MS")
                    .unwrap_or_else(|_| SINK_RETRY_BASE_DELAY_MS.to_string())
                    .parse()
                    .unwrap_or(SINK_RETRY_BASE_DELAY_MS),
            },
            ingest: IngestConfig {
                upload_session_ttl_secs: env::var("UPLOAD_SESSION_TTL_SECS")
                    .unwrap_or_else(|_| UPLOAD_SESSION_TTL_SECS.to_string())
                    .parse()
                    .unwrap_or(UPLOAD_SESSION_TTL_SECS),
                upload_session_sweep_interval_secs: env::var("UPLOAD_SESSION_SWEEP_INTERVAL_SECS")
                    .unwrap_or_else(|_| UPLOAD_SESSION_SWEEP_INTERVAL_SECS.to_string())
                    .parse()
                    .unwrap_or(UPLOAD_SESSION_SWEEP_INTERVAL_SECS),
                preview_url_ttl_secs: env::var("PREVIEW_URL_TTL_SECS")
                    .unwrap_or_else(|_| PREVIEW_URL_TTL_SECS.to_string())
                    .parse()
                    .unwrap_or(PREVIEW_URL_TTL_SECS),
                download_url_ttl_secs: env::var("DOWNLOAD_URL_TTL_SECS")
                    .unwrap_or_else(|_| DOWNLOAD_URL_TTL_SECS.to_string())
                    .parse()
                    .unwrap_or(DOWNLOAD_URL_TTL_SECS),
            },
            snowflake_machine_id: env::var("SNOWFLAKE_MACHINE_ID")
                .ok()
                .and_then(|v| v.parse().ok()),
            snowflake_datacenter_id: env::var("SNOWFLAKE_DATACENTER_ID")
                .ok()
                .and_then(|v| v.parse().ok()),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if !self.database_url.starts_with("postgres://")
            && !self.database_url.starts_with("postgresql://")
        {
            return Err(anyhow::anyhow!(
                "DATABASE_URL must be a valid PostgreSQL connection string"
            ));
        }

        if !self.timeseries.host.starts_with("http://")
            && !self.timeseries.host.starts_with("https://")
        {
            return Err(anyhow::anyhow!("INFLUXDB_HOST must be an http(s) URL"));
        }

        if self.timeseries.database.is_empty() {
            return Err(anyhow::anyhow!("INFLUXDB_DATABASE must not be empty"));
        }

        if self.timeseries.write_batch_size == 0 {
            return Err(anyhow::anyhow!("WRITE_BATCH_SIZE must be greater than 0"));
        }

        let ttl = self.ingest.upload_session_ttl_secs;
        if !(MIN_UPLOAD_SESSION_TTL_SECS..=MAX_UPLOAD_SESSION_TTL_SECS).contains(&ttl) {
            return Err(anyhow::anyhow!(
                "UPLOAD_SESSION_TTL_SECS must be between {} and {}",
                MIN_UPLOAD_SESSION_TTL_SECS,
                MAX_UPLOAD_SESSION_TTL_SECS
            ));
        }

        if self.ingest.upload_session_sweep_interval_secs == 0 {
            return Err(anyhow::anyhow!(
                "UPLOAD_SESSION_SWEEP_INTERVAL_SECS must be greater than 0"
            ));
        }

        if self.sink.timeout_ms == 0 {
            return Err(anyhow::anyhow!("SINK_TIMEOUT_MS must be greater than 0"));
        }

        if let Some(datacenter_id) = self.snowflake_datacenter_id {
            if datacenter_id > 31 {
                return Err(anyhow::anyhow!("SNOWFLAKE_DATACENTER_ID must be in 0..=31"));
            }
        }

        if let Some(machine_id) = self.snowflake_machine_id {
            if machine_id > 31 {
                return Err(anyhow::anyhow!("SNOWFLAKE_MACHINE_ID must be in 0..=31"));
            }
        }

        if self.storage.backend == StorageBackend::S3
            && self.storage.aws_access_key_id.is_some() != self.storage.aws_secret_access_key.is_some()
        {
            return Err(anyhow::anyhow!(
                "AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY must be set together"
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            environment: "test".to_string(),
            database_url: "postgresql://localhost/sensorvault".to_string(),
            db_max_connections: MAX_CONNECTIONS,
            db_timeout_seconds: CONNECTION_TIMEOUT_SECS,
            timeseries: TimeSeriesConfig {
                host: INFLUXDB_HOST.to_string(),
                token: None,
                database: INFLUXDB_DATABASE.to_string(),
                query_limit_points: QUERY_LIMIT_POINTS,
                write_batch_size: WRITE_BATCH_SIZE,
            },
            storage: StorageConfig {
                backend: StorageBackend::Memory,
                s3_endpoint: None,
                s3_region: S3_REGION.to_string(),
                aws_access_key_id: None,
                aws_secret_access_key: None,
            },
            sink: SinkConfig::default(),
            ingest: IngestConfig::default(),
            snowflake_machine_id: None,
            snowflake_datacenter_id: None,
        }
    }

    #[test]
    fn test_defaults_validate() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn test_rejects_session_ttl_outside_bounds() {
        let mut config = test_config();
        config.ingest.upload_session_ttl_secs = 60;
        assert!(config.validate().is_err());

        config.ingest.upload_session_ttl_secs = 3600;
        assert!(config.validate().is_err());

        config.ingest.upload_session_ttl_secs = 900;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_non_postgres_url() {
        let mut config = test_config();
        config.database_url = "mysql://localhost/db".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_out_of_range_node_ids() {
        let mut config = test_config();
        config.snowflake_datacenter_id = Some(32);
        assert!(config.validate().is_err());

        let mut config = test_config();
        config.snowflake_machine_id = Some(32);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sink_durations() {
        let sink = SinkConfig::default();
        assert_eq!(sink.timeout(), Duration::from_secs(5));
        assert_eq!(sink.base_delay(), Duration::from_millis(200));
    }
}
