//! Composition root: builds every sink client once and wires the services

use anyhow::{Context, Result};
use sensorvault_core::constants::WELL_KNOWN_BUCKETS;
use sensorvault_core::{Config, IdGenerator, IngestConfig, RetryExecutor, SinkConfig, Snowflake};
use sensorvault_db::{
    DeviceRegistry, DeviceRepository, DeviceUserRepository, MetadataRepository, MetadataStore,
    PermissionSource,
};
use sensorvault_storage::{create_storage, Storage};
use sensorvault_timeseries::{InfluxDb3Client, TimeSeriesStore};
use sqlx::PgPool;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::file_catalog::FileCatalog;
use crate::ingest::IngestionCoordinator;
use crate::permission::PermissionGate;
use crate::query::QueryService;
use crate::upload_session::UploadSessionManager;

/// The external collaborators every service is built from
#[derive(Clone)]
pub struct Sinks {
    pub metadata: Arc<dyn MetadataStore>,
    pub permissions: Arc<dyn PermissionSource>,
    pub devices: Arc<dyn DeviceRegistry>,
    pub series: Arc<dyn TimeSeriesStore>,
    pub storage: Arc<dyn Storage>,
    pub ids: Arc<dyn IdGenerator>,
}

pub struct Services {
    pub ingest: IngestionCoordinator,
    pub queries: QueryService,
    pub files: FileCatalog,
    pub permissions: PermissionGate,
    pub sessions: UploadSessionManager,
    pub sinks: Sinks,
    pool: Option<PgPool>,
    cancel: CancellationToken,
    sweeper: JoinHandle<()>,
}

impl Services {
    /// Connect to PostgreSQL, the time-series store and the object store, then assemble.
    pub async fn initialize(config: &Config) -> Result<Self> {
        let pool = sensorvault_db::connect(config).await?;
        sensorvault_db::run_migrations(&pool).await?;

        let storage = create_storage(&config.storage)
            .await
            .context("Failed to initialize object storage")?;
        tracing::info!(backend = %storage.backend_type(), "Object storage initialized");

        let series = InfluxDb3Client::new(&config.timeseries, config.sink.timeout())
            .context("Failed to initialize time-series client")?;
        if let Err(e) = series.ping().await {
            tracing::warn!(error = %e, host = %config.timeseries.host, "Time-series store not reachable at start-up");
        }

        let sinks = Sinks {
            metadata: Arc::new(MetadataRepository::new(pool.clone())),
            permissions: Arc::new(DeviceUserRepository::new(pool.clone())),
            devices: Arc::new(DeviceRepository::new(pool.clone())),
            series: Arc::new(series),
            storage,
            ids: Arc::new(Snowflake::from_node_ids(
                config.snowflake_machine_id,
                config.snowflake_datacenter_id,
            )),
        };

        let mut services = Self::assemble(
            sinks,
            &config.sink,
            &config.ingest,
            config.timeseries.query_limit_points,
        );
        services.pool = Some(pool);
        services.ensure_buckets().await;

        tracing::info!(environment = %config.environment, "Services initialized");
        Ok(services)
    }

    /// Wire services over already-built sinks and start the session sweeper.
    pub fn assemble(
        sinks: Sinks,
        sink: &SinkConfig,
        ingest: &IngestConfig,
        query_limit_points: u32,
    ) -> Self {
        let retry = RetryExecutor::from_config(sink);
        let permissions = PermissionGate::new(sinks.permissions.clone());
        let sessions = UploadSessionManager::new(
            sinks.storage.clone(),
            retry.clone(),
            ingest.upload_session_ttl(),
        );

        let ingest_service = IngestionCoordinator::new(
            permissions.clone(),
            sinks.devices.clone(),
            sinks.metadata.clone(),
            sinks.series.clone(),
            sinks.storage.clone(),
            sessions.clone(),
            sinks.ids.clone(),
            retry.clone(),
        );
        let queries = QueryService::new(
            permissions.clone(),
            sinks.series.clone(),
            retry.clone(),
            query_limit_points,
        );
        let files = FileCatalog::new(
            permissions.clone(),
            sinks.storage.clone(),
            retry,
            ingest.preview_url_ttl(),
            ingest.download_url_ttl(),
        );

        let cancel = CancellationToken::new();
        let sweeper = sessions.spawn_sweeper(ingest.sweep_interval(), cancel.clone());

        Self {
            ingest: ingest_service,
            queries,
            files,
            permissions,
            sessions,
            sinks,
            pool: None,
            cancel,
            sweeper,
        }
    }

    /// Create the well-known buckets; failures are logged, not fatal
    pub async fn ensure_buckets(&self) {
        for bucket in WELL_KNOWN_BUCKETS {
            if let Err(e) = self.sinks.storage.ensure_bucket(bucket).await {
                tracing::warn!(bucket, error = %e, "Failed to ensure bucket");
            }
        }
    }

    /// Stop the sweeper and close the database pool
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.sweeper.await {
            tracing::warn!(error = %e, "Upload session sweeper did not stop cleanly");
        }
        if let Some(pool) = self.pool {
            pool.close().await;
        }
        tracing::info!("Services shut down");
    }
}
