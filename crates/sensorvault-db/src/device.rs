use async_trait::async_trait;
use sensorvault_core::{AppError, DeviceId};
use sqlx::PgPool;

/// Existence checks against the device registry
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    async fn device_exists(&self, dev_id: DeviceId) -> Result<bool, AppError>;
}

#[derive(Clone)]
pub struct DeviceRepository {
    pool: PgPool,
}

impl DeviceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeviceRegistry for DeviceRepository {
    async fn device_exists(&self, dev_id: DeviceId) -> Result<bool, AppError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM devices WHERE dev_id = $1)")
                .bind(dev_id.0)
                .fetch_one(&self.pool)
                .await?;

        Ok(exists)
    }
}
