use async_trait::async_trait;
use sensorvault_core::constants::MAX_BINDINGS_PER_DEVICE;
use sensorvault_core::{AppError, DeviceBinding, DeviceId, PermissionLevel};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

/// Lookup and maintenance of device-user bindings
#[async_trait]
pub trait PermissionSource: Send + Sync {
    /// Binding of `uid` to `dev_id`, active or not
    async fn binding(&self, uid: i64, dev_id: DeviceId)
        -> Result<Option<DeviceBinding>, AppError>;

    async fn bindings_for_user(&self, uid: i64) -> Result<Vec<DeviceBinding>, AppError>;

    /// Add a binding; fails on duplicates and when the device is at its binding limit
    async fn bind(&self, binding: &DeviceBinding) -> Result<(), AppError>;
}

#[derive(Clone)]
pub struct DeviceUserRepository {
    pool: PgPool,
}

impl DeviceUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn binding_from_row(row: &PgRow) -> Result<DeviceBinding, AppError> {
    let level: String = row.try_get("permission_level")?;
    let permission_level: PermissionLevel = level
        .parse()
        .map_err(|e: anyhow::Error| AppError::Internal(e.to_string()))?;

    Ok(DeviceBinding {
        uid: row.try_get("uid")?,
        dev_id: DeviceId(row.try_get("dev_id")?),
        permission_level,
        is_active: row.try_get("is_active")?,
    })
}

#[async_trait]
impl PermissionSource for DeviceUserRepository {
    async fn binding(
        &self,
        uid: i64,
        dev_id: DeviceId,
    ) -> Result<Option<DeviceBinding>, AppError> {
        let row = sqlx::query(
            r#"
            SELECT uid, dev_id, permission_level, is_active
            FROM device_users
            WHERE uid = $1 AND dev_id = $2
            "#,
        )
        .bind(uid)
        .bind(dev_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(binding_from_row).transpose()
    }

    async fn bindings_for_user(&self, uid: i64) -> Result<Vec<DeviceBinding>, AppError> {
        let rows = sqlx::query(
            r#"
            SELECT uid, dev_id, permission_level, is_active
            FROM device_users
            WHERE uid = $1
            ORDER BY dev_id
            "#,
        )
        .bind(uid)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(binding_from_row).collect()
    }

    async fn bind(&self, binding: &DeviceBinding) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        // Row lock on the device serializes concurrent binds for it
        let device: Option<i64> =
            sqlx::query_scalar("SELECT dev_id FROM devices WHERE dev_id = $1 FOR UPDATE")
                .bind(binding.dev_id.0)
                .fetch_optional(&mut *tx)
                .await?;
        if device.is_none() {
            return Err(AppError::NotFound(format!(
                "Device {} not found",
                binding.dev_id
            )));
        }

        let existing: Vec<i64> =
            sqlx::query_scalar("SELECT uid FROM device_users WHERE dev_id = $1")
                .bind(binding.dev_id.0)
                .fetch_all(&mut *tx)
                .await?;

        if existing.contains(&binding.uid) {
            return Err(AppError::InvalidInput(format!(
                "User {} is already bound to device {}",
                binding.uid, binding.dev_id
            )));
        }
        if existing.len() as i64 >= MAX_BINDINGS_PER_DEVICE {
            return Err(AppError::InvalidInput(format!(
                "Device {} already has the maximum of {} bound users",
                binding.dev_id, MAX_BINDINGS_PER_DEVICE
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO device_users (dev_id, uid, permission_level, is_active)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(binding.dev_id.0)
        .bind(binding.uid)
        .bind(binding.permission_level.as_str())
        .bind(binding.is_active)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            dev_id = %binding.dev_id,
            uid = binding.uid,
            permission_level = %binding.permission_level,
            "Device binding created"
        );
        Ok(())
    }
}
