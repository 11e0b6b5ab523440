use async_trait::async_trait;
use sensorvault_core::constants::ABNORMAL_QUALITY_THRESHOLD;
use sensorvault_core::{
    AppError, DataDetails, DataStatistics, DeviceId, Metadata, MetadataFilter, Page,
};
use serde_json::json;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};

/// Persistence of metadata records
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert a record; if `data_id` already exists the stored record is returned unchanged
    async fn create(&self, metadata: &Metadata) -> Result<Metadata, AppError>;

    async fn get(&self, data_id: i64) -> Result<Option<Metadata>, AppError>;

    async fn list(&self, filter: &MetadataFilter) -> Result<Page<Metadata>, AppError>;

    /// Returns whether a record was removed
    async fn delete(&self, data_id: i64) -> Result<bool, AppError>;

    async fn statistics(&self, dev_id: DeviceId) -> Result<DataStatistics, AppError>;
}

#[derive(Clone)]
pub struct MetadataRepository {
    pool: PgPool,
}

impl MetadataRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Split details into the `data_type` / `extra_data` column pair
pub fn details_to_columns(details: &DataDetails) -> Result<(String, serde_json::Value), AppError> {
    let extra_data = match details {
        DataDetails::Series(series) => serde_json::to_value(series)?,
        DataDetails::File(file) => serde_json::to_value(file)?,
    };
    Ok((details.data_type().as_str().to_string(), extra_data))
}

/// Rebuild details from the `data_type` / `extra_data` column pair
pub fn details_from_columns(
    data_type: &str,
    extra_data: serde_json::Value,
) -> Result<DataDetails, AppError> {
    serde_json::from_value(json!({
        "data_type": data_type,
        "extra_data": extra_data,
    }))
    .map_err(|e| {
        AppError::Internal(format!(
            "Stored metadata has malformed {} details: {}",
            data_type, e
        ))
    })
}

fn metadata_from_row(row: &PgRow) -> Result<Metadata, AppError> {
    let data_type: String = row.try_get("data_type")?;
    let extra_data: serde_json::Value = row.try_get("extra_data")?;

    Ok(Metadata {
        data_id: row.try_get("data_id")?,
        dev_id: DeviceId(row.try_get("dev_id")?),
        uid: row.try_get("uid")?,
        quality_score: row.try_get("quality_score")?,
        timestamp: row.try_get("timestamp")?,
        details: details_from_columns(&data_type, extra_data)?,
    })
}

/// Append the WHERE clause for a listing filter
pub fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &MetadataFilter) {
    builder.push(" WHERE TRUE");
    if let Some(dev_id) = filter.dev_id {
        builder.push(" AND dev_id = ").push_bind(dev_id.0);
    }
    if let Some(uid) = filter.uid {
        builder.push(" AND uid = ").push_bind(uid);
    }
    if let Some(data_type) = filter.data_type {
        builder
            .push(" AND data_type = ")
            .push_bind(data_type.as_str().to_string());
    }
    if let Some(start) = filter.start_time {
        builder.push(" AND timestamp >= ").push_bind(start);
    }
    if let Some(end) = filter.end_time {
        builder.push(" AND timestamp <= ").push_bind(end);
    }
    if let Some(min) = filter.min_quality {
        builder.push(" AND quality_score >= ").push_bind(min);
    }
    if let Some(max) = filter.max_quality {
        builder.push(" AND quality_score <= ").push_bind(max);
    }
}

const SELECT_COLUMNS: &str =
    "SELECT data_id, dev_id, uid, data_type, quality_score, extra_data, timestamp FROM metadata";

#[async_trait]
impl MetadataStore for MetadataRepository {
    async fn create(&self, metadata: &Metadata) -> Result<Metadata, AppError> {
        let (data_type, extra_data) = details_to_columns(&metadata.details)?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO metadata (data_id, dev_id, uid, data_type, quality_score, extra_data, timestamp)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (data_id) DO NOTHING
            "#,
        )
        .bind(metadata.data_id)
        .bind(metadata.dev_id.0)
        .bind(metadata.uid)
        .bind(data_type)
        .bind(metadata.quality_score)
        .bind(extra_data)
        .bind(metadata.timestamp)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted == 0 {
            tracing::debug!(data_id = metadata.data_id, "Metadata already exists");
        }

        self.get(metadata.data_id).await?.ok_or_else(|| {
            AppError::Internal(format!(
                "Metadata {} missing after insert",
                metadata.data_id
            ))
        })
    }

    async fn get(&self, data_id: i64) -> Result<Option<Metadata>, AppError> {
        let row = sqlx::query(&format!("{} WHERE data_id = $1", SELECT_COLUMNS))
            .bind(data_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(metadata_from_row).transpose()
    }

    async fn list(&self, filter: &MetadataFilter) -> Result<Page<Metadata>, AppError> {
        let mut count_query = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM metadata");
        push_filter(&mut count_query, filter);
        let total: i64 = count_query
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;

        let mut query = QueryBuilder::<Postgres>::new(SELECT_COLUMNS);
        push_filter(&mut query, filter);
        // Sort column and direction come from closed enums
        query.push(format!(
            " ORDER BY {} {}, data_id {}",
            filter.sort_by.column(),
            filter.sort_order.keyword(),
            filter.sort_order.keyword()
        ));
        query
            .push(" LIMIT ")
            .push_bind(i64::from(filter.page_size))
            .push(" OFFSET ")
            .push_bind(filter.offset());

        let rows = query.build().fetch_all(&self.pool).await?;
        let items = rows
            .iter()
            .map(metadata_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page {
            items,
            total: total.max(0) as u64,
            page: filter.page,
            page_size: filter.page_size,
        })
    }

    async fn delete(&self, data_id: i64) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM metadata WHERE data_id = $1")
            .bind(data_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn statistics(&self, dev_id: DeviceId) -> Result<DataStatistics, AppError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE quality_score < $2) AS abnormal
            FROM metadata
            WHERE dev_id = $1
            "#,
        )
        .bind(dev_id.0)
        .bind(ABNORMAL_QUALITY_THRESHOLD)
        .fetch_one(&self.pool)
        .await?;

        Ok(DataStatistics {
            dev_id,
            total: row.try_get("total")?,
            abnormal: row.try_get("abnormal")?,
        })
    }
}
