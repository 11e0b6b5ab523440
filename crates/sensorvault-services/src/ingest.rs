//! Upload paths for series batches and files, plus metadata maintenance.
//!
//! Series writes go to the time-series store first and the metadata record is
//! created only after that succeeds. A metadata failure after a durable series
//! write surfaces as `PartiallyPersisted`; nothing is rolled back because the
//! time-series store has no delete-by-write primitive.

use chrono::Utc;
use sensorvault_core::constants::{DEV_ID_TAG, QUALITY_SCORE_FIELD, QUALITY_TAG, RESERVED_TAGS};
use sensorvault_core::validation::validate_filename;
use sensorvault_core::{
    Access, AppError, AppResult, CompleteUploadRequest, DataDetails, DataStatistics, DataType,
    DeleteOutcome, DeviceId, FileDetails, IdGenerator, Metadata, MetadataFilter, NewMetadata,
    Page, Point, Principal, RetryExecutor, SeriesDetails, UploadGrant, UploadGrantRequest,
    UploadSession,
};
use sensorvault_db::{DeviceRegistry, MetadataStore};
use sensorvault_storage::keys::{
    bucket_for_content_type, content_type_for_filename, filename_from_key, generate_object_key,
    key_belongs_to_device, validate_key,
};
use sensorvault_storage::Storage;
use sensorvault_timeseries::TimeSeriesStore;
use std::sync::Arc;
use std::time::Instant;
use validator::Validate;

use crate::permission::PermissionGate;
use crate::sink::{from_storage_error, from_timeseries_error};
use crate::upload_session::{NewSession, UploadSessionManager};

/// Apply batch metadata to raw points.
///
/// Injects the device and quality tags, fills in missing measurements and
/// staggers zero timestamps by batch index so no two points collide.
pub fn prepare_points(
    metadata: &NewMetadata,
    points: Vec<Point>,
) -> AppResult<(Vec<Point>, SeriesDetails)> {
    if points.is_empty() {
        return Err(AppError::InvalidInput(
            "At least one point is required".to_string(),
        ));
    }

    let default_measurement = metadata
        .measurement
        .as_deref()
        .filter(|m| !m.trim().is_empty())
        .unwrap_or(DataType::Series.as_str())
        .to_string();

    let mut prepared = Vec::with_capacity(points.len());
    for (index, mut point) in points.into_iter().enumerate() {
        if point.fields.is_empty() {
            return Err(AppError::InvalidInput(format!(
                "Point {} has no fields",
                index
            )));
        }
        if let Some(reserved) = RESERVED_TAGS.iter().find(|t| point.tags.contains_key(**t)) {
            return Err(AppError::InvalidInput(format!(
                "Point {} sets reserved tag '{}'",
                index, reserved
            )));
        }

        let quality = point
            .fields
            .get(QUALITY_SCORE_FIELD)
            .map(|value| value.to_string())
            .unwrap_or_else(|| metadata.quality_score.to_string());
        point.tags.insert(DEV_ID_TAG.to_string(), metadata.dev_id.to_string());
        point.tags.insert(QUALITY_TAG.to_string(), quality);

        if point.measurement.trim().is_empty() {
            point.measurement = default_measurement.clone();
        }
        if point.timestamp == 0 {
            point.timestamp = metadata.timestamp + index as i64;
        }
        prepared.push(point);
    }

    let first_timestamp = prepared.iter().map(|p| p.timestamp).min().unwrap_or_default();
    let last_timestamp = prepared.iter().map(|p| p.timestamp).max().unwrap_or_default();
    let details = SeriesDetails {
        measurement: prepared
            .first()
            .map(|p| p.measurement.clone())
            .unwrap_or(default_measurement),
        point_count: prepared.len(),
        first_timestamp,
        last_timestamp,
    };

    Ok((prepared, details))
}

/// Orchestrates both upload paths and owns the metadata write ordering
#[derive(Clone)]
pub struct IngestionCoordinator {
    gate: PermissionGate,
    devices: Arc<dyn DeviceRegistry>,
    metadata: Arc<dyn MetadataStore>,
    series: Arc<dyn TimeSeriesStore>,
    storage: Arc<dyn Storage>,
    sessions: UploadSessionManager,
    ids: Arc<dyn IdGenerator>,
    retry: RetryExecutor,
}

impl IngestionCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gate: PermissionGate,
        devices: Arc<dyn DeviceRegistry>,
        metadata: Arc<dyn MetadataStore>,
        series: Arc<dyn TimeSeriesStore>,
        storage: Arc<dyn Storage>,
        sessions: UploadSessionManager,
        ids: Arc<dyn IdGenerator>,
        retry: RetryExecutor,
    ) -> Self {
        Self {
            gate,
            devices,
            metadata,
            series,
            storage,
            sessions,
            ids,
            retry,
        }
    }

    async fn require_device(&self, dev_id: DeviceId) -> AppResult<()> {
        if self.devices.device_exists(dev_id).await? {
            Ok(())
        } else {
            Err(AppError::NotFound(format!("Device {} not found", dev_id)))
        }
    }

    /// Write a batch of points, then record its metadata. Returns the data id.
    #[tracing::instrument(skip(self, metadata, points), fields(uid = principal.uid, dev_id = %metadata.dev_id, point_count = points.len()))]
    pub async fn upload_series(
        &self,
        principal: &Principal,
        metadata: NewMetadata,
        points: Vec<Point>,
    ) -> AppResult<i64> {
        metadata.validate()?;
        self.gate
            .authorize(principal, metadata.dev_id, Access::Write)
            .await?;
        self.require_device(metadata.dev_id).await?;

        // A replayed idempotency key returns the existing record untouched
        if let Some(data_id) = metadata.data_id {
            if let Some(existing) = self.metadata.get(data_id).await? {
                if existing.dev_id != metadata.dev_id {
                    return Err(AppError::InvalidInput(format!(
                        "Data id {} belongs to another device",
                        data_id
                    )));
                }
                tracing::info!(data_id, "Series upload already recorded");
                return Ok(existing.data_id);
            }
        }

        let (points, details) = prepare_points(&metadata, points)?;
        let data_id = metadata.data_id.unwrap_or_else(|| self.ids.next_id());

        let start = Instant::now();
        let series = &self.series;
        let batch = points.as_slice();
        self.retry
            .run("write_points", move || series.write_points(batch))
            .await
            .map_err(from_timeseries_error)?;

        tracing::debug!(
            data_id,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Series batch written"
        );

        let record = Metadata {
            data_id,
            dev_id: metadata.dev_id,
            uid: principal.uid,
            quality_score: metadata.quality_score,
            timestamp: metadata.timestamp,
            details: DataDetails::Series(details),
        };

        match self.metadata.create(&record).await {
            Ok(stored) => {
                tracing::info!(data_id = stored.data_id, "Series upload recorded");
                Ok(stored.data_id)
            }
            Err(e) => {
                tracing::error!(
                    data_id,
                    dev_id = %metadata.dev_id,
                    error = %e,
                    "Series data written but metadata creation failed; series rows are orphaned"
                );
                Err(AppError::PartiallyPersisted {
                    data_id,
                    message: format!(
                        "series points are durable but have no metadata record: {}",
                        e
                    ),
                })
            }
        }
    }

    /// Hand out a presigned PUT location for a file upload
    #[tracing::instrument(skip(self, request), fields(uid = principal.uid, dev_id = %request.dev_id))]
    pub async fn issue_upload_grant(
        &self,
        principal: &Principal,
        request: UploadGrantRequest,
    ) -> AppResult<UploadGrant> {
        request.validate()?;
        validate_filename(&request.filename)?;
        self.gate
            .authorize(principal, request.dev_id, Access::Write)
            .await?;
        self.require_device(request.dev_id).await?;

        let content_type = request
            .content_type
            .clone()
            .unwrap_or_else(|| content_type_for_filename(&request.filename).to_string());
        let bucket = request
            .bucket
            .clone()
            .unwrap_or_else(|| bucket_for_content_type(&content_type).to_string());
        let object_key = generate_object_key(request.dev_id, Utc::now(), &request.filename);

        let (session, upload_url) = self
            .sessions
            .issue(NewSession {
                data_id: self.ids.next_id(),
                dev_id: request.dev_id,
                bucket,
                object_key,
                filename: request.filename,
                content_type,
                uid: principal.uid,
            })
            .await?;

        Ok(UploadGrant {
            upload_id: session.upload_id,
            upload_url,
            bucket: session.bucket,
            object_key: session.object_key,
            content_type: session.content_type,
            expires_in: self.sessions.ttl().as_secs(),
        })
    }

    /// Confirm a direct upload: verify the object, record metadata, consume the session
    #[tracing::instrument(skip(self, request), fields(uid = principal.uid, upload_id = %request.upload_id))]
    pub async fn complete_file_upload(
        &self,
        principal: &Principal,
        request: CompleteUploadRequest,
    ) -> AppResult<i64> {
        let CompleteUploadRequest {
            metadata,
            upload_id,
            bucket,
            object_key,
        } = request;

        metadata.validate()?;
        self.gate
            .authorize(principal, metadata.dev_id, Access::Write)
            .await?;

        let session = self.sessions.consume(&upload_id).await?;
        match self
            .record_file(principal, &metadata, &session, bucket, object_key)
            .await
        {
            Ok(data_id) => Ok(data_id),
            Err(e) => {
                // Nothing was persisted, the grant stays usable
                self.sessions.restore(session).await;
                Err(e)
            }
        }
    }

    async fn record_file(
        &self,
        principal: &Principal,
        metadata: &NewMetadata,
        session: &UploadSession,
        bucket: Option<String>,
        object_key: Option<String>,
    ) -> AppResult<i64> {
        if metadata.dev_id != session.dev_id {
            return Err(AppError::InvalidInput(format!(
                "Upload session {} was issued for device {}, not {}",
                session.upload_id, session.dev_id, metadata.dev_id
            )));
        }

        let bucket = bucket.unwrap_or_else(|| session.bucket.clone());
        let (object_key, filename) = match object_key {
            Some(key) => {
                validate_key(&key).map_err(from_storage_error)?;
                if !key_belongs_to_device(&key, session.dev_id) {
                    return Err(AppError::InvalidInput(format!(
                        "Object key {} is outside device {}",
                        key, session.dev_id
                    )));
                }
                let filename = filename_from_key(&key).to_string();
                (key, filename)
            }
            None => (session.object_key.clone(), session.filename.clone()),
        };

        let storage = &self.storage;
        let (b, k) = (bucket.as_str(), object_key.as_str());
        let exists = self
            .retry
            .run("object_exists", move || storage.exists(b, k))
            .await
            .map_err(from_storage_error)?;
        if !exists {
            return Err(AppError::NotFound(format!(
                "Uploaded object {}/{} not found",
                bucket, object_key
            )));
        }

        let record = Metadata {
            data_id: metadata.data_id.unwrap_or(session.data_id),
            dev_id: session.dev_id,
            uid: principal.uid,
            quality_score: metadata.quality_score,
            timestamp: metadata.timestamp,
            details: DataDetails::File(FileDetails {
                bucket,
                object_key,
                filename,
                content_type: session.content_type.clone(),
            }),
        };

        let stored = self.metadata.create(&record).await?;
        tracing::info!(data_id = stored.data_id, "File upload recorded");
        Ok(stored.data_id)
    }

    /// Delete a data unit. Series points are not physically removed.
    #[tracing::instrument(skip(self), fields(uid = principal.uid))]
    pub async fn delete_data(&self, principal: &Principal, data_id: i64) -> AppResult<DeleteOutcome> {
        let record = self
            .metadata
            .get(data_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Data {} not found", data_id)))?;

        self.gate
            .authorize(principal, record.dev_id, Access::Write)
            .await?;

        let outcome = match &record.details {
            DataDetails::Series(_) => {
                self.metadata.delete(data_id).await?;
                DeleteOutcome {
                    data_id,
                    data_type: DataType::Series,
                    payload_removed: false,
                    notice: Some(
                        "Series points remain in the time-series store until its retention policy expires them"
                            .to_string(),
                    ),
                }
            }
            DataDetails::File(file) => {
                let storage = &self.storage;
                let (b, k) = (file.bucket.as_str(), file.object_key.as_str());
                self.retry
                    .run("delete_object", move || storage.delete(b, k))
                    .await
                    .map_err(from_storage_error)?;
                self.metadata.delete(data_id).await?;
                DeleteOutcome {
                    data_id,
                    data_type: DataType::File,
                    payload_removed: true,
                    notice: None,
                }
            }
        };

        tracing::info!(data_id, data_type = %outcome.data_type, "Data deleted");
        Ok(outcome)
    }

    /// List metadata records. Non-admins must scope the listing to one device.
    pub async fn list_data(
        &self,
        principal: &Principal,
        filter: &MetadataFilter,
    ) -> AppResult<Page<Metadata>> {
        filter.validate()?;
        match filter.dev_id {
            Some(dev_id) => self.gate.authorize(principal, dev_id, Access::Read).await?,
            None if principal.is_admin() => {}
            None => {
                return Err(AppError::InvalidInput(
                    "dev_id is required to list data".to_string(),
                ))
            }
        }
        self.metadata.list(filter).await
    }

    pub async fn data_statistics(
        &self,
        principal: &Principal,
        dev_id: DeviceId,
    ) -> AppResult<DataStatistics> {
        self.gate.authorize(principal, dev_id, Access::Read).await?;
        self.metadata.statistics(dev_id).await
    }
}
