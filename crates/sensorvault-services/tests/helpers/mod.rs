//! Test helpers: in-memory sinks and a fully wired `Services`.
//!
//! Run with `cargo test -p sensorvault-services`. No external services are needed:
//! object storage is `MemoryStorage`, everything else is a fake defined here.

#![allow(dead_code)]

use async_trait::async_trait;
use sensorvault_core::constants::ABNORMAL_QUALITY_THRESHOLD;
use sensorvault_core::{
    AppError, DataStatistics, DeviceBinding, DeviceId, IdGenerator, IngestConfig, Metadata,
    MetadataFilter, Page, PermissionLevel, Point, SinkConfig, SortField, SortOrder,
};
use sensorvault_services::{DeviceRegistry, MetadataStore, PermissionSource, Services, Sinks};
use sensorvault_storage::MemoryStorage;
use sensorvault_timeseries::{Row, TimeSeriesError, TimeSeriesResult, TimeSeriesStore};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const DEVICE: DeviceId = DeviceId(7);
pub const OTHER_DEVICE: DeviceId = DeviceId(8);

/// uid bound to DEVICE with `rw`
pub const WRITER_UID: i64 = 1;
/// uid bound to DEVICE with `r`
pub const READER_UID: i64 = 2;
/// uid with no binding at all
pub const STRANGER_UID: i64 = 3;

/// Records writes and queries; failures can be queued per call
#[derive(Default)]
pub struct FakeTimeSeries {
    pub written: Mutex<Vec<Point>>,
    pub queries: Mutex<Vec<String>>,
    pub rows: Mutex<Vec<Row>>,
    pub write_calls: AtomicUsize,
    failures: Mutex<VecDeque<TimeSeriesError>>,
}

impl FakeTimeSeries {
    pub fn fail_next(&self, err: TimeSeriesError) {
        self.failures.lock().unwrap().push_back(err);
    }

    pub fn set_rows(&self, json: &str) {
        *self.rows.lock().unwrap() = serde_json::from_str(json).unwrap();
    }

    pub fn written(&self) -> Vec<Point> {
        self.written.lock().unwrap().clone()
    }

    fn take_failure(&self) -> Option<TimeSeriesError> {
        self.failures.lock().unwrap().pop_front()
    }
}

#[async_trait]
impl TimeSeriesStore for FakeTimeSeries {
    async fn write_points(&self, points: &[Point]) -> TimeSeriesResult<()> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        self.written.lock().unwrap().extend_from_slice(points);
        Ok(())
    }

    async fn query(&self, sql: &str) -> TimeSeriesResult<Vec<Row>> {
        self.queries.lock().unwrap().push(sql.to_string());
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        Ok(self.rows.lock().unwrap().clone())
    }
}

/// Metadata kept in a map; creation can be made to fail
#[derive(Default)]
pub struct FakeMetadata {
    pub records: Mutex<BTreeMap<i64, Metadata>>,
    pub fail_creates: AtomicBool,
}

impl FakeMetadata {
    pub fn get_sync(&self, data_id: i64) -> Option<Metadata> {
        self.records.lock().unwrap().get(&data_id).cloned()
    }

    pub fn count(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

fn matches_filter(record: &Metadata, filter: &MetadataFilter) -> bool {
    filter.dev_id.map_or(true, |d| record.dev_id == d)
        && filter.uid.map_or(true, |u| record.uid == u)
        && filter.data_type.map_or(true, |t| record.data_type() == t)
        && filter.start_time.map_or(true, |s| record.timestamp >= s)
        && filter.end_time.map_or(true, |e| record.timestamp <= e)
        && filter.min_quality.map_or(true, |q| record.quality_score >= q)
        && filter.max_quality.map_or(true, |q| record.quality_score <= q)
}

#[async_trait]
impl MetadataStore for FakeMetadata {
    async fn create(&self, metadata: &Metadata) -> Result<Metadata, AppError> {
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(AppError::Internal("metadata store is down".to_string()));
        }
        let mut records = self.records.lock().unwrap();
        Ok(records
            .entry(metadata.data_id)
            .or_insert_with(|| metadata.clone())
            .clone())
    }

    async fn get(&self, data_id: i64) -> Result<Option<Metadata>, AppError> {
        Ok(self.get_sync(data_id))
    }

    async fn list(&self, filter: &MetadataFilter) -> Result<Page<Metadata>, AppError> {
        let mut matching: Vec<Metadata> = self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|r| matches_filter(r, filter))
            .cloned()
            .collect();

        matching.sort_by(|a, b| {
            let ordering = match filter.sort_by {
                SortField::Timestamp => a.timestamp.cmp(&b.timestamp),
                SortField::QualityScore => a.quality_score.total_cmp(&b.quality_score),
                SortField::DataId => a.data_id.cmp(&b.data_id),
            };
            match filter.sort_order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            }
        });

        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(filter.offset() as usize)
            .take(filter.page_size as usize)
            .collect();
        Ok(Page {
            items,
            total,
            page: filter.page,
            page_size: filter.page_size,
        })
    }

    async fn delete(&self, data_id: i64) -> Result<bool, AppError> {
        Ok(self.records.lock().unwrap().remove(&data_id).is_some())
    }

    async fn statistics(&self, dev_id: DeviceId) -> Result<DataStatistics, AppError> {
        let records = self.records.lock().unwrap();
        let owned: Vec<_> = records.values().filter(|r| r.dev_id == dev_id).collect();
        Ok(DataStatistics {
            dev_id,
            total: owned.len() as i64,
            abnormal: owned
                .iter()
                .filter(|r| r.quality_score < ABNORMAL_QUALITY_THRESHOLD)
                .count() as i64,
        })
    }
}

#[derive(Default)]
pub struct FakePermissions {
    pub bindings: Mutex<Vec<DeviceBinding>>,
}

#[async_trait]
impl PermissionSource for FakePermissions {
    async fn binding(&self, uid: i64, dev_id: DeviceId) -> Result<Option<DeviceBinding>, AppError> {
        Ok(self
            .bindings
            .lock()
            .unwrap()
            .iter()
            .find(|b| b.uid == uid && b.dev_id == dev_id)
            .cloned())
    }

    async fn bindings_for_user(&self, uid: i64) -> Result<Vec<DeviceBinding>, AppError> {
        Ok(self
            .bindings
            .lock()
            .unwrap()
            .iter()
            .filter(|b| b.uid == uid)
            .cloned()
            .collect())
    }

    async fn bind(&self, binding: &DeviceBinding) -> Result<(), AppError> {
        self.bindings.lock().unwrap().push(binding.clone());
        Ok(())
    }
}

pub struct FakeDevices(pub HashSet<DeviceId>);

#[async_trait]
impl DeviceRegistry for FakeDevices {
    async fn device_exists(&self, dev_id: DeviceId) -> Result<bool, AppError> {
        Ok(self.0.contains(&dev_id))
    }
}

/// Deterministic ids starting at 1
#[derive(Default)]
pub struct SequentialIds(AtomicI64);

impl IdGenerator for SequentialIds {
    fn next_id(&self) -> i64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

pub struct TestHarness {
    pub services: Services,
    pub storage: MemoryStorage,
    pub series: Arc<FakeTimeSeries>,
    pub metadata: Arc<FakeMetadata>,
    pub permissions: Arc<FakePermissions>,
}

/// Fast retries so failure tests stay quick
pub fn test_sink_config() -> SinkConfig {
    SinkConfig {
        timeout_ms: 1000,
        max_retries: 2,
        retry_base_delay_ms: 1,
    }
}

pub fn harness() -> TestHarness {
    harness_with(IngestConfig::default())
}

pub fn harness_with(ingest: IngestConfig) -> TestHarness {
    let storage = MemoryStorage::new();
    let series = Arc::new(FakeTimeSeries::default());
    let metadata = Arc::new(FakeMetadata::default());
    let permissions = Arc::new(FakePermissions::default());
    {
        let mut bindings = permissions.bindings.lock().unwrap();
        bindings.push(DeviceBinding {
            uid: WRITER_UID,
            dev_id: DEVICE,
            permission_level: PermissionLevel::Rw,
            is_active: true,
        });
        bindings.push(DeviceBinding {
            uid: READER_UID,
            dev_id: DEVICE,
            permission_level: PermissionLevel::R,
            is_active: true,
        });
    }

    let sinks = Sinks {
        metadata: metadata.clone(),
        permissions: permissions.clone(),
        devices: Arc::new(FakeDevices([DEVICE, OTHER_DEVICE].into_iter().collect())),
        series: series.clone(),
        storage: Arc::new(storage.clone()),
        ids: Arc::new(SequentialIds::default()),
    };

    let services = Services::assemble(sinks, &test_sink_config(), &ingest, 6000);

    TestHarness {
        services,
        storage,
        series,
        metadata,
        permissions,
    }
}
