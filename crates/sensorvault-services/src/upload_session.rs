//! Single-use, time-boxed upload grants for direct-to-object-store uploads.
//!
//! Sessions live only in process memory. One mutex guards the table; no
//! object store call is made while it is held. Expired sessions are removed by
//! a periodic sweeper and remembered as tombstones for one more TTL so that a
//! late completion still gets `UploadExpired` instead of `NotFound`.

use chrono::{DateTime, Utc};
use sensorvault_core::{AppError, AppResult, DeviceId, RetryExecutor, UploadSession};
use sensorvault_storage::Storage;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::sink::from_storage_error;

const UPLOAD_ID_LENGTH: usize = 32;

/// Everything a session needs except the fields the manager assigns
#[derive(Debug, Clone)]
pub struct NewSession {
    pub data_id: i64,
    pub dev_id: DeviceId,
    pub bucket: String,
    pub object_key: String,
    pub filename: String,
    pub content_type: String,
    pub uid: i64,
}

#[derive(Default)]
struct SessionTable {
    live: HashMap<String, UploadSession>,
    /// upload_id -> when the tombstone itself can be dropped
    tombstones: HashMap<String, DateTime<Utc>>,
}

impl SessionTable {
    fn bury(&mut self, upload_id: String, expires_at: DateTime<Utc>, ttl: chrono::Duration) {
        self.tombstones.insert(upload_id, expires_at + ttl);
    }
}

#[derive(Clone)]
pub struct UploadSessionManager {
    storage: Arc<dyn Storage>,
    retry: RetryExecutor,
    ttl: Duration,
    table: Arc<Mutex<SessionTable>>,
    counter: Arc<AtomicU64>,
}

impl UploadSessionManager {
    pub fn new(storage: Arc<dyn Storage>, retry: RetryExecutor, ttl: Duration) -> Self {
        Self {
            storage,
            retry,
            ttl,
            table: Arc::new(Mutex::new(SessionTable::default())),
            counter: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn chrono_ttl(&self) -> AppResult<chrono::Duration> {
        chrono::Duration::from_std(self.ttl)
            .map_err(|e| AppError::Internal(format!("Invalid upload session TTL: {}", e)))
    }

    /// Opaque token derived from the session identity and issue time
    fn generate_upload_id(&self, session: &NewSession, issued_at: DateTime<Utc>) -> String {
        let sequence = self.counter.fetch_add(1, Ordering::Relaxed);
        let mut hasher = Sha256::new();
        hasher.update(
            format!(
                "{}:{}:{}:{}:{}",
                session.dev_id,
                session.object_key,
                session.uid,
                issued_at.timestamp_nanos_opt().unwrap_or_default(),
                sequence
            )
            .as_bytes(),
        );
        let mut upload_id = hex::encode(hasher.finalize());
        upload_id.truncate(UPLOAD_ID_LENGTH);
        upload_id
    }

    /// Create the bucket if needed, presign a PUT for the key, then record the session.
    ///
    /// Returns the stored session and the presigned URL.
    #[tracing::instrument(skip(self, new), fields(dev_id = %new.dev_id, bucket = %new.bucket, key = %new.object_key))]
    pub async fn issue(&self, new: NewSession) -> AppResult<(UploadSession, String)> {
        let storage = &self.storage;
        let (bucket, key, content_type) = (
            new.bucket.as_str(),
            new.object_key.as_str(),
            new.content_type.as_str(),
        );
        let ttl = self.ttl;

        self.retry
            .run("ensure_bucket", move || storage.ensure_bucket(bucket))
            .await
            .map_err(from_storage_error)?;

        let upload_url = self
            .retry
            .run("presigned_put_url", move || {
                storage.presigned_put_url(bucket, key, content_type, ttl)
            })
            .await
            .map_err(from_storage_error)?;

        let created_at = Utc::now();
        let session = UploadSession {
            upload_id: self.generate_upload_id(&new, created_at),
            data_id: new.data_id,
            dev_id: new.dev_id,
            bucket: new.bucket,
            object_key: new.object_key,
            filename: new.filename,
            content_type: new.content_type,
            uid: new.uid,
            created_at,
            expires_at: created_at + self.chrono_ttl()?,
        };

        {
            let mut table = self.table.lock().await;
            if table.live.contains_key(&session.upload_id) {
                return Err(AppError::Internal(
                    "Upload id collision, retry the grant".to_string(),
                ));
            }
            table.live.insert(session.upload_id.clone(), session.clone());
        }

        tracing::info!(
            upload_id = %session.upload_id,
            data_id = session.data_id,
            expires_at = %session.expires_at,
            "Upload session issued"
        );
        Ok((session, upload_url))
    }

    /// Remove and return a live session.
    ///
    /// `UploadExpired` when the session existed but its grant has run out,
    /// `NotFound` when it never existed or was already consumed.
    pub async fn consume(&self, upload_id: &str) -> AppResult<UploadSession> {
        let now = Utc::now();
        let ttl = self.chrono_ttl()?;
        let mut table = self.table.lock().await;

        if let Some(session) = table.live.remove(upload_id) {
            if session.is_expired_at(now) {
                table.bury(session.upload_id.clone(), session.expires_at, ttl);
                return Err(AppError::UploadExpired(format!(
                    "Upload session {} expired at {}",
                    upload_id, session.expires_at
                )));
            }
            return Ok(session);
        }

        if table.tombstones.contains_key(upload_id) {
            return Err(AppError::UploadExpired(format!(
                "Upload session {} has expired",
                upload_id
            )));
        }

        Err(AppError::NotFound(format!(
            "Upload session {} not found",
            upload_id
        )))
    }

    /// Put back a session taken by `consume` when completion failed before
    /// anything was persisted, so the device can retry.
    pub async fn restore(&self, session: UploadSession) {
        let mut table = self.table.lock().await;
        tracing::debug!(upload_id = %session.upload_id, "Upload session restored");
        table.live.insert(session.upload_id.clone(), session);
    }

    /// Drop expired sessions and stale tombstones; returns the number of sessions expired
    pub async fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let ttl = match self.chrono_ttl() {
            Ok(ttl) => ttl,
            Err(e) => {
                tracing::error!(error = %e, "Upload session sweep skipped");
                return 0;
            }
        };

        let mut table = self.table.lock().await;
        let expired: Vec<(String, DateTime<Utc>)> = table
            .live
            .values()
            .filter(|session| session.is_expired_at(now))
            .map(|session| (session.upload_id.clone(), session.expires_at))
            .collect();

        for (upload_id, expires_at) in &expired {
            table.live.remove(upload_id);
            table.bury(upload_id.clone(), *expires_at, ttl);
        }
        table.tombstones.retain(|_, drop_at| *drop_at > now);

        if !expired.is_empty() {
            tracing::debug!(expired = expired.len(), remaining = table.live.len(), "Expired upload sessions swept");
        }
        expired.len()
    }

    pub async fn live_sessions(&self) -> usize {
        self.table.lock().await.live.len()
    }

    /// Run `sweep_expired` every `interval` until `cancel` fires
    pub fn spawn_sweeper(&self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let manager = self.clone();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!("Upload session sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        manager.sweep_expired().await;
                    }
                }
            }
        })
    }
}
