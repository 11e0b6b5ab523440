use crate::traits::{ObjectInfo, Storage, StorageError, StorageResult};
use crate::StorageBackend;
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::retry::RetryConfig;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::operation::create_bucket::CreateBucketError;
use aws_sdk_s3::operation::head_bucket::HeadBucketError;
use aws_sdk_s3::operation::head_object::HeadObjectError;
use aws_sdk_s3::operation::list_objects_v2::ListObjectsV2Error;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use aws_sdk_s3::Client;
use chrono::DateTime;
use std::time::{Duration, Instant};

/// S3 storage implementation (AWS S3 or an S3-compatible store such as MinIO)
#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    region: String,
    endpoint_url: Option<String>, // Custom endpoint for S3-compatible providers
}

impl S3Storage {
    /// Create a new S3Storage instance
    ///
    /// # Arguments
    /// * `region` - AWS region (or region identifier for S3-compatible providers)
    /// * `endpoint_url` - Optional custom endpoint URL for S3-compatible providers
    ///   (e.g., "http://localhost:9000" for MinIO)
    /// * `credentials` - Optional static access key pair; the default provider chain is used otherwise
    pub async fn new(
        region: String,
        endpoint_url: Option<String>,
        credentials: Option<(String, String)>,
    ) -> StorageResult<Self> {
        let region_provider =
            RegionProviderChain::first_try(aws_config::Region::new(region.clone()));

        // A single attempt per call; retries are driven by the caller's RetryExecutor
        let retry_config = RetryConfig::standard().with_max_attempts(1);

        let mut config_builder = aws_config::defaults(BehaviorVersion::latest())
            .region(region_provider)
            .retry_config(retry_config.clone());

        if let Some((access_key_id, secret_access_key)) = credentials {
            config_builder = config_builder.credentials_provider(Credentials::new(
                access_key_id,
                secret_access_key,
                None,
                None,
                "sensorvault-static",
            ));
        }

        let config = config_builder.load().await;

        let client = if let Some(ref endpoint) = endpoint_url {
            let mut s3_config_builder = aws_sdk_s3::Config::builder()
                .behavior_version(BehaviorVersion::latest())
                .endpoint_url(endpoint)
                .region(config.region().cloned())
                .retry_config(retry_config);
            if let Some(provider) = config.credentials_provider() {
                s3_config_builder = s3_config_builder.credentials_provider(provider);
            }
            // Path-style addressing is required for MinIO
            s3_config_builder = s3_config_builder.force_path_style(true);

            Client::from_conf(s3_config_builder.build())
        } else {
            Client::new(&config)
        };

        tracing::info!(
            region = %region,
            endpoint = endpoint_url.as_deref().unwrap_or("aws"),
            "S3 storage initialized"
        );

        Ok(S3Storage {
            client,
            region,
            endpoint_url,
        })
    }

    pub fn endpoint_url(&self) -> Option<&str> {
        self.endpoint_url.as_deref()
    }

    fn presigning_config(expires_in: Duration) -> StorageResult<PresigningConfig> {
        PresigningConfig::builder()
            .expires_in(expires_in)
            .build()
            .map_err(|e| StorageError::PresignFailed(e.to_string()))
    }
}

/// Timeouts, dispatch failures, throttling and 5xx responses are transient.
fn is_transient<E>(err: &SdkError<E, HttpResponse>) -> bool {
    match err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            true
        }
        SdkError::ServiceError(service_err) => {
            let status = service_err.raw().status().as_u16();
            status >= 500 || status == 429
        }
        _ => false,
    }
}

/// Map an SDK error to `Unavailable` when transient, otherwise to `permanent`.
fn map_sdk_error<E>(
    err: SdkError<E, HttpResponse>,
    permanent: fn(String) -> StorageError,
) -> StorageError
where
    E: std::error::Error + 'static,
{
    let message = DisplayErrorContext(&err).to_string();
    if is_transient(&err) {
        StorageError::Unavailable(message)
    } else {
        permanent(message)
    }
}

#[async_trait]
impl Storage for S3Storage {
    async fn ensure_bucket(&self, bucket: &str) -> StorageResult<()> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => return Ok(()),
            Err(err) => {
                let missing = matches!(
                    &err,
                    SdkError::ServiceError(service_err)
                        if matches!(service_err.err(), HeadBucketError::NotFound(_))
                );
                if !missing {
                    return Err(map_sdk_error(err, StorageError::BucketFailed));
                }
            }
        }

        let mut request = self.client.create_bucket().bucket(bucket);
        if self.region != "us-east-1" {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }

        match request.send().await {
            Ok(_) => {
                tracing::info!(bucket = %bucket, "Bucket created");
                Ok(())
            }
            Err(err) => {
                // Lost a creation race with another instance
                let already_ours = matches!(
                    &err,
                    SdkError::ServiceError(service_err)
                        if matches!(
                            service_err.err(),
                            CreateBucketError::BucketAlreadyOwnedByYou(_)
                        )
                );
                if already_ours {
                    return Ok(());
                }
                tracing::error!(
                    error = %DisplayErrorContext(&err),
                    bucket = %bucket,
                    "Bucket creation failed"
                );
                Err(map_sdk_error(err, StorageError::BucketFailed))
            }
        }
    }

    async fn presigned_put_url(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> StorageResult<String> {
        let presigned_request = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .presigned(Self::presigning_config(expires_in)?)
            .await
            .map_err(|e| map_sdk_error(e, StorageError::PresignFailed))?;

        tracing::debug!(
            bucket = %bucket,
            key = %key,
            expires_in_secs = expires_in.as_secs(),
            "Presigned PUT URL generated"
        );

        Ok(presigned_request.uri().to_string())
    }

    async fn presigned_get_url(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
        download_as: Option<&str>,
    ) -> StorageResult<String> {
        let mut request = self.client.get_object().bucket(bucket).key(key);
        if let Some(filename) = download_as {
            request = request
                .response_content_disposition(format!("attachment; filename=\"{}\"", filename));
        }

        let presigned_request = request
            .presigned(Self::presigning_config(expires_in)?)
            .await
            .map_err(|e| map_sdk_error(e, StorageError::PresignFailed))?;

        Ok(presigned_request.uri().to_string())
    }

    async fn exists(&self, bucket: &str, key: &str) -> StorageResult<bool> {
        let start = Instant::now();
        match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(_) => Ok(true),
            Err(err) => {
                let not_found = matches!(
                    &err,
                    SdkError::ServiceError(service_err)
                        if matches!(service_err.err(), HeadObjectError::NotFound(_))
                );
                if not_found {
                    return Ok(false);
                }
                tracing::warn!(
                    error = %DisplayErrorContext(&err),
                    bucket = %bucket,
                    key = %key,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 head_object failed"
                );
                Err(map_sdk_error(err, StorageError::BackendError))
            }
        }
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: Option<&str>,
    ) -> StorageResult<Vec<ObjectInfo>> {
        let start = Instant::now();
        let mut request = self.client.list_objects_v2().bucket(bucket);
        if let Some(prefix) = prefix {
            request = request.prefix(prefix);
        }

        let mut pages = request.into_paginator().send();
        let mut objects = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|err| {
                let no_bucket = matches!(
                    &err,
                    SdkError::ServiceError(service_err)
                        if matches!(service_err.err(), ListObjectsV2Error::NoSuchBucket(_))
                );
                if no_bucket {
                    StorageError::NotFound(format!("bucket {}", bucket))
                } else {
                    map_sdk_error(err, StorageError::BackendError)
                }
            })?;

            for object in page.contents() {
                let Some(key) = object.key() else {
                    continue;
                };
                objects.push(ObjectInfo {
                    key: key.to_string(),
                    size: object.size().unwrap_or(0).max(0) as u64,
                    last_modified: object
                        .last_modified()
                        .and_then(|t| DateTime::from_timestamp(t.secs(), t.subsec_nanos())),
                });
            }
        }

        tracing::debug!(
            bucket = %bucket,
            prefix = prefix.unwrap_or(""),
            count = objects.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 list successful"
        );

        Ok(objects)
    }

    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()> {
        let start = Instant::now();

        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %DisplayErrorContext(&e),
                    bucket = %bucket,
                    key = %key,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 delete failed"
                );
                map_sdk_error(e, StorageError::DeleteFailed)
            })?;

        tracing::info!(
            bucket = %bucket,
            key = %key,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 delete successful"
        );

        Ok(())
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::S3
    }
}
