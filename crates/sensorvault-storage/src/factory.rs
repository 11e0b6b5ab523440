#[cfg(feature = "storage-memory")]
use crate::MemoryStorage;
#[cfg(feature = "storage-s3")]
use crate::S3Storage;
use crate::{Storage, StorageBackend, StorageError, StorageResult};
use sensorvault_core::StorageConfig;
use std::sync::Arc;

/// Create a storage backend based on configuration
pub async fn create_storage(config: &StorageConfig) -> StorageResult<Arc<dyn Storage>> {
    match config.backend {
        #[cfg(feature = "storage-s3")]
        StorageBackend::S3 => {
            let credentials = match (&config.aws_access_key_id, &config.aws_secret_access_key) {
                (Some(id), Some(secret)) => Some((id.clone(), secret.clone())),
                (None, None) => None,
                _ => {
                    return Err(StorageError::ConfigError(
                        "AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY must be set together"
                            .to_string(),
                    ))
                }
            };

            let storage = S3Storage::new(
                config.s3_region.clone(),
                config.s3_endpoint.clone(),
                credentials,
            )
            .await?;
            Ok(Arc::new(storage))
        }

        #[cfg(not(feature = "storage-s3"))]
        StorageBackend::S3 => Err(StorageError::ConfigError(
            "S3 storage backend not available (storage-s3 feature not enabled)".to_string(),
        )),

        #[cfg(feature = "storage-memory")]
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory object storage; objects are lost on restart");
            Ok(Arc::new(MemoryStorage::new()))
        }

        #[cfg(not(feature = "storage-memory"))]
        StorageBackend::Memory => Err(StorageError::ConfigError(
            "Memory storage backend not available (storage-memory feature not enabled)"
                .to_string(),
        )),
    }
}

#[cfg(all(test, feature = "storage-memory"))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_memory_storage() {
        let config = StorageConfig {
            backend: StorageBackend::Memory,
            s3_endpoint: None,
            s3_region: "us-east-1".to_string(),
            aws_access_key_id: None,
            aws_secret_access_key: None,
        };
        let storage = create_storage(&config).await.unwrap();
        assert_eq!(storage.backend_type(), StorageBackend::Memory);
    }

    #[cfg(feature = "storage-s3")]
    #[tokio::test]
    async fn test_s3_rejects_half_configured_credentials() {
        let config = StorageConfig {
            backend: StorageBackend::S3,
            s3_endpoint: Some("http://localhost:9000".to_string()),
            s3_region: "us-east-1".to_string(),
            aws_access_key_id: Some("minio".to_string()),
            aws_secret_access_key: None,
        };
        assert!(matches!(
            create_storage(&config).await,
            Err(StorageError::ConfigError(_))
        ));
    }
}
