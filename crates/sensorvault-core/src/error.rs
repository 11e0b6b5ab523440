//! Error types module
//!
//! This module provides the core error types used throughout Sensorvault.
//! All errors surfaced by public operations are unified under the `AppError`
//! enum: validation, permission, lookup, sink and partial-persistence failures.
//!
//! The `Database` variant and `From<sqlx::Error>` are gated behind the `sqlx` feature.

#[cfg(feature = "sqlx")]
use sqlx::Error as SqlxError;

/// Result alias used by services and repositories
pub type AppResult<T> = Result<T, AppError>;

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected errors like validation failures
    Debug,
    /// Warning level - for recoverable issues like a busy sink
    Warn,
    /// Error level - for unexpected failures
    Error,
}

/// Metadata for error responses - defines how an error should be presented
/// to whatever surface (HTTP, CLI) reports it.
pub trait ErrorMetadata {
    /// HTTP status code equivalent
    fn http_status_code(&self) -> u16;

    /// Machine-readable error code (e.g., "SINK_UNAVAILABLE")
    fn error_code(&self) -> &'static str;

    /// Whether retrying the same call later may succeed
    fn is_recoverable(&self) -> bool;

    /// Client-facing message (may differ from internal error message)
    fn client_message(&self) -> String;

    /// Whether details should be hidden from untrusted callers
    fn is_sensitive(&self) -> bool;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[source] SqlxError),

    #[cfg(not(feature = "sqlx"))]
    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Upload session expired: {0}")]
    UploadExpired(String),

    #[error("{sink} unavailable: {message}")]
    SinkUnavailable { sink: &'static str, message: String },

    #[error("{sink} rejected the request: {message}")]
    SinkRejected { sink: &'static str, message: String },

    /// Series points reached the time-series store but the metadata record
    /// could not be written. The points are durable and unreferenced.
    #[error("Partially persisted (data_id {data_id}): series data is durable and orphaned, metadata write failed: {message}")]
    PartiallyPersisted { data_id: i64, message: String },

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Internal error with source")]
    InternalWithSource {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

#[cfg(feature = "sqlx")]
impl From<SqlxError> for AppError {
    fn from(err: SqlxError) -> Self {
        AppError::Database(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::InternalWithSource {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InvalidInput(format!("JSON parsing error: {}", err))
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::InvalidInput(format!("Validation error: {}", err))
    }
}

/// Static metadata for each variant: (http_status, error_code, recoverable, sensitive, log_level).
fn app_error_static_metadata(err: &AppError) -> (u16, &'static str, bool, bool, LogLevel) {
    match err {
        AppError::Database(_) => (500, "DATABASE_ERROR", true, true, LogLevel::Error),
        AppError::InvalidInput(_) => (400, "INVALID_ARGUMENT", false, false, LogLevel::Debug),
        AppError::Forbidden(_) => (403, "FORBIDDEN", false, false, LogLevel::Debug),
        AppError::NotFound(_) => (404, "NOT_FOUND", false, false, LogLevel::Debug),
        AppError::UploadExpired(_) => (410, "UPLOAD_EXPIRED", false, false, LogLevel::Debug),
        AppError::SinkUnavailable { .. } => (503, "SINK_UNAVAILABLE", true, true, LogLevel::Warn),
        AppError::SinkRejected { .. } => (502, "SINK_REJECTED", false, true, LogLevel::Error),
        // Retrying would duplicate the series write.
        AppError::PartiallyPersisted { .. } => {
            (500, "PARTIALLY_PERSISTED", false, false, LogLevel::Error)
        }
        AppError::Internal(_) | AppError::InternalWithSource { .. } => {
            (500, "INTERNAL_ERROR", true, true, LogLevel::Error)
        }
    }
}

impl AppError {
    /// Get the error type name for detailed error responses
    pub fn error_type(&self) -> &str {
        match self {
            AppError::Database(_) => "Database",
            AppError::InvalidInput(_) => "InvalidInput",
            AppError::Forbidden(_) => "Forbidden",
            AppError::NotFound(_) => "NotFound",
            AppError::UploadExpired(_) => "UploadExpired",
            AppError::SinkUnavailable { .. } => "SinkUnavailable",
            AppError::SinkRejected { .. } => "SinkRejected",
            AppError::PartiallyPersisted { .. } => "PartiallyPersisted",
            AppError::Internal(_) => "Internal",
            AppError::InternalWithSource { .. } => "Internal",
        }
    }

    /// Get detailed error information including error chain
    pub fn detailed_message(&self) -> String {
        use std::error::Error;

        let mut details = self.to_string();

        let mut source = self.source();
        let mut depth = 0;
        while let Some(err) = source {
            depth += 1;
            if depth > 5 {
                details.push_str("\n  ... (truncated)");
                break;
            }
            details.push_str(&format!("\n  Caused by: {}", err));
            source = err.source();
        }

        details
    }
}

impl ErrorMetadata for AppError {
    fn http_status_code(&self) -> u16 {
        app_error_static_metadata(self).0
    }

    fn error_code(&self) -> &'static str {
        app_error_static_metadata(self).1
    }

    fn is_recoverable(&self) -> bool {
        app_error_static_metadata(self).2
    }

    fn is_sensitive(&self) -> bool {
        app_error_static_metadata(self).3
    }

    fn log_level(&self) -> LogLevel {
        app_error_static_metadata(self).4
    }

    fn client_message(&self) -> String {
        match self {
            AppError::Database(_) => "Failed to access metadata store".to_string(),
            AppError::InvalidInput(ref msg) => msg.clone(),
            AppError::Forbidden(ref msg) => msg.clone(),
            AppError::NotFound(ref msg) => msg.clone(),
            AppError::UploadExpired(ref upload_id) => {
                format!("Upload session {} has expired, request a new grant", upload_id)
            }
            AppError::SinkUnavailable { sink, .. } => format!("{} is temporarily unavailable", sink),
            AppError::SinkRejected { sink, .. } => format!("{} rejected the request", sink),
            AppError::PartiallyPersisted { data_id, .. } => format!(
                "Series data {} was stored but its metadata was not; do not retry the upload",
                data_id
            ),
            AppError::Internal(_) | AppError::InternalWithSource { .. } => {
                "Internal server error".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_metadata_database() {
        #[cfg(feature = "sqlx")]
        let err = AppError::from(sqlx::Error::PoolClosed);
        #[cfg(not(feature = "sqlx"))]
        let err = AppError::Database("pool closed".to_string());
        assert_eq!(err.http_status_code(), 500);
        assert_eq!(err.error_code(), "DATABASE_ERROR");
        assert!(err.is_recoverable());
        assert_eq!(err.client_message(), "Failed to access metadata store");
        assert!(err.is_sensitive());
        assert_eq!(err.log_level(), LogLevel::Error);
    }

    #[test]
    fn test_error_metadata_forbidden() {
        let err = AppError::Forbidden("no binding for device 7".to_string());
        assert_eq!(err.http_status_code(), 403);
        assert_eq!(err.error_code(), "FORBIDDEN");
        assert!(!err.is_recoverable());
        assert_eq!(err.client_message(), "no binding for device 7");
        assert_eq!(err.log_level(), LogLevel::Debug);
    }

    #[test]
    fn test_expired_is_distinct_from_not_found() {
        let expired = AppError::UploadExpired("abc".to_string());
        let missing = AppError::NotFound("abc".to_string());
        assert_ne!(expired.error_code(), missing.error_code());
        assert_eq!(expired.error_type(), "UploadExpired");
        assert!(expired.client_message().contains("abc"));
    }

    #[test]
    fn test_partially_persisted_is_not_recoverable() {
        let err = AppError::PartiallyPersisted {
            data_id: 42,
            message: "connection reset".to_string(),
        };
        assert!(!err.is_recoverable());
        assert_eq!(err.error_code(), "PARTIALLY_PERSISTED");
        assert!(err.to_string().contains("orphaned"));
        assert!(err.client_message().contains("42"));
    }

    #[test]
    fn test_sink_unavailable_is_recoverable() {
        let err = AppError::SinkUnavailable {
            sink: "timeseries",
            message: "connection refused".to_string(),
        };
        assert!(err.is_recoverable());
        assert_eq!(err.http_status_code(), 503);
        assert_eq!(err.client_message(), "timeseries is temporarily unavailable");
    }

    #[test]
    fn test_detailed_message_includes_source_chain() {
        let err = AppError::from(anyhow::anyhow!("root cause").context("outer"));
        let details = err.detailed_message();
        assert!(details.starts_with("Internal error with source"));
        assert!(details.contains("outer"));
    }
}
