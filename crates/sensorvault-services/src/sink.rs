//! Mapping of sink client errors onto the application error taxonomy

use sensorvault_core::{AppError, RetryClassify};
use sensorvault_storage::StorageError;
use sensorvault_timeseries::TimeSeriesError;

pub const TIMESERIES_SINK: &str = "timeseries";
pub const OBJECT_STORE_SINK: &str = "object_store";

/// Convert an object store failure that survived the retry budget
pub fn from_storage_error(err: StorageError) -> AppError {
    match err {
        StorageError::NotFound(what) => AppError::NotFound(format!("Object not found: {}", what)),
        StorageError::InvalidKey(key) => AppError::InvalidInput(format!("Invalid object key: {}", key)),
        StorageError::ConfigError(message) => AppError::Internal(message),
        err if err.is_retryable() => AppError::SinkUnavailable {
            sink: OBJECT_STORE_SINK,
            message: err.to_string(),
        },
        err => AppError::SinkRejected {
            sink: OBJECT_STORE_SINK,
            message: err.to_string(),
        },
    }
}

/// Convert a time-series store failure that survived the retry budget
pub fn from_timeseries_error(err: TimeSeriesError) -> AppError {
    match err {
        TimeSeriesError::InvalidQuery(message) | TimeSeriesError::InvalidPoint(message) => {
            AppError::InvalidInput(message)
        }
        TimeSeriesError::Config(message) => AppError::Internal(message),
        err if err.is_retryable() => AppError::SinkUnavailable {
            sink: TIMESERIES_SINK,
            message: err.to_string(),
        },
        err => AppError::SinkRejected {
            sink: TIMESERIES_SINK,
            message: err.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensorvault_core::ErrorMetadata;
    use std::time::Duration;

    #[test]
    fn test_storage_error_mapping() {
        assert!(matches!(
            from_storage_error(StorageError::Timeout(Duration::from_secs(5))),
            AppError::SinkUnavailable { sink: OBJECT_STORE_SINK, .. }
        ));
        assert!(matches!(
            from_storage_error(StorageError::PresignFailed("denied".into())),
            AppError::SinkRejected { .. }
        ));
        assert!(matches!(
            from_storage_error(StorageError::NotFound("bucket image".into())),
            AppError::NotFound(_)
        ));
    }

    #[test]
    fn test_timeseries_error_mapping() {
        let unavailable = from_timeseries_error(TimeSeriesError::Unavailable("refused".into()));
        assert_eq!(unavailable.http_status_code(), 503);

        let rejected = from_timeseries_error(TimeSeriesError::Rejected {
            status: 400,
            message: "syntax error".into(),
        });
        assert_eq!(rejected.error_code(), "SINK_REJECTED");

        assert!(matches!(
            from_timeseries_error(TimeSeriesError::InvalidQuery("measurement is required".into())),
            AppError::InvalidInput(_)
        ));
    }
}
