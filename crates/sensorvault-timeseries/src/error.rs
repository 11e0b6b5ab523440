use std::time::Duration;

use sensorvault_core::RetryClassify;
use thiserror::Error;

/// Time-series store errors
#[derive(Debug, Error)]
pub enum TimeSeriesError {
    /// Connection refused, reset, or a 5xx/429 from the store
    #[error("Time-series store unavailable: {0}")]
    Unavailable(String),

    #[error("Time-series request timed out after {0:?}")]
    Timeout(Duration),

    /// The store understood the request and refused it (4xx)
    #[error("Time-series store rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Invalid point: {0}")]
    InvalidPoint(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl RetryClassify for TimeSeriesError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            TimeSeriesError::Unavailable(_) | TimeSeriesError::Timeout(_)
        )
    }

    fn timed_out(after: Duration) -> Self {
        TimeSeriesError::Timeout(after)
    }
}

pub type TimeSeriesResult<T> = Result<T, TimeSeriesError>;

impl From<reqwest::Error> for TimeSeriesError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            // reqwest does not expose the configured timeout on the error
            TimeSeriesError::Timeout(Duration::ZERO)
        } else if err.is_connect() || err.is_request() {
            TimeSeriesError::Unavailable(err.to_string())
        } else if err.is_decode() {
            TimeSeriesError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            TimeSeriesError::from_status(status.as_u16(), err.to_string())
        } else {
            TimeSeriesError::Unavailable(err.to_string())
        }
    }
}

impl TimeSeriesError {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, message: String) -> Self {
        if status >= 500 || status == 429 {
            TimeSeriesError::Unavailable(format!("HTTP {}: {}", status, message))
        } else {
            TimeSeriesError::Rejected { status, message }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(TimeSeriesError::from_status(503, "busy".into()).is_retryable());
        assert!(TimeSeriesError::from_status(429, "slow down".into()).is_retryable());
        assert!(!TimeSeriesError::from_status(400, "syntax error".into()).is_retryable());
        assert!(!TimeSeriesError::from_status(401, "bad token".into()).is_retryable());
    }

    #[test]
    fn test_programmer_errors_are_not_retryable() {
        assert!(!TimeSeriesError::InvalidQuery("measurement required".into()).is_retryable());
        assert!(!TimeSeriesError::Decode("not json".into()).is_retryable());
        assert!(TimeSeriesError::timed_out(Duration::from_secs(5)).is_retryable());
    }
}
