// THEORY:
// The `error` module holds the only failure surface of the engine. Messy data is
// never an error here: bad coordinate tokens truncate a track, and empty inputs
// produce empty statistics. What remains are the things a caller can actually get
// wrong (a zero frame rate, a negative radius) plus the I/O of the boundary adapter
// and the worker pool. Those are reported, never swallowed, because a degenerate
// threshold silently corrupts every segment computed after it.

use thiserror::Error;

/// Result type for analytics operations.
pub type AnalyticsResult<T> = Result<T, AnalyticsError>;

/// Errors that can occur while configuring or feeding the analytics engine.
#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("Invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("Invalid timestamp format: {0}")]
    InvalidTimestamp(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Worker failed: {0}")]
    Worker(String),
}

impl AnalyticsError {
    /// Create a parameter-domain error.
    pub fn invalid_parameter(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }

    /// True for errors caused by caller-supplied configuration rather than I/O.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::InvalidParameter { .. } | Self::InvalidTimestamp(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameter_errors_name_the_parameter() {
        let err = AnalyticsError::invalid_parameter("video_fps", "must be positive, got 0");
        assert_eq!(
            err.to_string(),
            "Invalid parameter `video_fps`: must be positive, got 0"
        );
        assert!(err.is_configuration());
    }

    #[test]
    fn io_errors_are_not_configuration_errors() {
        let err: AnalyticsError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(!err.is_configuration());
    }
}
