//! Error types for the proximity engine.

use std::fmt;

use thiserror::Error;

/// Errors raised by the remote friend feed (subscribe or stream).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FeedError {
    /// Network-level failure (connection refused, reset, unreachable).
    #[error("network error: {0}")]
    Network(String),

    /// Subscribe attempt or stream read timed out.
    #[error("feed operation timed out")]
    Timeout,

    /// Remote rejected the session.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Remote closed the stream.
    #[error("feed closed by remote")]
    Closed,

    /// Malformed data from the remote.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// How a write failure should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Retry with backoff; queue if offline once retries run out.
    Transient,
    /// Never retried; surfaced immediately.
    Permanent,
    /// Not recognised; handled like `Transient` but logged distinctly.
    Unknown,
}

impl ErrorClass {
    /// Whether failures of this class are retried.
    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorClass::Permanent)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorClass::Transient => "transient",
            ErrorClass::Permanent => "permanent",
            ErrorClass::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Failure of a caller-supplied write operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OperationError {
    /// Network-level failure.
    #[error("network error: {0}")]
    Network(String),

    /// Round trip timed out.
    #[error("operation timed out")]
    Timeout,

    /// Credentials missing, expired, or rejected.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Remote rejected the request as invalid.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Anything else.
    #[error("{0}")]
    Other(String),
}

impl OperationError {
    /// Classify the failure for retry purposes.
    pub fn class(&self) -> ErrorClass {
        match self {
            OperationError::Network(_) | OperationError::Timeout => ErrorClass::Transient,
            OperationError::Unauthorized(_) | OperationError::Validation(_) => {
                ErrorClass::Permanent
            }
            OperationError::Other(_) => ErrorClass::Unknown,
        }
    }
}

/// Terminal write failure with enough context to log.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{operation} failed after {attempts} attempt(s) ({class}): {cause}")]
pub struct RetryFailure {
    /// Description of the operation.
    pub operation: String,
    /// Attempts made before giving up.
    pub attempts: u32,
    /// Classification of the last failure.
    pub class: ErrorClass,
    /// Last underlying failure.
    pub cause: OperationError,
}

/// Error returned from `execute`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecuteError {
    /// The operation failed terminally; the user should retry.
    #[error(transparent)]
    Failed(#[from] RetryFailure),

    /// The engine shut down before the operation resolved.
    #[error("engine shut down")]
    Shutdown,
}

/// Rejected input data.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum InputError {
    /// Latitude/longitude out of range or not finite.
    #[error("invalid coordinates: lat={latitude}, lon={longitude}")]
    InvalidCoordinates {
        /// Latitude in degrees.
        latitude: f64,
        /// Longitude in degrees.
        longitude: f64,
    },

    /// Negative or non-finite accuracy.
    #[error("invalid accuracy: {0}")]
    InvalidAccuracy(f64),
}

/// Top-level engine errors.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Input error.
    #[error("input error: {0}")]
    Input(#[from] InputError),

    /// The engine has been stopped.
    #[error("engine shut down")]
    Shutdown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_error_classes() {
        assert_eq!(OperationError::Network("reset".into()).class(), ErrorClass::Transient);
        assert_eq!(OperationError::Timeout.class(), ErrorClass::Transient);
        assert_eq!(
            OperationError::Unauthorized("expired".into()).class(),
            ErrorClass::Permanent
        );
        assert_eq!(
            OperationError::Validation("bad radius".into()).class(),
            ErrorClass::Permanent
        );
        assert_eq!(OperationError::Other("???".into()).class(), ErrorClass::Unknown);
    }

    #[test]
    fn test_unknown_is_retryable() {
        assert!(ErrorClass::Transient.is_retryable());
        assert!(ErrorClass::Unknown.is_retryable());
        assert!(!ErrorClass::Permanent.is_retryable());
    }

    #[test]
    fn test_retry_failure_display_carries_context() {
        let failure = RetryFailure {
            operation: "start sharing".into(),
            attempts: 3,
            class: ErrorClass::Transient,
            cause: OperationError::Timeout,
        };
        let msg = failure.to_string();
        assert!(msg.contains("start sharing"));
        assert!(msg.contains("3 attempt"));
        assert!(msg.contains("transient"));
        assert!(msg.contains("timed out"));
    }
}
