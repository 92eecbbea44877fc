//! Error types for the pool core
//!
//! Share rejections are not errors: they are classified outcomes carried by
//! [`ShareResult`](crate::stratum::ShareResult). This type covers protocol
//! framing, configuration and infrastructure failures.

use thiserror::Error;

/// Main error type for the pool
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON parsing errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Wire protocol framing errors (fatal to the connection)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Stratum session errors
    #[error("Stratum error: {0}")]
    Stratum(String),

    /// Invalid job or job template
    #[error("Invalid job: {0}")]
    InvalidJob(String),

    /// Invalid target format
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    /// Worker registry failures (not bad credentials)
    #[error("Authorization backend error: {0}")]
    Auth(String),
}

/// Result type alias for the pool
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a stratum error
    pub fn stratum(msg: impl Into<String>) -> Self {
        Self::Stratum(msg.into())
    }

    /// Create an invalid job error
    pub fn invalid_job(msg: impl Into<String>) -> Self {
        Self::InvalidJob(msg.into())
    }

    /// Create an invalid target error
    pub fn invalid_target(msg: impl Into<String>) -> Self {
        Self::InvalidTarget(msg.into())
    }

    /// Create an authorization backend error
    ///
    /// For [`WorkerRegistry`](crate::stratum::WorkerRegistry) implementations
    /// that cannot reach their store.
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::config("missing field");
        assert_eq!(err.to_string(), "Configuration error: missing field");

        let err = Error::invalid_job("bad coinbase");
        assert_eq!(err.to_string(), "Invalid job: bad coinbase");

        let err = Error::auth("timed out");
        assert_eq!(err.to_string(), "Authorization backend error: timed out");
    }

    #[test]
    fn test_error_conversions() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));

        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
