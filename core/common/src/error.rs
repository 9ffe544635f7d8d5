//! Common error types for driveup.

use thiserror::Error;

/// Top-level error type for driveup operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Credentials are missing, invalid, expired or were rejected.
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Transport-level failure (connection refused, reset, DNS...).
    #[error("Network error: {0}")]
    Network(String),

    /// Request did not complete in time.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Remote API asked us to slow down (HTTP 429).
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Remote API failed on its side (HTTP 5xx).
    #[error("Server error: {0}")]
    Server(String),

    /// Caller lacks permission for the remote resource.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Remote API rejected the request for any other reason.
    #[error("Remote error: {0}")]
    Remote(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Whether retrying the same request may succeed.
    ///
    /// Only transport, timeout, throttling and server-side failures qualify;
    /// local I/O errors do not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Network(_) | Error::Timeout(_) | Error::RateLimited(_) | Error::Server(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::Network("reset".into()).is_transient());
        assert!(Error::Timeout("slow".into()).is_transient());
        assert!(Error::RateLimited("429".into()).is_transient());
        assert!(Error::Server("503".into()).is_transient());

        assert!(!Error::Authentication("expired".into()).is_transient());
        assert!(!Error::PermissionDenied("nope".into()).is_transient());
        assert!(!Error::NotFound("gone".into()).is_transient());
        assert!(!Error::Remote("400".into()).is_transient());
        assert!(!Error::InvalidInput("bad".into()).is_transient());
    }

    #[test]
    fn test_io_error_is_not_transient() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::NotFound, "missing").into();
        assert!(matches!(err, Error::Io(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_serde_error_conversion() {
        let err: Error = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
