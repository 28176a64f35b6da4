//! Error taxonomy for blob filesystem operations.
//!
//! Every backend status code the adapter cares about maps to a variant.
//! `NotFound` is the only one that operations absorb locally (existence
//! checks, append-to-missing fallback); everything else propagates.

use http::StatusCode;
use thiserror::Error;

/// Errors produced by the blob filesystem adapter.
#[derive(Debug, Error)]
pub enum FsError {
    /// Settings are missing or unusable.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// The caller passed an argument the operation cannot act on.
    #[error("invalid argument: {message}")]
    Argument { message: String },

    /// The backend answered 404.
    #[error("resource not found: {resource}")]
    NotFound { resource: String },

    /// The backend answered 401: signature or key mismatch.
    #[error("unauthorized request against {resource}")]
    Unauthorized { resource: String },

    /// Any other non-success status, or a caller-side invariant violation.
    #[error("storage adapter error: {status} {reason}")]
    Adapter { status: u16, reason: String },

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// The transport failed before a response status was available.
    #[error("transport error: {0}")]
    Transport(String),

    /// A response body could not be decoded.
    #[error("malformed response: {message}")]
    MalformedResponse { message: String },

    /// Reading the caller's source stream failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FsError {
    /// Shorthand for an [`FsError::Argument`].
    pub fn argument(message: impl Into<String>) -> Self {
        FsError::Argument {
            message: message.into(),
        }
    }

    /// Shorthand for an [`FsError::Configuration`].
    pub fn configuration(message: impl Into<String>) -> Self {
        FsError::Configuration {
            message: message.into(),
        }
    }

    /// Shorthand for an [`FsError::MalformedResponse`].
    pub fn malformed(message: impl Into<String>) -> Self {
        FsError::MalformedResponse {
            message: message.into(),
        }
    }

    /// Classify a non-success backend status.
    ///
    /// 404 and 401 get their own variants; every other status becomes an
    /// [`FsError::Adapter`] carrying the code and reason phrase.
    pub fn from_status(status: StatusCode, resource: &str) -> Self {
        match status {
            StatusCode::NOT_FOUND => FsError::NotFound {
                resource: resource.to_string(),
            },
            StatusCode::UNAUTHORIZED => FsError::Unauthorized {
                resource: resource.to_string(),
            },
            other => FsError::Adapter {
                status: other.as_u16(),
                reason: other.canonical_reason().unwrap_or("Unknown").to_string(),
            },
        }
    }

    /// Whether this error came from a backend 404.
    pub fn is_not_found(&self) -> bool {
        matches!(self, FsError::NotFound { .. })
    }
}

impl From<reqwest::Error> for FsError {
    fn from(e: reqwest::Error) -> Self {
        FsError::Transport(e.to_string())
    }
}

impl From<quick_xml::Error> for FsError {
    fn from(e: quick_xml::Error) -> Self {
        FsError::malformed(e.to_string())
    }
}

/// Result alias used throughout the crate.
pub type FsResult<T> = Result<T, FsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_mapping() {
        let err = FsError::from_status(StatusCode::NOT_FOUND, "/c/b");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "resource not found: /c/b");
    }

    #[test]
    fn test_unauthorized_mapping() {
        let err = FsError::from_status(StatusCode::UNAUTHORIZED, "/c");
        assert!(matches!(err, FsError::Unauthorized { .. }));
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_other_status_carries_code_and_reason() {
        match FsError::from_status(StatusCode::CONFLICT, "/c") {
            FsError::Adapter { status, reason } => {
                assert_eq!(status, 409);
                assert_eq!(reason, "Conflict");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_forbidden_is_adapter_error() {
        let err = FsError::from_status(StatusCode::FORBIDDEN, "/c");
        assert!(matches!(err, FsError::Adapter { status: 403, .. }));
    }
}
