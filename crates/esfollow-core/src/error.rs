//! Core error types for es-follow.

use esfollow_client::BackendError;
use thiserror::Error;

/// Errors that can occur while following or fetching documents
#[derive(Debug, Error)]
pub enum FollowError {
    /// Backend call failed; passed through unchanged
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Document timestamp is missing or cannot be parsed
    #[error("Malformed timestamp in document {id} (field '{field}'): {reason}")]
    MalformedTimestamp {
        id: String,
        field: String,
        reason: String,
    },

    /// Hit carries no usable sort key to anchor a context window on
    #[error("Hit {id} has no sort key to anchor on")]
    MissingSortKey { id: String },

    /// Output format string is invalid
    #[error("Invalid format string: {0}")]
    InvalidFormat(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl FollowError {
    /// True for failures of the backend itself, as opposed to bad documents
    pub fn is_backend(&self) -> bool {
        matches!(self, FollowError::Backend(_))
    }
}

pub type Result<T> = std::result::Result<T, FollowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_is_transparent() {
        let inner = BackendError::Query("bad query".to_string());
        let expected = inner.to_string();
        let err: FollowError = inner.into();
        assert!(err.is_backend());
        assert_eq!(err.to_string(), expected);
    }

    #[test]
    fn test_malformed_timestamp_display() {
        let err = FollowError::MalformedTimestamp {
            id: "id_1".to_string(),
            field: "@timestamp".to_string(),
            reason: "field missing".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("id_1"));
        assert!(msg.contains("@timestamp"));
        assert!(!err.is_backend());
    }
}
