//! Backend error types

use thiserror::Error;

/// Errors that can occur while talking to a search backend
#[derive(Debug, Error)]
pub enum BackendError {
    /// Network or transport failure
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Backend answered with a non-success status
    #[error("Backend returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Response body could not be decoded
    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    /// Base URL could not be used to build a request
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Backend rejected the query itself
    #[error("Query failed: {0}")]
    Query(String),

    /// Scroll cursor is unknown or already released
    #[error("Scroll cursor not found: {0}")]
    ScrollNotFound(String),
}
