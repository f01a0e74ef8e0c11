//! Error types for reviewgraph
//!
//! Defines the crate-wide error enum covering every failure mode of the
//! ingest → load → rank pipeline. Uses thiserror for ergonomic error handling.

use crate::github::ApiError;
use crate::store::StoreError;
use thiserror::Error;

/// Result type alias for reviewgraph operations
pub type Result<T> = std::result::Result<T, ReviewGraphError>;

/// Comprehensive error type for reviewgraph operations
#[derive(Error, Debug)]
pub enum ReviewGraphError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Durable cache errors (not found, write failures, bad keys)
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Remote API errors that were not absorbed by rate-limit handling
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP client construction errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The operation observed a shutdown signal and stopped early
    #[error("Operation cancelled")]
    Cancelled,

    /// Other errors
    #[error("{0}")]
    Other(String),

    /// Errors wrapped with context; displays the whole chain
    #[error("{0:#}")]
    Anyhow(#[from] anyhow::Error),
}

impl ReviewGraphError {
    /// True when the underlying cause is a missing cache entry
    pub fn is_not_found(&self) -> bool {
        matches!(self, ReviewGraphError::Store(StoreError::NotFound(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_is_distinguishable() {
        let err: ReviewGraphError = StoreError::NotFound("metadata".to_string()).into();
        assert!(err.is_not_found());

        let err = ReviewGraphError::Config("bad".to_string());
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_error_display() {
        let err: ReviewGraphError = StoreError::NotFound("42/reviews".to_string()).into();
        assert_eq!(err.to_string(), "Store error: Key not found: 42/reviews");
    }

    #[test]
    fn test_context_chain_display() {
        use anyhow::Context;

        let write: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "permission denied",
        ));
        let err: ReviewGraphError = write
            .context("Failed to write force-graph.json")
            .unwrap_err()
            .into();
        assert!(matches!(err, ReviewGraphError::Anyhow(_)));
        assert_eq!(
            err.to_string(),
            "Failed to write force-graph.json: permission denied"
        );

        let load: Result<()> = Err(ReviewGraphError::Config("bad".to_string()));
        let err: ReviewGraphError = load.context("Failed to load config").unwrap_err().into();
        assert_eq!(
            err.to_string(),
            "Failed to load config: Configuration error: bad"
        );
    }
}
