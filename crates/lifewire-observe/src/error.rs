//! Error types for the report log.

/// Errors that can occur during report log operations.
#[derive(Debug, thiserror::Error)]
pub enum ObserveError {
    /// A database operation failed.
    #[error("report database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// JSON serialization or deserialization failed.
    #[error("report serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
