//! Error types for the object store and permission grants.

use thiserror::Error;

/// Errors returned by [`ObjectStore`](crate::ObjectStore) operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The object does not exist.
    #[error("object not found: {0}")]
    NotFound(String),

    /// A subscription with the same key is already Active.
    #[error("subscription already exists: {0}")]
    AlreadyExists(String),

    /// Another target already holds the location and trigger.
    #[error("subscription for {key} conflicts with existing target {existing_target}")]
    Conflict {
        /// The key that was requested.
        key: String,
        /// The target currently subscribed.
        existing_target: String,
    },

    /// The store did not answer in time.
    #[error("store operation timed out: {0}")]
    Timeout(String),

    /// The store is temporarily unable to serve the request.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Any other backend failure.
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Returns `true` if repeating the operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Unavailable(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        if lifewire_db::is_busy(&err) {
            Self::Unavailable(err.to_string())
        } else {
            Self::Backend(err.to_string())
        }
    }
}

impl From<r2d2::Error> for StoreError {
    fn from(err: r2d2::Error) -> Self {
        Self::Unavailable(format!("connection pool: {err}"))
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Backend(format!("task join error: {err}"))
    }
}

/// Errors returned by [`PermissionGrantor`](crate::PermissionGrantor).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GrantError {
    /// The identity collaborator did not answer in time.
    #[error("permission grant timed out: {0}")]
    Timeout(String),

    /// The identity collaborator is temporarily unavailable.
    #[error("permission grant unavailable: {0}")]
    Unavailable(String),

    /// The grant was refused.
    #[error("permission grant rejected: {0}")]
    Rejected(String),
}

impl GrantError {
    /// Returns `true` if repeating the grant may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Unavailable(_))
    }
}

impl From<rusqlite::Error> for GrantError {
    fn from(err: rusqlite::Error) -> Self {
        if lifewire_db::is_busy(&err) {
            Self::Unavailable(err.to_string())
        } else {
            Self::Rejected(err.to_string())
        }
    }
}

impl From<r2d2::Error> for GrantError {
    fn from(err: r2d2::Error) -> Self {
        Self::Unavailable(format!("connection pool: {err}"))
    }
}

impl From<tokio::task::JoinError> for GrantError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Unavailable(format!("task join error: {err}"))
    }
}
