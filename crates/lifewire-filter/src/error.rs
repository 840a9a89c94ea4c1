//! Error types for content filters and the access layer.

use std::time::Duration;

use lifewire_store::StoreError;
use lifewire_types::AccessFeature;
use thiserror::Error;

/// Errors from parsing or resolving a byte range.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeError {
    /// The header is not `bytes=a-b`, `bytes=a-` or `bytes=-n`.
    #[error("malformed range: {0}")]
    Malformed(String),

    /// The range does not overlap the body.
    #[error("range not satisfiable for {len} bytes")]
    Unsatisfiable {
        /// Length of the body the range was resolved against.
        len: u64,
    },
}

/// Errors raised by a [`ContentFilter`](crate::ContentFilter).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    /// The body looked gzip-compressed but could not be inflated.
    #[error("failed to decompress object: {0}")]
    Decompress(String),

    /// The (decompressed) body is not UTF-8 text.
    #[error("object is not valid UTF-8: {0}")]
    Encoding(String),

    /// The requested range cannot be served.
    #[error(transparent)]
    Range(#[from] RangeError),

    /// The filter was built with unusable settings.
    #[error("invalid filter settings: {0}")]
    InvalidSettings(String),

    /// No filter is registered under this reference.
    #[error("unknown transform: {0}")]
    UnknownTransform(String),
}

/// Errors returned by the [`FilteringAccessLayer`](crate::FilteringAccessLayer).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessError {
    /// The caller is outside the permitted account boundary.
    #[error("access denied for caller {caller}")]
    AccessDenied {
        /// The rejected caller identity.
        caller: String,
    },

    /// The access layer does not front this location.
    #[error("location {0} is not served by this access layer")]
    UnknownLocation(String),

    /// The request used a feature the configuration does not allow.
    #[error("feature {0} is not allowed")]
    UnsupportedFeature(AccessFeature),

    /// Objects are single-part; only part 1 exists.
    #[error("invalid part number {0}")]
    InvalidPartNumber(u32),

    /// The requested range cannot be served.
    #[error(transparent)]
    InvalidRange(RangeError),

    /// The request combines options that cannot be served together.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The object does not exist.
    #[error("object not found: {0}")]
    NotFound(String),

    /// The read did not complete within the caller's deadline.
    #[error("read timed out after {0:?}")]
    Timeout(Duration),

    /// The store is temporarily unable to serve the read.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The content filter rejected the object.
    #[error("content filter failed: {0}")]
    Filter(FilterError),

    /// Any other store failure.
    #[error("store error: {0}")]
    Store(String),
}

impl AccessError {
    /// Returns `true` if the same read may succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Unavailable(_))
    }
}

impl From<StoreError> for AccessError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => Self::NotFound(what),
            StoreError::Timeout(what) | StoreError::Unavailable(what) => Self::Unavailable(what),
            other => Self::Store(other.to_string()),
        }
    }
}

impl From<FilterError> for AccessError {
    fn from(err: FilterError) -> Self {
        match err {
            FilterError::Range(range) => Self::InvalidRange(range),
            other => Self::Filter(other),
        }
    }
}

impl From<RangeError> for AccessError {
    fn from(err: RangeError) -> Self {
        Self::InvalidRange(err)
    }
}
