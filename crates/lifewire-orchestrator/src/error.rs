//! Error types for the orchestration layer.

use lifewire_filter::AccessError;
use lifewire_store::{GrantError, StoreError};
use thiserror::Error;

use crate::retry::Retryable;

/// Errors from the subscription manager.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubscriptionError {
    /// The target handler is not registered, so nothing could receive
    /// notifications.
    #[error("target handler {0} is not registered")]
    UnresolvableHandler(String),

    /// A different target already holds the location and trigger.
    #[error("subscription {key} conflicts with existing target {existing_target}")]
    Conflict {
        /// The key that was requested.
        key: String,
        /// The target currently subscribed.
        existing_target: String,
    },

    /// A transient failure outlived the retry policy.
    #[error("{operation} gave up after {attempts} attempts: {last_error}")]
    Exhausted {
        /// The step that was being retried.
        operation: &'static str,
        /// Attempts made.
        attempts: u32,
        /// The last error observed.
        last_error: String,
    },

    /// The store rejected the operation outright.
    #[error(transparent)]
    Store(StoreError),

    /// The identity collaborator refused the grant.
    #[error(transparent)]
    Grant(GrantError),
}

/// Errors from a downstream sink.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    /// The sink may accept the delivery if it is repeated.
    #[error("sink temporarily unavailable: {0}")]
    Transient(String),

    /// The sink refused the delivery.
    #[error("sink rejected delivery: {0}")]
    Rejected(String),

    /// The sink's client could not be set up.
    #[error("sink client unavailable: {0}")]
    Client(String),
}

impl Retryable for SinkError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Errors from the receiver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReceiverError {
    /// The object could not be read through the access layer.
    #[error("reading {object} failed after {attempts} attempts: {source}")]
    Read {
        /// The object being delivered.
        object: String,
        /// Attempts made.
        attempts: u32,
        /// The last access error.
        #[source]
        source: AccessError,
    },

    /// The sink did not accept the object.
    #[error("delivering {object} failed after {attempts} attempts: {source}")]
    Delivery {
        /// The object being delivered.
        object: String,
        /// Attempts made.
        attempts: u32,
        /// The last sink error.
        #[source]
        source: SinkError,
    },
}

/// Errors returned by lifecycle and object event handlers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    /// The subscription manager failed.
    #[error(transparent)]
    Subscription(#[from] SubscriptionError),

    /// The receiver failed.
    #[error(transparent)]
    Receiver(#[from] ReceiverError),

    /// A handler-specific failure.
    #[error("{0}")]
    Other(String),
}
