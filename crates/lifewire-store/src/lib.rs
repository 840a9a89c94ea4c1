//! Object Store Facade for the Lifewire orchestrator.
//!
//! [`ObjectStore`] abstracts a bucket-like store: objects are put, read,
//! listed and deleted by `(storage_location, key)`, and notification
//! subscriptions are registered against a location. Every put or delete
//! raises one [`ObjectNotification`](lifewire_types::ObjectNotification) per
//! Active subscription with a matching trigger, published on a broadcast
//! channel that the delivery pump drains.
//!
//! The store is the system of record for subscription state. Same-key
//! exclusion lives in the store itself (`AlreadyExists`, `Conflict`), never
//! in an in-process lock, so any number of orchestrator replicas may share a
//! store.
//!
//! Two implementations ship here:
//!
//! - [`MemoryStore`], for tests and single-process deployments.
//! - [`SqliteStore`], durable, on the pooled database from `lifewire-db`.
//!
//! The [`PermissionGrantor`] seam models the identity collaborator that lets
//! the store invoke a target handler.

mod error;
mod facade;
mod grant;
mod hub;
mod memory;
mod sqlite;

pub use error::{GrantError, StoreError};
pub use facade::{etag_of, ObjectStore};
pub use grant::{
    GrantStatus, InvokeGrant, MemoryGrants, PermissionGrantor, RevokeStatus, SqliteGrants,
    STORE_NOTIFICATION_PRINCIPAL,
};
pub use hub::{NotificationHub, DEFAULT_HUB_CAPACITY};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
