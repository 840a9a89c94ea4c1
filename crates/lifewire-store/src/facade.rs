//! The [`ObjectStore`] trait.

use async_trait::async_trait;
use bytes::Bytes;
use lifewire_types::{
    NotificationSubscription, ObjectMeta, ObjectNotification, ObjectReference, SubscriptionKey,
};
use sha2::{Digest, Sha256};
use tokio::sync::broadcast;

use crate::error::StoreError;

/// A bucket-like object store with a notification-subscription sub-API.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Lists the Active subscriptions at `location`.
    async fn get_subscriptions(
        &self,
        location: &str,
    ) -> Result<Vec<NotificationSubscription>, StoreError>;

    /// Registers `subscription` as Active.
    ///
    /// Fails with [`StoreError::AlreadyExists`] when the same key is already
    /// Active, and with [`StoreError::Conflict`] when a different target holds
    /// the same location and trigger. The check and the insert are one atomic
    /// step inside the store.
    async fn register_subscription(
        &self,
        subscription: &NotificationSubscription,
    ) -> Result<(), StoreError>;

    /// Removes the subscription at `key`. Removing an absent key succeeds.
    async fn unregister_subscription(&self, key: &SubscriptionKey) -> Result<(), StoreError>;

    /// Stores `body` at `object`, replacing any previous body, and raises
    /// `ObjectCreated` notifications.
    async fn put_object(
        &self,
        object: &ObjectReference,
        body: Bytes,
    ) -> Result<ObjectMeta, StoreError>;

    /// Returns the stored bytes, or [`StoreError::NotFound`].
    async fn get_object(&self, object: &ObjectReference) -> Result<Bytes, StoreError>;

    /// Returns the stored metadata, or [`StoreError::NotFound`].
    async fn head_object(&self, object: &ObjectReference) -> Result<ObjectMeta, StoreError>;

    /// Lists objects at `location` whose key starts with `prefix`, in key order.
    async fn list_objects(
        &self,
        location: &str,
        prefix: &str,
    ) -> Result<Vec<ObjectMeta>, StoreError>;

    /// Deletes `object`, raising `ObjectRemoved` notifications. Returns
    /// whether an object was actually removed; deleting a missing object
    /// raises nothing.
    async fn delete_object(&self, object: &ObjectReference) -> Result<bool, StoreError>;

    /// Subscribes to the notifications this store raises.
    fn notifications(&self) -> broadcast::Receiver<ObjectNotification>;
}

/// The digest the store reports as an object's etag.
pub fn etag_of(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}
