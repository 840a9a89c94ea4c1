//! In-process [`ObjectStore`].

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use lifewire_types::{
    NotificationSubscription, ObjectMeta, ObjectNotification, ObjectReference, SubscriptionKey,
    TriggerCondition,
};
use tokio::sync::{broadcast, RwLock};

use crate::error::StoreError;
use crate::facade::{etag_of, ObjectStore};
use crate::hub::NotificationHub;

#[derive(Debug, Clone)]
struct StoredObject {
    body: Bytes,
    meta: ObjectMeta,
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<(String, String), StoredObject>,
    subscriptions: BTreeSet<SubscriptionKey>,
}

impl State {
    fn active_at(&self, location: &str) -> Vec<SubscriptionKey> {
        self.subscriptions
            .iter()
            .filter(|k| k.storage_location == location)
            .cloned()
            .collect()
    }
}

/// An object store held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
    hub: NotificationHub,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

fn object_key(object: &ObjectReference) -> (String, String) {
    (object.storage_location.clone(), object.key.clone())
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get_subscriptions(
        &self,
        location: &str,
    ) -> Result<Vec<NotificationSubscription>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .active_at(location)
            .iter()
            .map(NotificationSubscription::active)
            .collect())
    }

    async fn register_subscription(
        &self,
        subscription: &NotificationSubscription,
    ) -> Result<(), StoreError> {
        let key = subscription.key();
        let mut state = self.state.write().await;
        if state.subscriptions.contains(&key) {
            return Err(StoreError::AlreadyExists(key.to_string()));
        }
        if let Some(existing) = state.subscriptions.iter().find(|k| {
            k.storage_location == key.storage_location
                && k.trigger_condition == key.trigger_condition
        }) {
            return Err(StoreError::Conflict {
                key: key.to_string(),
                existing_target: existing.target_handler_ref.clone(),
            });
        }
        state.subscriptions.insert(key);
        Ok(())
    }

    async fn unregister_subscription(&self, key: &SubscriptionKey) -> Result<(), StoreError> {
        self.state.write().await.subscriptions.remove(key);
        Ok(())
    }

    async fn put_object(
        &self,
        object: &ObjectReference,
        body: Bytes,
    ) -> Result<ObjectMeta, StoreError> {
        let meta = ObjectMeta {
            key: object.key.clone(),
            size: body.len() as u64,
            etag: etag_of(&body),
            last_modified: Utc::now(),
        };
        let active = {
            let mut state = self.state.write().await;
            state.objects.insert(
                object_key(object),
                StoredObject {
                    body,
                    meta: meta.clone(),
                },
            );
            state.active_at(&object.storage_location)
        };
        self.hub.raise(
            &active,
            TriggerCondition::ObjectCreated,
            object,
            meta.size,
            &meta.etag,
        );
        Ok(meta)
    }

    async fn get_object(&self, object: &ObjectReference) -> Result<Bytes, StoreError> {
        let state = self.state.read().await;
        state
            .objects
            .get(&object_key(object))
            .map(|stored| stored.body.clone())
            .ok_or_else(|| StoreError::NotFound(object.to_string()))
    }

    async fn head_object(&self, object: &ObjectReference) -> Result<ObjectMeta, StoreError> {
        let state = self.state.read().await;
        state
            .objects
            .get(&object_key(object))
            .map(|stored| stored.meta.clone())
            .ok_or_else(|| StoreError::NotFound(object.to_string()))
    }

    async fn list_objects(
        &self,
        location: &str,
        prefix: &str,
    ) -> Result<Vec<ObjectMeta>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .objects
            .iter()
            .filter(|((loc, key), _)| loc == location && key.starts_with(prefix))
            .map(|(_, stored)| stored.meta.clone())
            .collect())
    }

    async fn delete_object(&self, object: &ObjectReference) -> Result<bool, StoreError> {
        let active = {
            let mut state = self.state.write().await;
            if state.objects.remove(&object_key(object)).is_none() {
                return Ok(false);
            }
            state.active_at(&object.storage_location)
        };
        self.hub
            .raise(&active, TriggerCondition::ObjectRemoved, object, 0, "");
        Ok(true)
    }

    fn notifications(&self) -> broadcast::Receiver<ObjectNotification> {
        self.hub.subscribe()
    }
}
