//! Fan-out of object notifications to in-process listeners.

use chrono::Utc;
use lifewire_types::{ObjectNotification, ObjectReference, SubscriptionKey, TriggerCondition};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Channel capacity used by the bundled stores.
pub const DEFAULT_HUB_CAPACITY: usize = 1024;

/// Publishes [`ObjectNotification`]s on a broadcast channel.
///
/// Listeners that fall more than the channel capacity behind lose the oldest
/// notifications and observe `RecvError::Lagged`.
#[derive(Debug, Clone)]
pub struct NotificationHub {
    tx: broadcast::Sender<ObjectNotification>,
}

impl NotificationHub {
    /// Creates a hub with room for `capacity` undelivered notifications.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Returns a receiver for notifications raised from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ObjectNotification> {
        self.tx.subscribe()
    }

    /// Raises one notification per key in `active` whose trigger equals
    /// `trigger`. Returns how many were raised.
    pub fn raise<'a>(
        &self,
        active: impl IntoIterator<Item = &'a SubscriptionKey>,
        trigger: TriggerCondition,
        object: &ObjectReference,
        size: u64,
        etag: &str,
    ) -> usize {
        let occurred_at = Utc::now();
        let mut raised = 0;
        for key in active
            .into_iter()
            .filter(|k| k.trigger_condition == trigger && k.storage_location == object.storage_location)
        {
            let notification = ObjectNotification {
                event_id: Uuid::new_v4(),
                trigger_condition: trigger,
                object: object.clone(),
                target_handler_ref: key.target_handler_ref.clone(),
                size,
                etag: etag.to_string(),
                occurred_at,
            };
            if self.tx.send(notification).is_err() {
                tracing::debug!(
                    object = %object,
                    target = %key.target_handler_ref,
                    "no notification listeners; notification discarded"
                );
            }
            raised += 1;
        }
        raised
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new(DEFAULT_HUB_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn raises_only_for_matching_trigger_and_location() {
        let hub = NotificationHub::new(8);
        let mut rx = hub.subscribe();
        let keys = [
            SubscriptionKey::new("logs", TriggerCondition::ObjectCreated, "receiver"),
            SubscriptionKey::new("logs", TriggerCondition::ObjectRemoved, "janitor"),
            SubscriptionKey::new("metrics", TriggerCondition::ObjectCreated, "receiver"),
        ];
        let object = ObjectReference::new("logs", "a.gz");

        let raised = hub.raise(&keys, TriggerCondition::ObjectCreated, &object, 3, "abc");
        assert_eq!(raised, 1);

        let n = rx.recv().await.expect("notification");
        assert_eq!(n.target_handler_ref, "receiver");
        assert_eq!(n.object, object);
        assert_eq!(n.size, 3);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn raising_without_listeners_is_not_an_error() {
        let hub = NotificationHub::default();
        let keys = [SubscriptionKey::new(
            "logs",
            TriggerCondition::ObjectCreated,
            "receiver",
        )];
        let raised = hub.raise(
            &keys,
            TriggerCondition::ObjectCreated,
            &ObjectReference::new("logs", "a"),
            0,
            "",
        );
        assert_eq!(raised, 1);
    }
}
