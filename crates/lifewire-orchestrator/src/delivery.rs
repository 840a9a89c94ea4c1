//! Drains the store's notification channel into the handler registry.

use std::sync::Arc;

use lifewire_observe::ReportPayload;
use lifewire_types::{ObjectNotification, TriggerCondition};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::HandlerError;
use crate::registry::HandlerRegistry;
use crate::report::Reporter;

/// Forwards each [`ObjectNotification`] to the handler it names, one tracked
/// task per notification.
///
/// Notifications the pump cannot hand to a handler (channel overflow, or no
/// handler under the target name) are reported as `NOTIFICATIONS_LOST`.
#[derive(Clone)]
pub struct NotificationPump {
    registry: Arc<HandlerRegistry>,
    reporter: Arc<dyn Reporter>,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl NotificationPump {
    /// Creates a pump. Handler tasks go on `tracker`; cancelling `cancel`
    /// stops the pump from taking new notifications.
    pub fn new(
        registry: Arc<HandlerRegistry>,
        reporter: Arc<dyn Reporter>,
        tracker: TaskTracker,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            reporter,
            tracker,
            cancel,
        }
    }

    /// Starts draining `rx` on a tracked task.
    pub fn spawn(&self, rx: broadcast::Receiver<ObjectNotification>) -> JoinHandle<()> {
        let pump = self.clone();
        self.tracker.spawn(async move { pump.run(rx).await })
    }

    async fn run(self, mut rx: broadcast::Receiver<ObjectNotification>) {
        tracing::debug!("notification pump started");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("notification pump stopping");
                    break;
                }
                received = rx.recv() => match received {
                    Ok(notification) => {
                        let pump = self.clone();
                        // Handler failures are logged and reported by
                        // `deliver_one` or by the handler itself.
                        self.tracker.spawn(async move {
                            let _ = pump.deliver_one(&notification).await;
                        });
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "notification pump lagged; notifications lost");
                        self.reporter
                            .report(ReportPayload::NotificationsLost {
                                storage_location: None,
                                key: None,
                                count: skipped,
                                reason: "notification channel overflowed".to_string(),
                            })
                            .await;
                    }
                    Err(RecvError::Closed) => {
                        tracing::info!("notification channel closed");
                        break;
                    }
                },
            }
        }
    }

    /// Invokes the handler named by `notification`.
    ///
    /// # Errors
    ///
    /// Returns the handler's error, or [`HandlerError::Other`] if no handler
    /// is registered under `target_handler_ref`; the latter is also reported.
    pub async fn deliver_one(&self, notification: &ObjectNotification) -> Result<(), HandlerError> {
        let Some(handler) = self.registry.resolve(&notification.target_handler_ref) else {
            let reason = format!(
                "no handler registered as {}",
                notification.target_handler_ref
            );
            tracing::warn!(
                handler = %notification.target_handler_ref,
                object = %notification.object,
                "notification names an unregistered handler"
            );
            self.reporter
                .report(ReportPayload::NotificationsLost {
                    storage_location: Some(notification.object.storage_location.clone()),
                    key: Some(notification.object.key.clone()),
                    count: 1,
                    reason: reason.clone(),
                })
                .await;
            return Err(HandlerError::Other(reason));
        };

        let result = match notification.trigger_condition {
            TriggerCondition::ObjectCreated => handler.on_object_created(notification).await,
            TriggerCondition::ObjectRemoved => handler.on_object_removed(notification).await,
        };
        match &result {
            Ok(()) => tracing::debug!(
                event_id = %notification.event_id,
                handler = %notification.target_handler_ref,
                object = %notification.object,
                trigger = %notification.trigger_condition,
                "notification handled"
            ),
            Err(e) => tracing::warn!(
                event_id = %notification.event_id,
                handler = %notification.target_handler_ref,
                object = %notification.object,
                error = %e,
                "notification handler failed"
            ),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use lifewire_types::ObjectReference;
    use tokio::sync::Mutex;

    use super::*;
    use crate::registry::ObjectEventHandler;
    use crate::report::MemoryReporter;
    use lifewire_observe::ReportKind;

    #[derive(Default)]
    struct Recorder {
        created: Mutex<Vec<String>>,
        removed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ObjectEventHandler for Recorder {
        async fn on_object_created(&self, n: &ObjectNotification) -> Result<(), HandlerError> {
            self.created.lock().await.push(n.object.key.clone());
            Ok(())
        }

        async fn on_object_removed(&self, n: &ObjectNotification) -> Result<(), HandlerError> {
            self.removed.lock().await.push(n.object.key.clone());
            Ok(())
        }
    }

    fn notification(trigger: TriggerCondition, target: &str, key: &str) -> ObjectNotification {
        ObjectNotification {
            event_id: uuid::Uuid::new_v4(),
            trigger_condition: trigger,
            object: ObjectReference::new("loc1", key),
            target_handler_ref: target.to_string(),
            size: 0,
            etag: String::new(),
            occurred_at: Utc::now(),
        }
    }

    fn pump(recorder: Arc<Recorder>, reporter: Arc<MemoryReporter>) -> NotificationPump {
        let registry = HandlerRegistry::new().with("receiver", recorder);
        NotificationPump::new(
            Arc::new(registry),
            reporter,
            TaskTracker::new(),
            CancellationToken::new(),
        )
    }

    async fn wait_for_created(recorder: &Recorder, n: usize) {
        for _ in 0..100 {
            if recorder.created.lock().await.len() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn routes_by_trigger_and_target() {
        let recorder = Arc::new(Recorder::default());
        let reporter = Arc::new(MemoryReporter::new());
        let pump = pump(recorder.clone(), reporter.clone());
        pump.deliver_one(&notification(TriggerCondition::ObjectCreated, "receiver", "a"))
            .await
            .unwrap();
        pump.deliver_one(&notification(TriggerCondition::ObjectRemoved, "receiver", "b"))
            .await
            .unwrap();
        assert!(pump
            .deliver_one(&notification(TriggerCondition::ObjectCreated, "nobody", "c"))
            .await
            .is_err());

        assert_eq!(*recorder.created.lock().await, vec!["a".to_string()]);
        assert_eq!(*recorder.removed.lock().await, vec!["b".to_string()]);

        let lost = reporter.of_kind(ReportKind::NotificationsLost).await;
        assert_eq!(
            lost,
            vec![ReportPayload::NotificationsLost {
                storage_location: Some("loc1".to_string()),
                key: Some("c".to_string()),
                count: 1,
                reason: "no handler registered as nobody".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn drains_channel_until_cancelled() {
        let recorder = Arc::new(Recorder::default());
        let reporter = Arc::new(MemoryReporter::new());
        let pump = pump(recorder.clone(), reporter.clone());
        let (tx, rx) = broadcast::channel(16);
        let handle = pump.spawn(rx);

        tx.send(notification(TriggerCondition::ObjectCreated, "receiver", "a"))
            .unwrap();
        tx.send(notification(TriggerCondition::ObjectCreated, "receiver", "b"))
            .unwrap();

        wait_for_created(&recorder, 2).await;
        pump.cancel.cancel();
        handle.await.unwrap();
        pump.tracker.close();
        pump.tracker.wait().await;

        let mut created = recorder.created.lock().await.clone();
        created.sort();
        assert_eq!(created, vec!["a".to_string(), "b".to_string()]);
        assert!(reporter.reports().await.is_empty());
    }

    #[tokio::test]
    async fn overflowed_notifications_are_reported() {
        let recorder = Arc::new(Recorder::default());
        let reporter = Arc::new(MemoryReporter::new());
        let pump = pump(recorder.clone(), reporter.clone());
        let (tx, rx) = broadcast::channel(2);
        for key in ["a", "b", "c", "d", "e"] {
            tx.send(notification(TriggerCondition::ObjectCreated, "receiver", key))
                .unwrap();
        }
        let handle = pump.spawn(rx);

        wait_for_created(&recorder, 2).await;
        pump.cancel.cancel();
        handle.await.unwrap();
        pump.tracker.close();
        pump.tracker.wait().await;

        let mut created = recorder.created.lock().await.clone();
        created.sort();
        assert_eq!(created, vec!["d".to_string(), "e".to_string()]);

        let lost = reporter.of_kind(ReportKind::NotificationsLost).await;
        assert_eq!(lost.len(), 1);
        assert!(matches!(
            &lost[0],
            ReportPayload::NotificationsLost { count: 3, storage_location: None, .. }
        ));
    }

    #[tokio::test]
    async fn stops_when_channel_closes() {
        let pump = pump(Arc::new(Recorder::default()), Arc::new(MemoryReporter::new()));
        let (tx, rx) = broadcast::channel::<ObjectNotification>(4);
        let handle = pump.spawn(rx);
        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("pump exits on close")
            .unwrap();
    }
}
