use std::collections::BTreeSet;

use bytes::Bytes;
use lifewire_filter::{AccessError, FieldMatchFilter};
use lifewire_observe::ReportKind;
use lifewire_store::{MemoryStore, ObjectStore};
use lifewire_types::{AccessFeature, FilterConfiguration, OperationKind};
use tokio::sync::Mutex;

use super::*;
use crate::error::SinkError;
use crate::report::MemoryReporter;

const LOCATION: &str = "loc1";
const ACCOUNT: &str = "local";

const LOG: &str = "\
2023-01-05 10:00:00,001 INFO [main] |app.DAGAppMaster|: Created DAG
2023-01-05 10:00:00,002 INFO [main] |app.Other|: ignored
";
const FILTERED: &str = "2023-01-05 10:00:00,001 INFO [main] |app.DAGAppMaster|: Created DAG\n";

/// Fails the first `transient` deliveries, then either accepts or rejects.
struct ScriptedSink {
    transient: u32,
    reject: bool,
    calls: AtomicU32,
    accepted: Mutex<Vec<Delivery>>,
}

impl ScriptedSink {
    fn new(transient: u32, reject: bool) -> Self {
        Self {
            transient,
            reject,
            calls: AtomicU32::new(0),
            accepted: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl DownstreamSink for ScriptedSink {
    async fn deliver(&self, delivery: &Delivery) -> Result<(), SinkError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.transient {
            return Err(SinkError::Transient("503 Service Unavailable".to_string()));
        }
        if self.reject {
            return Err(SinkError::Rejected("400 Bad Request".to_string()));
        }
        self.accepted.lock().await.push(delivery.clone());
        Ok(())
    }
}

struct Fixture {
    store: Arc<MemoryStore>,
    sink: Arc<ScriptedSink>,
    reporter: Arc<MemoryReporter>,
    receiver: Receiver,
}

fn fixture(sink: ScriptedSink, caller: &str) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let config = FilterConfiguration {
        supporting_location: LOCATION.to_string(),
        intercepted_operations: BTreeSet::from([OperationKind::GetObject]),
        transform_ref: "field-match".to_string(),
        allowed_features: AccessFeature::ALL.into_iter().collect(),
    };
    let layer = Arc::new(FilteringAccessLayer::new(
        store.clone(),
        Arc::new(FieldMatchFilter::default()),
        config,
        [ACCOUNT.to_string()],
        Duration::from_secs(1),
    ));
    let sink = Arc::new(sink);
    let reporter = Arc::new(MemoryReporter::new());
    let receiver = Receiver::new(
        layer,
        sink.clone(),
        reporter.clone(),
        RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(2), 2.0),
        caller,
    );
    Fixture {
        store,
        sink,
        reporter,
        receiver,
    }
}

async fn put_log(store: &MemoryStore, key: &str) -> ObjectReference {
    let object = ObjectReference::new(LOCATION, key);
    store
        .put_object(&object, Bytes::from_static(LOG.as_bytes()))
        .await
        .unwrap();
    object
}

#[tokio::test]
async fn delivers_filtered_content() {
    let fx = fixture(ScriptedSink::new(0, false), ACCOUNT);
    let object = put_log(&fx.store, "obj1").await;

    let delivery = fx.receiver.on_object_created(&object).await.unwrap();
    assert_eq!(delivery.body, Bytes::from_static(FILTERED.as_bytes()));

    let accepted = fx.sink.accepted.lock().await;
    assert_eq!(accepted.len(), 1);
    assert_eq!(accepted[0].object, object);
    assert_eq!(accepted[0].body, Bytes::from_static(FILTERED.as_bytes()));
    assert!(fx.reporter.reports().await.is_empty());
}

#[tokio::test]
async fn transient_sink_failures_are_retried() {
    let fx = fixture(ScriptedSink::new(2, false), ACCOUNT);
    let object = put_log(&fx.store, "obj1").await;
    fx.receiver.on_object_created(&object).await.unwrap();
    assert_eq!(fx.sink.calls.load(Ordering::SeqCst), 3);
    assert_eq!(fx.sink.accepted.lock().await.len(), 1);
}

#[tokio::test]
async fn exhausted_delivery_is_reported_not_dropped() {
    let fx = fixture(ScriptedSink::new(u32::MAX, false), ACCOUNT);
    let object = put_log(&fx.store, "obj1").await;

    let err = fx.receiver.on_object_created(&object).await.unwrap_err();
    assert!(matches!(
        err,
        ReceiverError::Delivery { attempts: 3, source: SinkError::Transient(_), .. }
    ));

    let reports = fx.reporter.of_kind(ReportKind::DeliveryExhausted).await;
    assert_eq!(reports.len(), 1);
    assert!(matches!(
        &reports[0],
        ReportPayload::DeliveryExhausted { key, attempts: 3, .. } if key == "obj1"
    ));
}

#[tokio::test]
async fn rejected_delivery_is_not_retried() {
    let fx = fixture(ScriptedSink::new(0, true), ACCOUNT);
    let object = put_log(&fx.store, "obj1").await;

    let err = fx.receiver.on_object_created(&object).await.unwrap_err();
    assert!(matches!(err, ReceiverError::Delivery { attempts: 1, .. }));
    assert_eq!(fx.sink.calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        fx.reporter.of_kind(ReportKind::DeliveryExhausted).await.len(),
        1
    );
}

#[tokio::test]
async fn missing_object_is_a_read_failure() {
    let fx = fixture(ScriptedSink::new(0, false), ACCOUNT);
    let object = ObjectReference::new(LOCATION, "gone");

    let err = fx.receiver.on_object_created(&object).await.unwrap_err();
    assert!(matches!(
        err,
        ReceiverError::Read { attempts: 1, source: AccessError::NotFound(_), .. }
    ));
    assert_eq!(fx.sink.calls.load(Ordering::SeqCst), 0);
    assert_eq!(
        fx.reporter.of_kind(ReportKind::DeliveryExhausted).await.len(),
        1
    );
}

#[tokio::test]
async fn receiver_outside_the_boundary_is_denied() {
    let fx = fixture(ScriptedSink::new(0, false), "999999999999");
    let object = put_log(&fx.store, "obj1").await;

    let err = fx.receiver.on_object_created(&object).await.unwrap_err();
    assert!(matches!(
        err,
        ReceiverError::Read { source: AccessError::AccessDenied { .. }, .. }
    ));
    assert_eq!(fx.sink.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn notification_handler_passes_the_etag_through() {
    let fx = fixture(ScriptedSink::new(0, false), ACCOUNT);
    let object = put_log(&fx.store, "obj1").await;
    let notification = ObjectNotification {
        event_id: uuid::Uuid::new_v4(),
        trigger_condition: lifewire_types::TriggerCondition::ObjectCreated,
        object: object.clone(),
        target_handler_ref: "receiver".to_string(),
        size: LOG.len() as u64,
        etag: lifewire_store::etag_of(LOG.as_bytes()),
        occurred_at: Utc::now(),
    };

    ObjectEventHandler::on_object_created(&fx.receiver, &notification)
        .await
        .unwrap();
    let accepted = fx.sink.accepted.lock().await;
    assert_eq!(accepted[0].etag.as_deref(), Some(notification.etag.as_str()));
}

#[tokio::test]
async fn exhausted_delivery_runs_on_a_spawned_task() {
    let fx = fixture(ScriptedSink::new(u32::MAX, false), ACCOUNT);
    let object = put_log(&fx.store, "obj1").await;
    let notification = ObjectNotification {
        event_id: uuid::Uuid::new_v4(),
        trigger_condition: lifewire_types::TriggerCondition::ObjectCreated,
        object,
        target_handler_ref: "receiver".to_string(),
        size: LOG.len() as u64,
        etag: lifewire_store::etag_of(LOG.as_bytes()),
        occurred_at: Utc::now(),
    };

    let handler: Arc<dyn ObjectEventHandler> = Arc::new(fx.receiver);
    let err = tokio::spawn(async move { handler.on_object_created(&notification).await })
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(
        err,
        HandlerError::Receiver(ReceiverError::Delivery { attempts: 3, .. })
    ));
    assert_eq!(
        fx.reporter.of_kind(ReportKind::DeliveryExhausted).await.len(),
        1
    );
}
