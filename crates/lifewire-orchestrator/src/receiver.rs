//! The receiver: reads newly created objects through the filtering access
//! layer and forwards the filtered content downstream.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use lifewire_filter::{FilteringAccessLayer, ReadOptions};
use lifewire_observe::ReportPayload;
use lifewire_types::{ObjectNotification, ObjectReference};

use crate::error::{HandlerError, ReceiverError};
use crate::registry::ObjectEventHandler;
use crate::report::Reporter;
use crate::retry::{with_retry, RetryError, RetryPolicy};
use crate::sink::{Delivery, DownstreamSink};

/// Reads objects as `caller_account` and hands them to a sink.
pub struct Receiver {
    layer: Arc<FilteringAccessLayer>,
    sink: Arc<dyn DownstreamSink>,
    reporter: Arc<dyn Reporter>,
    retry: RetryPolicy,
    caller_account: String,
    read_timeout: Option<Duration>,
}

impl Receiver {
    /// Creates a receiver reading with the layer's default timeout.
    pub fn new(
        layer: Arc<FilteringAccessLayer>,
        sink: Arc<dyn DownstreamSink>,
        reporter: Arc<dyn Reporter>,
        retry: RetryPolicy,
        caller_account: impl Into<String>,
    ) -> Self {
        Self {
            layer,
            sink,
            reporter,
            retry,
            caller_account: caller_account.into(),
            read_timeout: None,
        }
    }

    /// Overrides the per-read deadline.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Reads `object` through the access layer and delivers it.
    ///
    /// # Errors
    ///
    /// [`ReceiverError::Read`] or [`ReceiverError::Delivery`] when the read
    /// or the sink fails permanently or outlives the retry policy. Either
    /// way a `DELIVERY_EXHAUSTED` report is written first.
    pub async fn on_object_created(
        &self,
        object: &ObjectReference,
    ) -> Result<Delivery, ReceiverError> {
        self.receive(object, None).await
    }

    async fn receive(
        &self,
        object: &ObjectReference,
        etag: Option<String>,
    ) -> Result<Delivery, ReceiverError> {
        let options = ReadOptions {
            timeout: self.read_timeout,
            ..ReadOptions::default()
        };
        let caller = self.caller_account.as_str();

        let read_attempts = AtomicU32::new(0);
        let counter = &read_attempts;
        let body = with_retry(&self.retry, "read_object", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            self.layer.get(caller, object, options).await
        })
        .await
        .map_err(RetryError::into_inner);
        let body = match body {
            Ok(body) => body,
            Err(source) => {
                let attempts = read_attempts.load(Ordering::SeqCst);
                self.report_exhausted(object, attempts, source.to_string())
                    .await;
                return Err(ReceiverError::Read {
                    object: object.to_string(),
                    attempts,
                    source,
                });
            }
        };

        let delivery = Delivery {
            object: object.clone(),
            etag,
            body,
            delivered_at: Utc::now(),
        };

        let sink_attempts = AtomicU32::new(0);
        let counter = &sink_attempts;
        let delivery_ref = &delivery;
        let sent = with_retry(&self.retry, "deliver", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            self.sink.deliver(delivery_ref).await
        })
        .await;
        if let Err(err) = sent {
            let source = err.into_inner();
            let attempts = sink_attempts.load(Ordering::SeqCst);
            self.report_exhausted(object, attempts, source.to_string())
                .await;
            return Err(ReceiverError::Delivery {
                object: object.to_string(),
                attempts,
                source,
            });
        }

        tracing::info!(
            object = %object,
            bytes = delivery.body.len(),
            "object delivered downstream"
        );
        Ok(delivery)
    }

    async fn report_exhausted(
        &self,
        object: &ObjectReference,
        attempts: u32,
        last_error: String,
    ) {
        tracing::warn!(object = %object, attempts, error = %last_error, "delivery abandoned");
        self.reporter
            .report(ReportPayload::DeliveryExhausted {
                storage_location: object.storage_location.clone(),
                key: object.key.clone(),
                attempts,
                last_error,
            })
            .await;
    }
}

#[async_trait]
impl ObjectEventHandler for Receiver {
    async fn on_object_created(
        &self,
        notification: &ObjectNotification,
    ) -> Result<(), HandlerError> {
        self.receive(&notification.object, Some(notification.etag.clone()))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests;
