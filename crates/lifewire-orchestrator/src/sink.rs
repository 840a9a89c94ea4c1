//! Downstream sinks that receive filtered objects.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use lifewire_types::ObjectReference;
use serde::Serialize;

use crate::error::SinkError;

/// A filtered object on its way downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// The object the content came from.
    pub object: ObjectReference,
    /// Digest of the stored (unfiltered) bytes, when the notification
    /// carried one.
    pub etag: Option<String>,
    /// The filtered content.
    pub body: Bytes,
    /// When the receiver read the object.
    pub delivered_at: DateTime<Utc>,
}

/// Where the receiver forwards filtered content.
#[async_trait]
pub trait DownstreamSink: Send + Sync {
    /// Accepts one delivery. Transient errors are retried by the caller.
    async fn deliver(&self, delivery: &Delivery) -> Result<(), SinkError>;
}

/// Writes each delivery to the log, one line per filtered record.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl DownstreamSink for LogSink {
    async fn deliver(&self, delivery: &Delivery) -> Result<(), SinkError> {
        let text = String::from_utf8_lossy(&delivery.body);
        let mut records = 0usize;
        for line in text.lines().filter(|l| !l.is_empty()) {
            records += 1;
            tracing::info!(
                storage_location = %delivery.object.storage_location,
                key = %delivery.object.key,
                record = line,
                "filtered record"
            );
        }
        tracing::info!(
            object = %delivery.object,
            etag = ?delivery.etag,
            bytes = delivery.body.len(),
            records,
            "delivery logged"
        );
        Ok(())
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    storage_location: &'a str,
    key: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    etag: Option<&'a str>,
    size: usize,
    delivered_at: DateTime<Utc>,
    body_base64: String,
}

/// POSTs each delivery as JSON to a fixed URL.
#[derive(Debug, Clone)]
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    /// Creates a sink posting to `url` with a per-request `timeout`.
    ///
    /// # Errors
    ///
    /// [`SinkError::Client`] if the HTTP client cannot be built (e.g. the
    /// TLS backend fails to initialise).
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("lifewire/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SinkError::Client(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// The configured endpoint.
    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Status codes worth retrying: 408, 429 and every 5xx.
fn is_transient_status(status: reqwest::StatusCode) -> bool {
    status.is_server_error()
        || status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
}

#[async_trait]
impl DownstreamSink for WebhookSink {
    async fn deliver(&self, delivery: &Delivery) -> Result<(), SinkError> {
        let payload = WebhookPayload {
            storage_location: &delivery.object.storage_location,
            key: &delivery.object.key,
            etag: delivery.etag.as_deref(),
            size: delivery.body.len(),
            delivered_at: delivery.delivered_at,
            body_base64: base64::engine::general_purpose::STANDARD.encode(&delivery.body),
        };
        let resp = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() || e.is_request() {
                    SinkError::Transient(e.to_string())
                } else {
                    SinkError::Rejected(e.to_string())
                }
            })?;

        let status = resp.status();
        if status.is_success() {
            tracing::debug!(url = %self.url, object = %delivery.object, %status, "webhook accepted delivery");
            Ok(())
        } else if is_transient_status(status) {
            Err(SinkError::Transient(format!("webhook returned {status}")))
        } else {
            Err(SinkError::Rejected(format!("webhook returned {status}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(is_transient_status(reqwest::StatusCode::SERVICE_UNAVAILABLE));
        assert!(is_transient_status(reqwest::StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_transient_status(reqwest::StatusCode::BAD_REQUEST));
        assert!(!is_transient_status(reqwest::StatusCode::FORBIDDEN));
    }

    #[tokio::test]
    async fn log_sink_accepts_everything() {
        let delivery = Delivery {
            object: ObjectReference::new("loc1", "app.log"),
            etag: Some("abc".to_string()),
            body: Bytes::from_static(b"one\ntwo\n"),
            delivered_at: Utc::now(),
        };
        assert_eq!(LogSink.deliver(&delivery).await, Ok(()));
    }

    #[tokio::test]
    async fn unreachable_webhook_is_transient() {
        // Port 9 on localhost refuses connections.
        let sink = WebhookSink::new("http://127.0.0.1:9/hook", Duration::from_millis(500)).unwrap();
        assert_eq!(sink.url(), "http://127.0.0.1:9/hook");
        let delivery = Delivery {
            object: ObjectReference::new("loc1", "app.log"),
            etag: Some("abc".to_string()),
            body: Bytes::new(),
            delivered_at: Utc::now(),
        };
        let err = sink.deliver(&delivery).await.unwrap_err();
        assert!(matches!(err, SinkError::Transient(_)), "{err:?}");
    }
}
