//! Lifecycle events and the patterns that select them.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// State a compute resource reported in a lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceState {
    /// The resource is up and producing objects.
    Running,
    /// The resource is gone.
    Terminated,
    /// Any other transition (pending, stopping, custom actions).
    Other,
}

impl ResourceState {
    /// Returns the canonical lowercase label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Terminated => "terminated",
            Self::Other => "other",
        }
    }

    /// Maps a raw state string from an event bus onto a state.
    ///
    /// Unknown strings are not an error: they map to [`ResourceState::Other`].
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "running" => Self::Running,
            "terminated" => Self::Terminated,
            _ => Self::Other,
        }
    }
}

impl std::fmt::Display for ResourceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resource state transition delivered by the event bus.
///
/// Events are immutable once parsed and may be delivered more than once or
/// out of order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    /// The producing service domain (e.g. `aws.ec2`).
    pub source_domain: String,
    /// The event's detail type (e.g. `EC2 Instance State-change Notification`).
    pub detail_type: String,
    /// Identifier of the resource that changed state.
    pub resource_id: String,
    /// The state the resource moved into.
    pub state: ResourceState,
    /// When the transition happened, per the event bus.
    pub occurred_at: DateTime<Utc>,
}

/// Error returned when an event envelope lacks a required field or carries
/// a value of the wrong shape.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed lifecycle event: `{field}` {reason}")]
pub struct MalformedEvent {
    /// The offending envelope field.
    pub field: &'static str,
    /// What was wrong with it.
    pub reason: String,
}

impl MalformedEvent {
    fn missing(field: &'static str) -> Self {
        Self {
            field,
            reason: "is missing or not a string".to_string(),
        }
    }
}

fn required_str<'a>(value: &'a Value, field: &'static str) -> Result<&'a str, MalformedEvent> {
    match value.get(field).and_then(Value::as_str) {
        Some(s) if !s.trim().is_empty() => Ok(s),
        _ => Err(MalformedEvent::missing(field)),
    }
}

impl LifecycleEvent {
    /// Parses an event-bus envelope.
    ///
    /// The envelope shape is:
    ///
    /// ```json
    /// { "source": "aws.ec2",
    ///   "detail-type": "EC2 Instance State-change Notification",
    ///   "time": "2023-01-05T10:00:00Z",
    ///   "detail": { "instance-id": "i-0abc", "state": "running" } }
    /// ```
    ///
    /// `detail.resource-id` is accepted in place of `detail.instance-id`.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedEvent`] naming the first missing or invalid field.
    pub fn from_envelope(envelope: &Value) -> Result<Self, MalformedEvent> {
        let source_domain = required_str(envelope, "source")?;
        let detail_type = required_str(envelope, "detail-type")?;
        let time = required_str(envelope, "time")?;
        let occurred_at = DateTime::parse_from_rfc3339(time)
            .map_err(|e| MalformedEvent {
                field: "time",
                reason: format!("is not RFC 3339: {e}"),
            })?
            .with_timezone(&Utc);

        let detail = envelope
            .get("detail")
            .filter(|d| d.is_object())
            .ok_or_else(|| MalformedEvent {
                field: "detail",
                reason: "is missing or not an object".to_string(),
            })?;

        let resource_id = required_str(detail, "instance-id")
            .or_else(|_| required_str(detail, "resource-id"))
            .map_err(|_| MalformedEvent::missing("detail.instance-id"))?;
        let state = required_str(detail, "state")
            .map_err(|_| MalformedEvent::missing("detail.state"))?;

        Ok(Self {
            source_domain: source_domain.to_string(),
            detail_type: detail_type.to_string(),
            resource_id: resource_id.to_string(),
            state: ResourceState::from_label(state),
            occurred_at,
        })
    }
}

/// Declares which lifecycle events a rule selects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPattern {
    /// Required source domain.
    pub source_domain: String,
    /// Required detail type.
    pub detail_type: String,
    /// States that select the event.
    pub state_filter: BTreeSet<ResourceState>,
}

impl EventPattern {
    /// Builds a pattern from its parts.
    pub fn new(
        source_domain: impl Into<String>,
        detail_type: impl Into<String>,
        states: impl IntoIterator<Item = ResourceState>,
    ) -> Self {
        Self {
            source_domain: source_domain.into(),
            detail_type: detail_type.into(),
            state_filter: states.into_iter().collect(),
        }
    }

    /// Returns `true` when the source domain and detail type are equal and
    /// the event's state is in the filter.
    pub fn matches(&self, event: &LifecycleEvent) -> bool {
        self.source_domain == event.source_domain
            && self.detail_type == event.detail_type
            && self.state_filter.contains(&event.state)
    }
}
