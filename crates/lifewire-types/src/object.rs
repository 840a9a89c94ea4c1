//! Object references, metadata and notifications.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::subscription::TriggerCondition;

/// Address of an object in the store. Passed around read-only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectReference {
    /// The bucket-like location holding the object.
    pub storage_location: String,
    /// The object key within the location.
    pub key: String,
    /// Optional version the caller expects; informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_hint: Option<String>,
}

impl ObjectReference {
    /// Builds a reference without a version hint.
    pub fn new(storage_location: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            storage_location: storage_location.into(),
            key: key.into(),
            version_hint: None,
        }
    }
}

impl std::fmt::Display for ObjectReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.storage_location, self.key)
    }
}

/// Store-side metadata for an object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// The object key.
    pub key: String,
    /// Stored size in bytes.
    pub size: u64,
    /// SHA-256 hex digest of the stored bytes.
    pub etag: String,
    /// When the object was last written.
    pub last_modified: DateTime<Utc>,
}

/// A notification raised by the store for one Active subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectNotification {
    /// Unique id of this delivery.
    pub event_id: Uuid,
    /// The operation that raised the notification.
    pub trigger_condition: TriggerCondition,
    /// The object the operation touched.
    pub object: ObjectReference,
    /// The handler the subscription points at.
    pub target_handler_ref: String,
    /// Object size at the time of the operation (0 for removals).
    pub size: u64,
    /// Object digest at the time of the operation (empty for removals).
    pub etag: String,
    /// When the store performed the operation.
    pub occurred_at: DateTime<Utc>,
}
