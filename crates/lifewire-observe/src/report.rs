//! Report kinds, payloads and the stored record type.

use serde::{Deserialize, Serialize};

/// Category of an operator report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportKind {
    /// The store confirmed a new subscription.
    SubscriptionActivated,
    /// An Active subscription was unregistered.
    SubscriptionRemoved,
    /// Another target already holds the requested location and trigger.
    SubscriptionConflict,
    /// A transient failure outlived the retry policy.
    RetryExhausted,
    /// The receiver could not forward an object downstream.
    DeliveryExhausted,
    /// A lifecycle envelope was dropped as malformed.
    MalformedEvent,
    /// A routed lifecycle handler failed.
    HandlerFailed,
    /// Object notifications were dropped before reaching a handler.
    NotificationsLost,
}

impl ReportKind {
    /// Returns the canonical string label, as stored in the `kind` column.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SubscriptionActivated => "SUBSCRIPTION_ACTIVATED",
            Self::SubscriptionRemoved => "SUBSCRIPTION_REMOVED",
            Self::SubscriptionConflict => "SUBSCRIPTION_CONFLICT",
            Self::RetryExhausted => "RETRY_EXHAUSTED",
            Self::DeliveryExhausted => "DELIVERY_EXHAUSTED",
            Self::MalformedEvent => "MALFORMED_EVENT",
            Self::HandlerFailed => "HANDLER_FAILED",
            Self::NotificationsLost => "NOTIFICATIONS_LOST",
        }
    }

    /// Returns `true` for kinds that call for operator action.
    pub fn needs_attention(self) -> bool {
        !matches!(self, Self::SubscriptionActivated | Self::SubscriptionRemoved)
    }
}

impl std::fmt::Display for ReportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReportKind {
    type Err = ParseReportKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUBSCRIPTION_ACTIVATED" => Ok(Self::SubscriptionActivated),
            "SUBSCRIPTION_REMOVED" => Ok(Self::SubscriptionRemoved),
            "SUBSCRIPTION_CONFLICT" => Ok(Self::SubscriptionConflict),
            "RETRY_EXHAUSTED" => Ok(Self::RetryExhausted),
            "DELIVERY_EXHAUSTED" => Ok(Self::DeliveryExhausted),
            "MALFORMED_EVENT" => Ok(Self::MalformedEvent),
            "HANDLER_FAILED" => Ok(Self::HandlerFailed),
            "NOTIFICATIONS_LOST" => Ok(Self::NotificationsLost),
            _ => Err(ParseReportKindError(s.to_string())),
        }
    }
}

/// Error returned when parsing an unknown report kind string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown report kind: {0}")]
pub struct ParseReportKindError(pub String);

/// Structured payloads, one variant per [`ReportKind`].
///
/// Serialised to JSON into the `payload_json` column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportPayload {
    /// A subscription became Active in the store.
    SubscriptionActivated {
        /// The resource whose Running event caused the change.
        resource_id: String,
        /// The watched location.
        storage_location: String,
        /// The trigger condition label.
        trigger_condition: String,
        /// The handler the subscription points at.
        target_handler_ref: String,
    },

    /// A subscription was removed from the store.
    SubscriptionRemoved {
        /// The resource whose Terminated event caused the change.
        resource_id: String,
        /// The watched location.
        storage_location: String,
        /// The trigger condition label.
        trigger_condition: String,
        /// The handler the subscription pointed at.
        target_handler_ref: String,
    },

    /// A subscription request collided with another target's subscription.
    SubscriptionConflict {
        /// The contested location.
        storage_location: String,
        /// The trigger condition label.
        trigger_condition: String,
        /// The handler currently holding the subscription.
        existing_target: String,
        /// The handler that asked for it.
        requested_target: String,
    },

    /// A retried operation gave up.
    RetryExhausted {
        /// What was being attempted (e.g. `register_subscription`).
        operation: String,
        /// The key or location the operation targeted.
        subject: String,
        /// Attempts made before giving up.
        attempts: u32,
        /// The last error observed.
        last_error: String,
    },

    /// The receiver could not deliver an object downstream.
    DeliveryExhausted {
        /// The object's location.
        storage_location: String,
        /// The object's key.
        key: String,
        /// Attempts made before giving up.
        attempts: u32,
        /// The last error observed.
        last_error: String,
    },

    /// A lifecycle envelope was dropped.
    MalformedEvent {
        /// The offending envelope field.
        field: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A routed lifecycle handler returned an error or panicked.
    HandlerFailed {
        /// The rule whose handler failed.
        rule: String,
        /// The resource the event described.
        resource_id: String,
        /// The handler's error.
        error: String,
    },

    /// Object notifications never reached a handler.
    NotificationsLost {
        /// The location the notifications came from, when known.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        storage_location: Option<String>,
        /// The object key, when a single notification was lost.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
        /// How many notifications were lost.
        count: u64,
        /// Why they were lost.
        reason: String,
    },
}

impl ReportPayload {
    /// Returns the kind this payload is stored under.
    pub fn kind(&self) -> ReportKind {
        match self {
            Self::SubscriptionActivated { .. } => ReportKind::SubscriptionActivated,
            Self::SubscriptionRemoved { .. } => ReportKind::SubscriptionRemoved,
            Self::SubscriptionConflict { .. } => ReportKind::SubscriptionConflict,
            Self::RetryExhausted { .. } => ReportKind::RetryExhausted,
            Self::DeliveryExhausted { .. } => ReportKind::DeliveryExhausted,
            Self::MalformedEvent { .. } => ReportKind::MalformedEvent,
            Self::HandlerFailed { .. } => ReportKind::HandlerFailed,
            Self::NotificationsLost { .. } => ReportKind::NotificationsLost,
        }
    }

    /// The natural subject of this payload, used for the `subject` column.
    pub fn subject(&self) -> &str {
        match self {
            Self::SubscriptionActivated {
                storage_location, ..
            }
            | Self::SubscriptionRemoved {
                storage_location, ..
            }
            | Self::SubscriptionConflict {
                storage_location, ..
            }
            | Self::DeliveryExhausted {
                storage_location, ..
            } => storage_location,
            Self::RetryExhausted { subject, .. } => subject,
            Self::MalformedEvent { field, .. } => field,
            Self::HandlerFailed { rule, .. } => rule,
            Self::NotificationsLost {
                storage_location, ..
            } => storage_location.as_deref().unwrap_or("notifications"),
        }
    }
}

/// A single row from the `operator_reports` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorReport {
    /// Auto-incremented row ID.
    pub id: i64,
    /// Monotonically increasing sequence number.
    pub seq: i64,
    /// The report kind label.
    pub kind: String,
    /// The location, rule or field the report is about.
    pub subject: String,
    /// The structured payload as a JSON string.
    pub payload_json: String,
    /// ISO 8601 timestamp of when the report was written.
    pub reported_at: String,
}

impl OperatorReport {
    /// Decodes the stored payload.
    ///
    /// # Errors
    ///
    /// Returns the JSON error if the stored payload is not a [`ReportPayload`].
    pub fn payload(&self) -> Result<ReportPayload, serde_json::Error> {
        serde_json::from_str(&self.payload_json)
    }
}
