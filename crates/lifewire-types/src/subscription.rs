//! Notification subscriptions linking a storage location to a handler.

use serde::{Deserialize, Serialize};

/// The object operation that fires a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TriggerCondition {
    /// An object was written.
    #[serde(rename = "OBJECT_CREATED")]
    ObjectCreated,
    /// An object was deleted.
    #[serde(rename = "OBJECT_REMOVED")]
    ObjectRemoved,
}

impl TriggerCondition {
    /// Returns the canonical string label, as stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ObjectCreated => "OBJECT_CREATED",
            Self::ObjectRemoved => "OBJECT_REMOVED",
        }
    }
}

impl std::fmt::Display for TriggerCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TriggerCondition {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OBJECT_CREATED" => Ok(Self::ObjectCreated),
            "OBJECT_REMOVED" => Ok(Self::ObjectRemoved),
            _ => Err(ParseLabelError {
                kind: "trigger condition",
                value: s.to_string(),
            }),
        }
    }
}

/// Error returned when parsing an unknown label string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseLabelError {
    /// What was being parsed.
    pub kind: &'static str,
    /// The rejected input.
    pub value: String,
}

/// Whether a subscription is currently in force.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriptionState {
    /// No such subscription exists in the store.
    Absent,
    /// The store has confirmed the subscription.
    Active,
}

/// Identity of a subscription: at most one Active subscription per key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubscriptionKey {
    /// The bucket-like location being watched.
    pub storage_location: String,
    /// Which object operation fires the subscription.
    pub trigger_condition: TriggerCondition,
    /// Reference of the handler invoked on each notification.
    pub target_handler_ref: String,
}

impl SubscriptionKey {
    /// Builds a key from its parts.
    pub fn new(
        storage_location: impl Into<String>,
        trigger_condition: TriggerCondition,
        target_handler_ref: impl Into<String>,
    ) -> Self {
        Self {
            storage_location: storage_location.into(),
            trigger_condition,
            target_handler_ref: target_handler_ref.into(),
        }
    }
}

impl std::fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}->{}",
            self.storage_location, self.trigger_condition, self.target_handler_ref
        )
    }
}

/// A standing registration causing the store to notify a handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationSubscription {
    /// The bucket-like location being watched.
    pub storage_location: String,
    /// Which object operation fires the subscription.
    pub trigger_condition: TriggerCondition,
    /// Reference of the handler invoked on each notification.
    pub target_handler_ref: String,
    /// Whether the store has the subscription in force.
    pub state: SubscriptionState,
}

impl NotificationSubscription {
    /// Builds an Active subscription for `key`.
    pub fn active(key: &SubscriptionKey) -> Self {
        Self {
            storage_location: key.storage_location.clone(),
            trigger_condition: key.trigger_condition,
            target_handler_ref: key.target_handler_ref.clone(),
            state: SubscriptionState::Active,
        }
    }

    /// Returns this subscription's key.
    pub fn key(&self) -> SubscriptionKey {
        SubscriptionKey {
            storage_location: self.storage_location.clone(),
            trigger_condition: self.trigger_condition,
            target_handler_ref: self.target_handler_ref.clone(),
        }
    }

    /// Returns `true` if the store reports this subscription as in force.
    pub fn is_active(&self) -> bool {
        self.state == SubscriptionState::Active
    }
}
