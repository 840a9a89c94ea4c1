//! Lifecycle handlers that drive the subscription manager.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use lifewire_types::{EventPattern, LifecycleEvent, ResourceState};
use serde::{Deserialize, Serialize};

use crate::error::HandlerError;
use crate::manager::SubscriptionManager;
use crate::router::{EventRule, LifecycleHandler};

/// Source domain of the default rules.
pub const DEFAULT_SOURCE_DOMAIN: &str = "aws.ec2";
/// Detail type of the default rules.
pub const DEFAULT_DETAIL_TYPE: &str = "EC2 Instance State-change Notification";
/// Name of the default rule that subscribes on `running`.
pub const CREATE_RULE: &str = "create-notification";
/// Name of the default rule that unsubscribes on `terminated`.
pub const DELETE_RULE: &str = "delete-notification";

/// What a rule does to the subscription for the event's resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindingAction {
    /// Ensure the subscription exists.
    Subscribe,
    /// Ensure the subscription is gone.
    Unsubscribe,
}

impl std::str::FromStr for BindingAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "subscribe" => Ok(Self::Subscribe),
            "unsubscribe" => Ok(Self::Unsubscribe),
            _ => Err(format!("unknown rule action: {s}")),
        }
    }
}

/// Maps a resource to the location it writes to and the handler that
/// should be notified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingResolver {
    default_location: String,
    target_handler_ref: String,
    overrides: BTreeMap<String, String>,
}

impl BindingResolver {
    /// Every resource maps to `default_location`.
    pub fn new(default_location: impl Into<String>, target_handler_ref: impl Into<String>) -> Self {
        Self {
            default_location: default_location.into(),
            target_handler_ref: target_handler_ref.into(),
            overrides: BTreeMap::new(),
        }
    }

    /// Maps specific resources to their own locations.
    pub fn with_overrides(mut self, overrides: impl IntoIterator<Item = (String, String)>) -> Self {
        self.overrides.extend(overrides);
        self
    }

    /// The location `resource_id` writes to.
    pub fn location_for(&self, resource_id: &str) -> &str {
        self.overrides
            .get(resource_id)
            .map_or(self.default_location.as_str(), String::as_str)
    }

    /// The handler subscriptions point at.
    pub fn target_handler_ref(&self) -> &str {
        &self.target_handler_ref
    }
}

/// A [`LifecycleHandler`] that subscribes or unsubscribes the resource's
/// location.
pub struct SubscriptionBinding {
    manager: Arc<SubscriptionManager>,
    resolver: Arc<BindingResolver>,
    action: BindingAction,
}

impl SubscriptionBinding {
    /// Binds `action` to `manager`.
    pub fn new(
        manager: Arc<SubscriptionManager>,
        resolver: Arc<BindingResolver>,
        action: BindingAction,
    ) -> Self {
        Self {
            manager,
            resolver,
            action,
        }
    }
}

#[async_trait]
impl LifecycleHandler for SubscriptionBinding {
    async fn handle(&self, event: &LifecycleEvent) -> Result<String, HandlerError> {
        let location = self.resolver.location_for(&event.resource_id);
        let target = self.resolver.target_handler_ref();
        let outcome = match self.action {
            BindingAction::Subscribe => {
                self.manager
                    .on_resource_running(&event.resource_id, location, target)
                    .await?
            }
            BindingAction::Unsubscribe => {
                self.manager
                    .on_resource_terminated(&event.resource_id, location, target)
                    .await?
            }
        };
        Ok(format!("{outcome} {location}->{target}"))
    }
}

/// The two rules of the standard deployment: subscribe when a resource is
/// running, unsubscribe when it is terminated.
pub fn default_rules(
    manager: Arc<SubscriptionManager>,
    resolver: Arc<BindingResolver>,
) -> Vec<EventRule> {
    [
        (CREATE_RULE, ResourceState::Running, BindingAction::Subscribe),
        (DELETE_RULE, ResourceState::Terminated, BindingAction::Unsubscribe),
    ]
    .into_iter()
    .map(|(name, state, action)| {
        EventRule::new(
            name,
            EventPattern::new(DEFAULT_SOURCE_DOMAIN, DEFAULT_DETAIL_TYPE, [state]),
            Arc::new(SubscriptionBinding::new(
                manager.clone(),
                resolver.clone(),
                action,
            )),
        )
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_take_precedence() {
        let resolver = BindingResolver::new("logs", "receiver")
            .with_overrides([("i-7".to_string(), "logs-7".to_string())]);
        assert_eq!(resolver.location_for("i-1"), "logs");
        assert_eq!(resolver.location_for("i-7"), "logs-7");
        assert_eq!(resolver.target_handler_ref(), "receiver");
    }

    #[test]
    fn actions_parse() {
        assert_eq!("subscribe".parse::<BindingAction>(), Ok(BindingAction::Subscribe));
        assert_eq!("unsubscribe".parse::<BindingAction>(), Ok(BindingAction::Unsubscribe));
        assert!("create".parse::<BindingAction>().is_err());
    }
}
