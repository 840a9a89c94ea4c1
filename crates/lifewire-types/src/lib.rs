//! Shared types for the Lifewire orchestrator.
//!
//! Every other crate in the workspace speaks in these types: lifecycle
//! events and the patterns that select them, notification subscriptions and
//! their keys, object references and notifications, and the static
//! configuration of the filtering access layer.
//!
//! No crate in the workspace depends on anything *except* `lifewire-types`
//! for cross-cutting type definitions, which keeps the dependency graph
//! acyclic.

mod filter;
mod lifecycle;
mod object;
mod subscription;

pub use filter::{AccessFeature, FilterConfiguration, OperationKind};
pub use lifecycle::{EventPattern, LifecycleEvent, MalformedEvent, ResourceState};
pub use object::{ObjectMeta, ObjectNotification, ObjectReference};
pub use subscription::{
    NotificationSubscription, ParseLabelError, SubscriptionKey, SubscriptionState,
    TriggerCondition,
};
