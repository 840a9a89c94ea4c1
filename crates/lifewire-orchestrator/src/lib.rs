//! Orchestration for Lifewire.
//!
//! Lifecycle events from an event bus flow through the [`EventRouter`] to
//! [`SubscriptionBinding`] handlers, which ask the [`SubscriptionManager`]
//! to create or remove a notification subscription on the resource's
//! storage location. Once subscribed, every object written there raises a
//! notification that the [`NotificationPump`] hands to the target handler,
//! normally a [`Receiver`] that reads the object through the filtering
//! access layer and forwards the filtered content to a [`DownstreamSink`].
//!
//! Transient failures are retried under a [`RetryPolicy`]; anything an
//! operator must look at goes to a [`Reporter`].

mod binding;
mod delivery;
mod error;
mod manager;
mod receiver;
mod registry;
mod report;
mod retry;
mod router;
mod sink;

pub use binding::{
    default_rules, BindingAction, BindingResolver, SubscriptionBinding, CREATE_RULE,
    DEFAULT_DETAIL_TYPE, DEFAULT_SOURCE_DOMAIN, DELETE_RULE,
};
pub use delivery::NotificationPump;
pub use error::{HandlerError, ReceiverError, SinkError, SubscriptionError};
pub use manager::{SubscriptionManager, SubscriptionOutcome};
pub use receiver::Receiver;
pub use registry::{HandlerRegistry, ObjectEventHandler};
pub use report::{MemoryReporter, Reporter, SqliteReporter};
pub use retry::{with_retry, RetryError, RetryPolicy, Retryable};
pub use router::{DispatchOutcome, DispatchResult, EventRouter, EventRule, LifecycleHandler};
pub use sink::{Delivery, DownstreamSink, LogSink, WebhookSink};
