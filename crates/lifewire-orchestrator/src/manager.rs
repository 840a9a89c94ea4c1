//! Idempotent create/delete of notification subscriptions.
//!
//! The store is the source of truth and the arbiter of same-key races.
//! Nothing here takes an in-process lock, so several orchestrator replicas
//! can act on the same location concurrently: duplicate registrations
//! surface as `AlreadyExists` and are treated as success.
//!
//! Every `Running` event is handled on its own merits, including a stale
//! re-delivery for a resource that has since terminated.
//!
//! Invoke permissions follow the subscription: granted right before
//! registration and revoked right after unregistration, each pair inside one
//! retry unit.

use std::sync::Arc;

use lifewire_observe::ReportPayload;
use lifewire_store::{InvokeGrant, ObjectStore, PermissionGrantor, StoreError};
use lifewire_types::{NotificationSubscription, SubscriptionKey, TriggerCondition};
use serde::Serialize;

use crate::error::SubscriptionError;
use crate::registry::HandlerRegistry;
use crate::report::Reporter;
use crate::retry::{with_retry, RetryError, RetryPolicy, Retryable};

/// What a manager call changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionOutcome {
    /// A new subscription was registered.
    Created,
    /// The subscription was already Active.
    AlreadyActive,
    /// The subscription was unregistered.
    Removed,
    /// There was no subscription to remove.
    AlreadyAbsent,
}

impl SubscriptionOutcome {
    /// Returns the snake_case label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::AlreadyActive => "already_active",
            Self::Removed => "removed",
            Self::AlreadyAbsent => "already_absent",
        }
    }
}

impl std::fmt::Display for SubscriptionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of the grant-then-register or unregister-then-revoke unit.
#[derive(Debug, thiserror::Error)]
enum StepError {
    #[error(transparent)]
    Grant(lifewire_store::GrantError),
    #[error(transparent)]
    Store(StoreError),
}

impl Retryable for StepError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Grant(e) => e.is_transient(),
            Self::Store(e) => e.is_transient(),
        }
    }
}

/// Owns the subscription lifecycle for one trigger condition.
pub struct SubscriptionManager {
    store: Arc<dyn ObjectStore>,
    grants: Arc<dyn PermissionGrantor>,
    handlers: Arc<HandlerRegistry>,
    reporter: Arc<dyn Reporter>,
    retry: RetryPolicy,
    source_account: String,
    trigger: TriggerCondition,
}

impl SubscriptionManager {
    /// Creates a manager for `ObjectCreated` subscriptions.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        grants: Arc<dyn PermissionGrantor>,
        handlers: Arc<HandlerRegistry>,
        reporter: Arc<dyn Reporter>,
        retry: RetryPolicy,
        source_account: impl Into<String>,
    ) -> Self {
        Self {
            store,
            grants,
            handlers,
            reporter,
            retry,
            source_account: source_account.into(),
            trigger: TriggerCondition::ObjectCreated,
        }
    }

    /// Manages subscriptions for `trigger` instead.
    pub fn with_trigger(mut self, trigger: TriggerCondition) -> Self {
        self.trigger = trigger;
        self
    }

    fn key(&self, storage_location: &str, target_handler_ref: &str) -> SubscriptionKey {
        SubscriptionKey::new(storage_location, self.trigger, target_handler_ref)
    }

    /// Ensures exactly one Active subscription exists for
    /// `(storage_location, trigger, target_handler_ref)`.
    ///
    /// # Errors
    ///
    /// - [`SubscriptionError::UnresolvableHandler`] if the target is unknown.
    /// - [`SubscriptionError::Conflict`] if a different target holds the
    ///   location; the existing subscription is left untouched and the
    ///   conflict is reported.
    /// - [`SubscriptionError::Exhausted`] once transient failures outlive the
    ///   retry policy; also reported.
    pub async fn on_resource_running(
        &self,
        resource_id: &str,
        storage_location: &str,
        target_handler_ref: &str,
    ) -> Result<SubscriptionOutcome, SubscriptionError> {
        if !self.handlers.contains(target_handler_ref) {
            tracing::warn!(
                resource_id,
                handler = target_handler_ref,
                "target handler is not registered; not subscribing"
            );
            return Err(SubscriptionError::UnresolvableHandler(
                target_handler_ref.to_string(),
            ));
        }

        let key = self.key(storage_location, target_handler_ref);
        let existing = self.list(&key).await?;

        if existing.iter().any(|s| s.key() == key) {
            tracing::info!(resource_id, key = %key, "subscription already active");
            return Ok(SubscriptionOutcome::AlreadyActive);
        }
        if let Some(other) = existing
            .iter()
            .find(|s| s.trigger_condition == self.trigger)
        {
            return Err(self
                .conflict(&key, other.target_handler_ref.clone())
                .await);
        }

        let grant = InvokeGrant::for_store(
            target_handler_ref,
            storage_location,
            self.source_account.as_str(),
        );
        let subscription = NotificationSubscription::active(&key);
        let grant = &grant;
        let subscription = &subscription;
        let setup = with_retry(&self.retry, "grant_and_register", move || async move {
            let status = self
                .grants
                .grant_invoke(grant)
                .await
                .map_err(StepError::Grant)?;
            tracing::debug!(handler = %grant.target_handler_ref, ?status, "invoke permission ensured");
            match self.store.register_subscription(subscription).await {
                Ok(()) => Ok(SubscriptionOutcome::Created),
                Err(StoreError::AlreadyExists(_)) => Ok(SubscriptionOutcome::AlreadyActive),
                Err(e) => Err(StepError::Store(e)),
            }
        })
        .await;

        match setup {
            Ok(SubscriptionOutcome::Created) => {
                tracing::info!(resource_id, key = %key, "subscription created");
                self.reporter
                    .report(ReportPayload::SubscriptionActivated {
                        resource_id: resource_id.to_string(),
                        storage_location: key.storage_location.clone(),
                        trigger_condition: key.trigger_condition.as_str().to_string(),
                        target_handler_ref: key.target_handler_ref.clone(),
                    })
                    .await;
                Ok(SubscriptionOutcome::Created)
            }
            Ok(outcome) => {
                tracing::info!(resource_id, key = %key, "subscription registered concurrently");
                Ok(outcome)
            }
            Err(RetryError::Permanent(StepError::Store(StoreError::Conflict {
                existing_target,
                ..
            }))) => Err(self.conflict(&key, existing_target).await),
            Err(RetryError::Permanent(StepError::Store(e))) => Err(SubscriptionError::Store(e)),
            Err(RetryError::Permanent(StepError::Grant(e))) => Err(SubscriptionError::Grant(e)),
            Err(RetryError::Exhausted { attempts, last }) => {
                Err(self
                    .exhausted("grant_and_register", &key, attempts, last.to_string())
                    .await)
            }
        }
    }

    /// Ensures no subscription remains at
    /// `(storage_location, trigger, target_handler_ref)` and withdraws the
    /// target's invoke permission for the location.
    ///
    /// # Errors
    ///
    /// [`SubscriptionError::Exhausted`] once transient failures outlive the
    /// retry policy. A subscription that is already gone is success.
    pub async fn on_resource_terminated(
        &self,
        resource_id: &str,
        storage_location: &str,
        target_handler_ref: &str,
    ) -> Result<SubscriptionOutcome, SubscriptionError> {
        let key = self.key(storage_location, target_handler_ref);
        let existing = self.list(&key).await?;
        if !existing.iter().any(|s| s.key() == key && s.is_active()) {
            tracing::info!(resource_id, key = %key, "no subscription to remove");
            return Ok(SubscriptionOutcome::AlreadyAbsent);
        }

        let grant = InvokeGrant::for_store(
            target_handler_ref,
            storage_location,
            self.source_account.as_str(),
        );
        let grant = &grant;
        let key_ref = &key;
        let removed = with_retry(&self.retry, "unregister_and_revoke", move || async move {
            match self.store.unregister_subscription(key_ref).await {
                Ok(()) | Err(StoreError::NotFound(_)) => {}
                Err(e) => return Err(StepError::Store(e)),
            }
            let status = self
                .grants
                .revoke_invoke(grant)
                .await
                .map_err(StepError::Grant)?;
            tracing::debug!(handler = %grant.target_handler_ref, ?status, "invoke permission withdrawn");
            Ok(())
        })
        .await;

        match removed {
            Ok(()) => {
                tracing::info!(resource_id, key = %key, "subscription removed");
                self.reporter
                    .report(ReportPayload::SubscriptionRemoved {
                        resource_id: resource_id.to_string(),
                        storage_location: key.storage_location.clone(),
                        trigger_condition: key.trigger_condition.as_str().to_string(),
                        target_handler_ref: key.target_handler_ref.clone(),
                    })
                    .await;
                Ok(SubscriptionOutcome::Removed)
            }
            Err(RetryError::Permanent(StepError::Store(e))) => Err(SubscriptionError::Store(e)),
            Err(RetryError::Permanent(StepError::Grant(e))) => Err(SubscriptionError::Grant(e)),
            Err(RetryError::Exhausted { attempts, last }) => Err(self
                .exhausted("unregister_and_revoke", &key, attempts, last.to_string())
                .await),
        }
    }

    async fn list(
        &self,
        key: &SubscriptionKey,
    ) -> Result<Vec<NotificationSubscription>, SubscriptionError> {
        let location = key.storage_location.as_str();
        let listed = with_retry(&self.retry, "get_subscriptions", move || async move {
            self.store.get_subscriptions(location).await
        })
        .await;
        match listed {
            Ok(subs) => Ok(subs),
            Err(RetryError::Permanent(e)) => Err(SubscriptionError::Store(e)),
            Err(RetryError::Exhausted { attempts, last }) => Err(self
                .exhausted("get_subscriptions", key, attempts, last.to_string())
                .await),
        }
    }

    async fn conflict(&self, key: &SubscriptionKey, existing_target: String) -> SubscriptionError {
        tracing::warn!(
            key = %key,
            existing_target = %existing_target,
            "subscription conflict; leaving existing subscription in place"
        );
        self.reporter
            .report(ReportPayload::SubscriptionConflict {
                storage_location: key.storage_location.clone(),
                trigger_condition: key.trigger_condition.as_str().to_string(),
                existing_target: existing_target.clone(),
                requested_target: key.target_handler_ref.clone(),
            })
            .await;
        SubscriptionError::Conflict {
            key: key.to_string(),
            existing_target,
        }
    }

    async fn exhausted(
        &self,
        operation: &'static str,
        key: &SubscriptionKey,
        attempts: u32,
        last_error: String,
    ) -> SubscriptionError {
        self.reporter
            .report(ReportPayload::RetryExhausted {
                operation: operation.to_string(),
                subject: key.to_string(),
                attempts,
                last_error: last_error.clone(),
            })
            .await;
        SubscriptionError::Exhausted {
            operation,
            attempts,
            last_error,
        }
    }
}
