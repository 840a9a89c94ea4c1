//! Wires configuration into running components.

use std::sync::Arc;
use std::time::Duration;

use lifewire_db::DbPool;
use lifewire_filter::{filter_from_ref, FilteringAccessLayer};
use lifewire_orchestrator::{
    BindingResolver, DownstreamSink, EventRouter, EventRule, HandlerRegistry, LogSink,
    NotificationPump, Receiver, SqliteReporter, SubscriptionBinding, SubscriptionManager,
    WebhookSink,
};
use lifewire_store::{ObjectStore, SqliteGrants, SqliteStore};
use lifewire_types::EventPattern;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::{Config, ConfigError};
use crate::AppState;

/// Builds every component on top of a migrated `pool` and starts the
/// notification pump.
///
/// Lifecycle handler and notification tasks are spawned on `tracker`;
/// cancelling `cancel` stops the pump from taking new notifications.
///
/// # Errors
///
/// [`ConfigError::Invalid`] if the filter settings cannot be turned into a
/// content filter or the webhook client cannot be built.
pub fn build_state(
    config: &Config,
    pool: DbPool,
    tracker: TaskTracker,
    cancel: CancellationToken,
) -> Result<AppState, ConfigError> {
    let store = Arc::new(SqliteStore::new(pool.clone()));
    let reporter = Arc::new(SqliteReporter::new(pool.clone()));
    let retry = config.retry_policy();

    let filter = filter_from_ref(&config.filter.transform_ref, config.field_match_filter()?)
        .map_err(|e| ConfigError::Invalid(format!("filter.transform_ref: {e}")))?;
    let layer = Arc::new(FilteringAccessLayer::new(
        store.clone(),
        filter,
        config.filter_configuration(),
        config.filter.permitted_accounts.iter().cloned(),
        Duration::from_millis(config.filter.read_timeout_ms),
    )
    .serving(config.served_locations()));

    let sink: Arc<dyn DownstreamSink> = match &config.sink.webhook_url {
        Some(url) => {
            tracing::info!(url = %url, "delivering to webhook");
            let sink = WebhookSink::new(url.as_str(), Duration::from_millis(config.sink.timeout_ms))
                .map_err(|e| ConfigError::Invalid(format!("sink.webhook_url: {e}")))?;
            Arc::new(sink)
        }
        None => {
            tracing::info!("no webhook configured; deliveries are logged");
            Arc::new(LogSink)
        }
    };
    let receiver = Receiver::new(
        layer.clone(),
        sink,
        reporter.clone(),
        retry.clone(),
        config.receiver.caller_account.as_str(),
    );
    let registry = Arc::new(
        HandlerRegistry::new().with(
            config.subscription.target_handler_ref.as_str(),
            Arc::new(receiver),
        ),
    );

    let manager = Arc::new(SubscriptionManager::new(
        store.clone(),
        Arc::new(SqliteGrants::new(pool.clone())),
        registry.clone(),
        reporter.clone(),
        retry,
        config.subscription.source_account.as_str(),
    ));
    let resolver = Arc::new(
        BindingResolver::new(
            config.subscription.storage_location.as_str(),
            config.subscription.target_handler_ref.as_str(),
        )
        .with_overrides(config.subscription.location_overrides.clone()),
    );

    let mut router = EventRouter::new(reporter.clone(), tracker.clone());
    for rule in &config.rules {
        router.add_rule(EventRule::new(
            rule.name.as_str(),
            EventPattern::new(
                rule.source.as_str(),
                rule.detail_type.as_str(),
                rule.states.iter().copied(),
            ),
            Arc::new(SubscriptionBinding::new(
                manager.clone(),
                resolver.clone(),
                rule.action,
            )),
        ));
        tracing::debug!(rule = %rule.name, action = ?rule.action, "lifecycle rule loaded");
    }

    NotificationPump::new(registry, reporter, tracker, cancel).spawn(store.notifications());

    Ok(AppState {
        pool,
        store,
        layer,
        router: Arc::new(router),
    })
}
