//! Routes lifecycle events to the handlers whose patterns select them.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use lifewire_observe::ReportPayload;
use lifewire_types::{EventPattern, LifecycleEvent, MalformedEvent};
use serde::Serialize;
use serde_json::Value;
use tokio_util::task::TaskTracker;

use crate::error::HandlerError;
use crate::report::Reporter;

/// A handler bound to a routing rule.
#[async_trait]
pub trait LifecycleHandler: Send + Sync {
    /// Handles one matched event, returning a short summary of what it did.
    async fn handle(&self, event: &LifecycleEvent) -> Result<String, HandlerError>;
}

/// A named pattern and the handler it invokes.
#[derive(Clone)]
pub struct EventRule {
    /// Rule name, used in logs and reports.
    pub name: String,
    /// Which events the rule selects.
    pub pattern: EventPattern,
    /// What runs when it does.
    pub handler: Arc<dyn LifecycleHandler>,
}

impl EventRule {
    /// Builds a rule.
    pub fn new(
        name: impl Into<String>,
        pattern: EventPattern,
        handler: Arc<dyn LifecycleHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            pattern,
            handler,
        }
    }
}

impl std::fmt::Debug for EventRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRule")
            .field("name", &self.name)
            .field("pattern", &self.pattern)
            .finish_non_exhaustive()
    }
}

/// How one handler invocation ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// The handler returned successfully.
    Completed {
        /// The handler's summary.
        summary: String,
    },
    /// The handler returned an error.
    Failed {
        /// The error message.
        error: String,
    },
    /// The handler panicked.
    Panicked,
}

/// Result of invoking one matched rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchResult {
    /// The rule that matched.
    pub rule: String,
    /// What happened.
    #[serde(flatten)]
    pub outcome: DispatchOutcome,
}

impl DispatchResult {
    /// Returns `true` if the handler completed.
    pub fn is_completed(&self) -> bool {
        matches!(self.outcome, DispatchOutcome::Completed { .. })
    }
}

/// Matches events against rules and runs every matching handler as its own
/// task.
pub struct EventRouter {
    rules: Vec<EventRule>,
    reporter: Arc<dyn Reporter>,
    tracker: TaskTracker,
}

impl EventRouter {
    /// Creates a router with no rules. Handler tasks are spawned on
    /// `tracker` so shutdown can wait for them.
    pub fn new(reporter: Arc<dyn Reporter>, tracker: TaskTracker) -> Self {
        Self {
            rules: Vec::new(),
            reporter,
            tracker,
        }
    }

    /// Appends a rule.
    pub fn add_rule(&mut self, rule: EventRule) {
        self.rules.push(rule);
    }

    /// Builder-style [`EventRouter::add_rule`].
    pub fn with_rule(mut self, rule: EventRule) -> Self {
        self.add_rule(rule);
        self
    }

    /// The configured rules, in insertion order.
    pub fn rules(&self) -> &[EventRule] {
        &self.rules
    }

    /// Invokes the handler of every rule whose pattern matches `event`.
    ///
    /// Handlers run concurrently and independently: an error or panic in
    /// one is recorded in its result (and reported) without affecting the
    /// others. Results are in rule order.
    pub async fn dispatch(&self, event: &LifecycleEvent) -> Vec<DispatchResult> {
        let matched: Vec<&EventRule> = self
            .rules
            .iter()
            .filter(|rule| rule.pattern.matches(event))
            .collect();

        if matched.is_empty() {
            tracing::info!(
                source = %event.source_domain,
                detail_type = %event.detail_type,
                resource_id = %event.resource_id,
                state = %event.state,
                "no rule matched lifecycle event"
            );
            return Vec::new();
        }

        let handles = matched.iter().map(|rule| {
            let handler = rule.handler.clone();
            let event = event.clone();
            self.tracker
                .spawn(async move { handler.handle(&event).await })
        });
        let joined = join_all(handles).await;

        let mut results = Vec::with_capacity(matched.len());
        for (rule, joined) in matched.into_iter().zip(joined) {
            let outcome = match joined {
                Ok(Ok(summary)) => {
                    tracing::info!(
                        rule = %rule.name,
                        resource_id = %event.resource_id,
                        summary = %summary,
                        "lifecycle handler completed"
                    );
                    DispatchOutcome::Completed { summary }
                }
                Ok(Err(e)) => {
                    let error = e.to_string();
                    tracing::warn!(
                        rule = %rule.name,
                        resource_id = %event.resource_id,
                        error = %error,
                        "lifecycle handler failed"
                    );
                    self.report_failure(rule, event, error.clone()).await;
                    DispatchOutcome::Failed { error }
                }
                Err(join_err) => {
                    tracing::error!(
                        rule = %rule.name,
                        resource_id = %event.resource_id,
                        panicked = join_err.is_panic(),
                        "lifecycle handler task did not complete"
                    );
                    self.report_failure(rule, event, join_err.to_string()).await;
                    DispatchOutcome::Panicked
                }
            };
            results.push(DispatchResult {
                rule: rule.name.clone(),
                outcome,
            });
        }
        results
    }

    /// Parses an event-bus envelope and dispatches it.
    ///
    /// # Errors
    ///
    /// A malformed envelope is reported as `MALFORMED_EVENT`, dispatched to
    /// no handler, and returned as [`MalformedEvent`].
    pub async fn dispatch_envelope(
        &self,
        envelope: &Value,
    ) -> Result<Vec<DispatchResult>, MalformedEvent> {
        match LifecycleEvent::from_envelope(envelope) {
            Ok(event) => Ok(self.dispatch(&event).await),
            Err(malformed) => {
                tracing::warn!(
                    field = malformed.field,
                    reason = %malformed.reason,
                    "dropping malformed lifecycle event"
                );
                self.reporter
                    .report(ReportPayload::MalformedEvent {
                        field: malformed.field.to_string(),
                        reason: malformed.reason.clone(),
                    })
                    .await;
                Err(malformed)
            }
        }
    }

    async fn report_failure(&self, rule: &EventRule, event: &LifecycleEvent, error: String) {
        self.reporter
            .report(ReportPayload::HandlerFailed {
                rule: rule.name.clone(),
                resource_id: event.resource_id.clone(),
                error,
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use lifewire_observe::ReportKind;
    use lifewire_types::ResourceState;
    use serde_json::json;

    use super::*;
    use crate::report::MemoryReporter;

    const SOURCE: &str = "aws.ec2";
    const DETAIL: &str = "EC2 Instance State-change Notification";

    #[derive(Default)]
    struct Counting(AtomicU32);

    #[async_trait]
    impl LifecycleHandler for Counting {
        async fn handle(&self, event: &LifecycleEvent) -> Result<String, HandlerError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(format!("saw {}", event.resource_id))
        }
    }

    struct Failing;

    #[async_trait]
    impl LifecycleHandler for Failing {
        async fn handle(&self, _: &LifecycleEvent) -> Result<String, HandlerError> {
            Err(HandlerError::Other("store offline".to_string()))
        }
    }

    struct Panicking;

    #[async_trait]
    impl LifecycleHandler for Panicking {
        async fn handle(&self, _: &LifecycleEvent) -> Result<String, HandlerError> {
            panic!("handler bug");
        }
    }

    fn event(state: ResourceState) -> LifecycleEvent {
        LifecycleEvent {
            source_domain: SOURCE.to_string(),
            detail_type: DETAIL.to_string(),
            resource_id: "i-1".to_string(),
            state,
            occurred_at: chrono::Utc::now(),
        }
    }

    fn rule(name: &str, states: &[ResourceState], handler: Arc<dyn LifecycleHandler>) -> EventRule {
        EventRule::new(
            name,
            EventPattern::new(SOURCE, DETAIL, states.iter().copied()),
            handler,
        )
    }

    #[tokio::test]
    async fn only_matching_rules_run() {
        let running = Arc::new(Counting::default());
        let terminated = Arc::new(Counting::default());
        let router = EventRouter::new(Arc::new(MemoryReporter::new()), TaskTracker::new())
            .with_rule(rule("create", &[ResourceState::Running], running.clone()))
            .with_rule(rule("delete", &[ResourceState::Terminated], terminated.clone()));

        let results = router.dispatch(&event(ResourceState::Running)).await;
        assert_eq!(
            results,
            vec![DispatchResult {
                rule: "create".to_string(),
                outcome: DispatchOutcome::Completed {
                    summary: "saw i-1".to_string()
                },
            }]
        );
        assert_eq!(running.0.load(Ordering::SeqCst), 1);
        assert_eq!(terminated.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn other_state_dispatches_nothing() {
        let handler = Arc::new(Counting::default());
        let router = EventRouter::new(Arc::new(MemoryReporter::new()), TaskTracker::new())
            .with_rule(rule(
                "both",
                &[ResourceState::Running, ResourceState::Terminated],
                handler.clone(),
            ));
        assert!(router.dispatch(&event(ResourceState::Other)).await.is_empty());
        assert_eq!(handler.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failures_and_panics_do_not_block_other_handlers() {
        let reporter = Arc::new(MemoryReporter::new());
        let healthy = Arc::new(Counting::default());
        let router = EventRouter::new(reporter.clone(), TaskTracker::new())
            .with_rule(rule("panics", &[ResourceState::Running], Arc::new(Panicking)))
            .with_rule(rule("fails", &[ResourceState::Running], Arc::new(Failing)))
            .with_rule(rule("healthy", &[ResourceState::Running], healthy.clone()));

        let results = router.dispatch(&event(ResourceState::Running)).await;
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].outcome, DispatchOutcome::Panicked);
        assert!(matches!(results[1].outcome, DispatchOutcome::Failed { .. }));
        assert!(results[2].is_completed());
        assert_eq!(healthy.0.load(Ordering::SeqCst), 1);

        let failures = reporter.of_kind(ReportKind::HandlerFailed).await;
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].subject(), "panics");
        assert_eq!(failures[1].subject(), "fails");
    }

    #[tokio::test]
    async fn malformed_envelope_is_reported_and_dropped() {
        let reporter = Arc::new(MemoryReporter::new());
        let handler = Arc::new(Counting::default());
        let router = EventRouter::new(reporter.clone(), TaskTracker::new())
            .with_rule(rule("create", &[ResourceState::Running], handler.clone()));

        let err = router
            .dispatch_envelope(&json!({ "source": SOURCE, "detail-type": DETAIL }))
            .await
            .unwrap_err();
        assert_eq!(err.field, "time");
        assert_eq!(handler.0.load(Ordering::SeqCst), 0);
        assert_eq!(reporter.of_kind(ReportKind::MalformedEvent).await.len(), 1);
    }

    #[tokio::test]
    async fn envelope_is_parsed_then_dispatched() {
        let handler = Arc::new(Counting::default());
        let router = EventRouter::new(Arc::new(MemoryReporter::new()), TaskTracker::new())
            .with_rule(rule("create", &[ResourceState::Running], handler.clone()));
        let results = router
            .dispatch_envelope(&json!({
                "source": SOURCE,
                "detail-type": DETAIL,
                "time": "2023-01-05T10:00:00Z",
                "detail": { "instance-id": "i-1", "state": "running" }
            }))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].is_completed());
    }

    #[test]
    fn dispatch_results_serialize_flat() {
        let result = DispatchResult {
            rule: "create".to_string(),
            outcome: DispatchOutcome::Failed {
                error: "boom".to_string(),
            },
        };
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({ "rule": "create", "status": "failed", "error": "boom" })
        );
    }
}
