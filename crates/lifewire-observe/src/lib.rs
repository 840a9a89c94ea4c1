//! Operator report log for the Lifewire orchestrator.
//!
//! Conditions that need a human's attention (subscription conflicts,
//! exhausted retries, dropped events, failed deliveries) are appended to the
//! `operator_reports` table instead of being silently logged away. Routine
//! transitions (subscription activated or removed) are recorded too, so the
//! log reads as a complete audit trail per storage location.
//!
//! | Kind | Raised when |
//! |------|-------------|
//! | `SUBSCRIPTION_ACTIVATED` | the store confirmed a new subscription |
//! | `SUBSCRIPTION_REMOVED` | an Active subscription was unregistered |
//! | `SUBSCRIPTION_CONFLICT` | a different target already holds the location |
//! | `RETRY_EXHAUSTED` | a transient store or grant failure outlived its retries |
//! | `DELIVERY_EXHAUSTED` | the receiver gave up forwarding an object |
//! | `MALFORMED_EVENT` | a lifecycle envelope was dropped |
//! | `HANDLER_FAILED` | a routed handler returned an error or panicked |
//! | `NOTIFICATIONS_LOST` | object notifications overflowed or named no handler |
//!
//! ```rust,ignore
//! use lifewire_observe::{emit_report, ReportPayload};
//!
//! let report = emit_report(
//!     &conn,
//!     &ReportPayload::SubscriptionConflict {
//!         storage_location: "logs-bucket".into(),
//!         trigger_condition: "OBJECT_CREATED".into(),
//!         existing_target: "receiver-a".into(),
//!         requested_target: "receiver-b".into(),
//!     },
//! )?;
//! ```

mod error;
mod report;
mod store;

pub use error::ObserveError;
pub use report::{OperatorReport, ParseReportKindError, ReportKind, ReportPayload};
pub use store::{emit_report, query_reports, ReportFilter, MAX_QUERY_LIMIT};

#[cfg(test)]
mod tests;
