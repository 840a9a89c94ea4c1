//! Unit tests for the operator report log.

use rusqlite::Connection;

use crate::report::{ReportKind, ReportPayload};
use crate::store::{emit_report, query_reports, ReportFilter};

fn test_db() -> Connection {
    let conn = Connection::open_in_memory().expect("should open in-memory db");
    lifewire_db::run_migrations(&conn).expect("migrations should succeed");
    conn
}

fn conflict(location: &str) -> ReportPayload {
    ReportPayload::SubscriptionConflict {
        storage_location: location.to_string(),
        trigger_condition: "OBJECT_CREATED".to_string(),
        existing_target: "receiver-a".to_string(),
        requested_target: "receiver-b".to_string(),
    }
}

fn malformed() -> ReportPayload {
    ReportPayload::MalformedEvent {
        field: "detail.state".to_string(),
        reason: "is missing or not a string".to_string(),
    }
}

// ── emit_report ──────────────────────────────────────────────────────

#[test]
fn emit_report_inserts_row() {
    let conn = test_db();

    let report = emit_report(&conn, &conflict("logs")).expect("emit should succeed");
    assert!(report.id > 0);
    assert_eq!(report.seq, 1);
    assert_eq!(report.kind, "SUBSCRIPTION_CONFLICT");
    assert_eq!(report.subject, "logs");

    let (kind, subject): (String, String) = conn
        .query_row(
            "SELECT kind, subject FROM operator_reports WHERE id = ?1",
            [report.id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .expect("should query inserted row");
    assert_eq!(kind, "SUBSCRIPTION_CONFLICT");
    assert_eq!(subject, "logs");
}

#[test]
fn payload_round_trips_through_json() {
    let conn = test_db();
    let report = emit_report(&conn, &conflict("logs")).expect("emit should succeed");
    assert_eq!(report.payload().expect("payload decodes"), conflict("logs"));

    let value: serde_json::Value =
        serde_json::from_str(&report.payload_json).expect("valid json");
    assert_eq!(value["kind"], "SUBSCRIPTION_CONFLICT");
    assert_eq!(value["existing_target"], "receiver-a");
}

#[test]
fn sequence_numbers_increase_monotonically() {
    let conn = test_db();
    let seqs: Vec<i64> = (0..5)
        .map(|_| emit_report(&conn, &malformed()).expect("emit").seq)
        .collect();
    assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
}

// ── query_reports ────────────────────────────────────────────────────

#[test]
fn query_filters_by_kind_and_subject() {
    let conn = test_db();
    emit_report(&conn, &conflict("logs")).expect("emit");
    emit_report(&conn, &conflict("metrics")).expect("emit");
    emit_report(&conn, &malformed()).expect("emit");

    let conflicts = query_reports(
        &conn,
        &ReportFilter {
            kind: Some(ReportKind::SubscriptionConflict),
            ..Default::default()
        },
    )
    .expect("query");
    assert_eq!(conflicts.len(), 2);

    let logs = query_reports(
        &conn,
        &ReportFilter {
            kind: Some(ReportKind::SubscriptionConflict),
            subject: Some("logs".to_string()),
            ..Default::default()
        },
    )
    .expect("query");
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].seq, 1);
}

#[test]
fn query_respects_after_seq_and_limit() {
    let conn = test_db();
    for _ in 0..10 {
        emit_report(&conn, &malformed()).expect("emit");
    }

    let page = query_reports(
        &conn,
        &ReportFilter {
            after_seq: Some(3),
            limit: Some(4),
            ..Default::default()
        },
    )
    .expect("query");
    let seqs: Vec<i64> = page.iter().map(|r| r.seq).collect();
    assert_eq!(seqs, vec![4, 5, 6, 7]);

    let all = query_reports(&conn, &ReportFilter::default()).expect("query");
    assert_eq!(all.len(), 10);
}

#[test]
fn query_on_empty_log_returns_nothing() {
    let conn = test_db();
    let reports = query_reports(&conn, &ReportFilter::default()).expect("query");
    assert!(reports.is_empty());
}

// ── kinds ────────────────────────────────────────────────────────────

#[test]
fn report_kind_labels_parse() {
    for kind in [
        ReportKind::SubscriptionActivated,
        ReportKind::SubscriptionRemoved,
        ReportKind::SubscriptionConflict,
        ReportKind::RetryExhausted,
        ReportKind::DeliveryExhausted,
        ReportKind::MalformedEvent,
        ReportKind::HandlerFailed,
        ReportKind::NotificationsLost,
    ] {
        assert_eq!(kind.as_str().parse::<ReportKind>(), Ok(kind));
    }
    assert!("NODE_ADDED".parse::<ReportKind>().is_err());
    assert!(!ReportKind::SubscriptionActivated.needs_attention());
    assert!(ReportKind::DeliveryExhausted.needs_attention());
    assert!(ReportKind::NotificationsLost.needs_attention());
}

#[test]
fn lost_notifications_fall_back_to_a_fixed_subject() {
    let lagged = ReportPayload::NotificationsLost {
        storage_location: None,
        key: None,
        count: 3,
        reason: "notification channel lagged".into(),
    };
    assert_eq!(lagged.kind(), ReportKind::NotificationsLost);
    assert_eq!(lagged.subject(), "notifications");

    let unroutable = ReportPayload::NotificationsLost {
        storage_location: Some("logs".into()),
        key: Some("app.log".into()),
        count: 1,
        reason: "no handler registered as nobody".into(),
    };
    assert_eq!(unroutable.subject(), "logs");
}
