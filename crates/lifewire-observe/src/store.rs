//! Persistence operations for the operator report log.
//!
//! Writes go through [`emit_report`], which serialises the payload, assigns
//! the next sequence number and inserts in a single statement. Reads go
//! through [`query_reports`].

use rusqlite::{params, Connection};

use crate::error::ObserveError;
use crate::report::{OperatorReport, ReportKind, ReportPayload};

/// Upper bound on [`ReportFilter::limit`].
pub const MAX_QUERY_LIMIT: i64 = 1000;

const DEFAULT_QUERY_LIMIT: i64 = 100;

/// Appends a report to the log.
///
/// The kind and subject come from the payload. The sequence number is
/// computed inside the INSERT, so concurrent writers never observe the same
/// `MAX(seq)`.
///
/// # Errors
///
/// Returns `ObserveError::Database` on SQL failure or
/// `ObserveError::Serialization` if the payload cannot be serialised.
pub fn emit_report(
    conn: &Connection,
    payload: &ReportPayload,
) -> Result<OperatorReport, ObserveError> {
    let payload_json = serde_json::to_string(payload)?;
    let kind = payload.kind().as_str();
    let subject = payload.subject();

    let (id, seq, reported_at) = conn.query_row(
        "INSERT INTO operator_reports (seq, kind, subject, payload_json)
         VALUES (
            (SELECT COALESCE(MAX(seq), 0) + 1 FROM operator_reports),
            ?1, ?2, ?3
         )
         RETURNING id, seq, reported_at",
        params![kind, subject, payload_json],
        |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
            ))
        },
    )?;

    tracing::debug!(seq, kind, subject, "operator report written");

    Ok(OperatorReport {
        id,
        seq,
        kind: kind.to_string(),
        subject: subject.to_string(),
        payload_json,
        reported_at,
    })
}

/// Filter criteria for querying the report log.
#[derive(Debug, Clone, Default)]
pub struct ReportFilter {
    /// Filter by report kind.
    pub kind: Option<ReportKind>,
    /// Filter by subject (location, rule or field).
    pub subject: Option<String>,
    /// Return reports written at or after this ISO 8601 timestamp.
    pub since: Option<String>,
    /// Return reports with a sequence number strictly greater than this.
    pub after_seq: Option<i64>,
    /// Maximum number of reports to return (default 100, capped at 1000).
    pub limit: Option<i64>,
}

/// Queries the report log, oldest first.
///
/// # Errors
///
/// Returns `ObserveError::Database` on SQL failure.
pub fn query_reports(
    conn: &Connection,
    filter: &ReportFilter,
) -> Result<Vec<OperatorReport>, ObserveError> {
    let mut clauses: Vec<String> = Vec::new();
    let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

    if let Some(kind) = filter.kind {
        param_values.push(Box::new(kind.as_str()));
        clauses.push(format!("kind = ?{}", param_values.len()));
    }

    if let Some(ref subject) = filter.subject {
        param_values.push(Box::new(subject.clone()));
        clauses.push(format!("subject = ?{}", param_values.len()));
    }

    if let Some(ref since) = filter.since {
        param_values.push(Box::new(since.clone()));
        clauses.push(format!("reported_at >= ?{}", param_values.len()));
    }

    if let Some(after) = filter.after_seq {
        param_values.push(Box::new(after));
        clauses.push(format!("seq > ?{}", param_values.len()));
    }

    let where_clause = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };

    let limit = filter
        .limit
        .unwrap_or(DEFAULT_QUERY_LIMIT)
        .clamp(1, MAX_QUERY_LIMIT);
    param_values.push(Box::new(limit));

    let sql = format!(
        "SELECT id, seq, kind, subject, payload_json, reported_at
         FROM operator_reports
         {where_clause}
         ORDER BY seq ASC
         LIMIT ?{}",
        param_values.len()
    );

    let params_refs: Vec<&dyn rusqlite::types::ToSql> =
        param_values.iter().map(|p| &**p).collect();

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_refs.as_slice(), |row| {
        Ok(OperatorReport {
            id: row.get(0)?,
            seq: row.get(1)?,
            kind: row.get(2)?,
            subject: row.get(3)?,
            payload_json: row.get(4)?,
            reported_at: row.get(5)?,
        })
    })?;

    let mut reports = Vec::new();
    for row in rows {
        reports.push(row?);
    }

    Ok(reports)
}
