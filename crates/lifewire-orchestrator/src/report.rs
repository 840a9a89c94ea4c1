//! Delivery of operator reports.
//!
//! Reporting is best-effort: a reporter never fails its caller. A report
//! that cannot be stored is still visible in the log output.

use async_trait::async_trait;
use lifewire_db::DbPool;
use lifewire_observe::{emit_report, ReportKind, ReportPayload};
use tokio::sync::Mutex;

/// The operator-facing reporting collaborator.
#[async_trait]
pub trait Reporter: Send + Sync {
    /// Records `payload`.
    async fn report(&self, payload: ReportPayload);
}

fn log_report(payload: &ReportPayload) {
    let kind = payload.kind();
    if kind.needs_attention() {
        tracing::warn!(kind = %kind, subject = payload.subject(), ?payload, "operator report");
    } else {
        tracing::info!(kind = %kind, subject = payload.subject(), "operator report");
    }
}

/// Appends reports to the `operator_reports` table.
#[derive(Clone)]
pub struct SqliteReporter {
    pool: DbPool,
}

impl SqliteReporter {
    /// Wraps a migrated pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Reporter for SqliteReporter {
    async fn report(&self, payload: ReportPayload) {
        log_report(&payload);
        let pool = self.pool.clone();
        let kind = payload.kind();
        let stored = tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(|e| e.to_string())?;
            emit_report(&conn, &payload).map_err(|e| e.to_string())
        })
        .await;
        match stored {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::warn!(kind = %kind, error = %e, "failed to store operator report"),
            Err(e) => tracing::warn!(kind = %kind, error = %e, "operator report task failed"),
        }
    }
}

/// Keeps reports in memory.
#[derive(Debug, Default)]
pub struct MemoryReporter {
    reports: Mutex<Vec<ReportPayload>>,
}

impl MemoryReporter {
    /// Creates an empty reporter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every report so far, oldest first.
    pub async fn reports(&self) -> Vec<ReportPayload> {
        self.reports.lock().await.clone()
    }

    /// Reports of one kind, oldest first.
    pub async fn of_kind(&self, kind: ReportKind) -> Vec<ReportPayload> {
        self.reports
            .lock()
            .await
            .iter()
            .filter(|p| p.kind() == kind)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Reporter for MemoryReporter {
    async fn report(&self, payload: ReportPayload) {
        log_report(&payload);
        self.reports.lock().await.push(payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sqlite_reporter_appends_rows() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("reports.db");
        let pool = lifewire_db::create_pool(
            path.to_str().expect("utf-8 path"),
            lifewire_db::DbRuntimeSettings::default(),
        )
        .expect("pool");
        lifewire_db::run_migrations(&pool.get().expect("conn")).expect("migrations");

        let reporter = SqliteReporter::new(pool.clone());
        reporter
            .report(ReportPayload::MalformedEvent {
                field: "source".to_string(),
                reason: "is missing or not a string".to_string(),
            })
            .await;

        let conn = pool.get().expect("conn");
        let reports =
            lifewire_observe::query_reports(&conn, &Default::default()).expect("query");
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].kind, "MALFORMED_EVENT");
    }

    #[tokio::test]
    async fn sqlite_reporter_swallows_storage_failures() {
        // No migrations: the insert fails, the caller is unaffected.
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bare.db");
        let pool = lifewire_db::create_pool(
            path.to_str().expect("utf-8 path"),
            lifewire_db::DbRuntimeSettings::default(),
        )
        .expect("pool");
        SqliteReporter::new(pool)
            .report(ReportPayload::MalformedEvent {
                field: "time".to_string(),
                reason: "is not RFC 3339".to_string(),
            })
            .await;
    }
}
