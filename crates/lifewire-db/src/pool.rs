//! Connection pool creation and configuration.
//!
//! Several orchestrator replicas may share one database file. Subscription
//! registration takes the write lock up front (`BEGIN IMMEDIATE`), so a
//! replica racing another one for the same key waits up to `busy_timeout_ms`
//! for the lock. Past that the statement fails with `SQLITE_BUSY`, which
//! [`crate::is_busy`] recognises and the callers treat as retryable.

use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OpenFlags};
use thiserror::Error;

/// Runtime tunables for SQLite connection behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbRuntimeSettings {
    /// How long a writer waits for another connection's write lock, in
    /// milliseconds.
    pub busy_timeout_ms: u64,

    /// Maximum number of pooled SQLite connections.
    pub pool_max_size: u32,
}

impl Default for DbRuntimeSettings {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            pool_max_size: 8,
        }
    }
}

impl DbRuntimeSettings {
    /// The lock wait as a [`Duration`].
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    fn check(&self) -> Result<(), PoolError> {
        if self.pool_max_size == 0 {
            return Err(PoolError::InvalidSettings(
                "pool_max_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// The SQLite connection pool shared by the store, the grants table and the
/// report log.
pub type DbPool = Pool<SqliteConnectionManager>;

/// Errors that can occur when creating the database pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The settings cannot produce a working pool.
    #[error("invalid database settings: {0}")]
    InvalidSettings(String),

    /// Failed to build the connection pool.
    #[error("failed to create database connection pool: {0}")]
    PoolInit(#[from] r2d2::Error),
}

/// Prepares a fresh connection: WAL journal, foreign keys, lock wait.
fn init_connection(conn: &mut Connection, settings: DbRuntimeSettings) -> rusqlite::Result<()> {
    // In-memory databases report "memory".
    let journal_mode: String = conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
    if journal_mode != "wal" && journal_mode != "memory" {
        return Err(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
            Some(format!("failed to set WAL journal mode, got: {journal_mode}")),
        ));
    }
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(settings.busy_timeout())
}

/// Creates a SQLite connection pool with WAL mode and foreign keys enabled.
///
/// `:memory:` gives every pooled connection its own private database, so
/// callers sharing state across connections should pass a file path (or
/// cap `pool_max_size` at 1).
///
/// # Errors
///
/// `PoolError::InvalidSettings` for a zero-sized pool, `PoolError::PoolInit`
/// if the connections cannot be opened.
pub fn create_pool(db_path: &str, settings: DbRuntimeSettings) -> Result<DbPool, PoolError> {
    settings.check()?;

    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let manager = SqliteConnectionManager::file(db_path)
        .with_flags(flags)
        .with_init(move |conn| init_connection(conn, settings));

    let pool = Pool::builder()
        .max_size(settings.pool_max_size)
        .connection_timeout(settings.busy_timeout().max(Duration::from_secs(1)))
        .build(manager)?;
    tracing::debug!(
        path = db_path,
        max_size = settings.pool_max_size,
        busy_timeout_ms = settings.busy_timeout_ms,
        "database pool ready"
    );
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use rusqlite::TransactionBehavior;

    use super::*;

    fn file_pool(dir: &tempfile::TempDir, settings: DbRuntimeSettings) -> DbPool {
        let path = dir.path().join("lifewire.db");
        create_pool(path.to_str().expect("utf-8 path"), settings)
            .expect("pool creation should succeed")
    }

    #[test]
    fn file_pool_uses_wal_and_settings() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pool = file_pool(
            &dir,
            DbRuntimeSettings {
                busy_timeout_ms: 2_500,
                pool_max_size: 3,
            },
        );
        let conn = pool.get().expect("should get a connection");

        let mode: String = conn
            .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
            .expect("should query journal_mode");
        assert_eq!(mode, "wal");

        let fk: i32 = conn
            .query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
            .expect("should query foreign_keys");
        assert_eq!(fk, 1, "foreign keys should be enabled");

        let busy_timeout: i32 = conn
            .query_row("PRAGMA busy_timeout;", [], |row| row.get(0))
            .expect("should query busy_timeout");
        assert_eq!(busy_timeout, 2_500);
        assert_eq!(pool.max_size(), 3);
    }

    #[test]
    fn in_memory_pool_reports_memory_journal() {
        let pool = create_pool(":memory:", DbRuntimeSettings::default())
            .expect("pool creation should succeed");
        let conn = pool.get().expect("should get a connection");
        let mode: String = conn
            .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
            .expect("should query journal_mode");
        assert_eq!(mode, "memory");
    }

    #[test]
    fn zero_sized_pool_is_rejected() {
        let err = create_pool(
            ":memory:",
            DbRuntimeSettings {
                busy_timeout_ms: 100,
                pool_max_size: 0,
            },
        )
        .expect_err("zero-sized pool");
        assert!(matches!(err, PoolError::InvalidSettings(_)));
    }

    #[test]
    fn competing_writer_gives_up_as_busy() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pool = file_pool(
            &dir,
            DbRuntimeSettings {
                busy_timeout_ms: 50,
                pool_max_size: 2,
            },
        );
        let mut holder = pool.get().expect("first connection");
        let mut waiter = pool.get().expect("second connection");

        let _held = holder
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .expect("first writer takes the lock");
        let err = waiter
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .expect_err("second writer times out");
        assert!(crate::is_busy(&err), "{err}");
    }
}
