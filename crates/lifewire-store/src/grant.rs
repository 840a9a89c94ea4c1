//! Invoke permissions for target handlers.
//!
//! Before a subscription can fire, the store's notification principal must
//! be allowed to invoke the target handler, scoped to the source location
//! and account. Granting is idempotent: a repeated grant reports
//! [`GrantStatus::AlreadyGranted`] instead of failing. Revoking is likewise:
//! withdrawing a permission that is not held reports
//! [`RevokeStatus::NotGranted`].

use std::collections::BTreeSet;

use async_trait::async_trait;
use lifewire_db::DbPool;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::GrantError;

/// Principal the store uses when invoking handlers.
pub const STORE_NOTIFICATION_PRINCIPAL: &str = "objectstore.notifications";

/// A permission for `principal` to invoke `target_handler_ref` on behalf of
/// `source_location` in `source_account`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InvokeGrant {
    /// Who may invoke.
    pub principal: String,
    /// The handler being invoked.
    pub target_handler_ref: String,
    /// The location whose events may trigger the invocation.
    pub source_location: String,
    /// The account owning the location.
    pub source_account: String,
}

impl InvokeGrant {
    /// A grant for the store's notification principal.
    pub fn for_store(
        target_handler_ref: impl Into<String>,
        source_location: impl Into<String>,
        source_account: impl Into<String>,
    ) -> Self {
        Self {
            principal: STORE_NOTIFICATION_PRINCIPAL.to_string(),
            target_handler_ref: target_handler_ref.into(),
            source_location: source_location.into(),
            source_account: source_account.into(),
        }
    }
}

/// Outcome of a successful grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantStatus {
    /// The permission was newly recorded.
    Granted,
    /// The permission already existed.
    AlreadyGranted,
}

/// Outcome of a successful revoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevokeStatus {
    /// The permission was withdrawn.
    Revoked,
    /// The permission was not held.
    NotGranted,
}

/// The identity collaborator that issues invoke permissions.
#[async_trait]
pub trait PermissionGrantor: Send + Sync {
    /// Ensures `grant` is in force.
    async fn grant_invoke(&self, grant: &InvokeGrant) -> Result<GrantStatus, GrantError>;

    /// Ensures `grant` is no longer in force.
    async fn revoke_invoke(&self, grant: &InvokeGrant) -> Result<RevokeStatus, GrantError>;
}

/// Grants held in memory.
#[derive(Debug, Default)]
pub struct MemoryGrants {
    grants: Mutex<BTreeSet<InvokeGrant>>,
}

impl MemoryGrants {
    /// Creates an empty grant set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if `grant` has been issued.
    pub async fn contains(&self, grant: &InvokeGrant) -> bool {
        self.grants.lock().await.contains(grant)
    }

    /// Number of distinct grants issued.
    pub async fn len(&self) -> usize {
        self.grants.lock().await.len()
    }

    /// Returns `true` if nothing has been granted.
    pub async fn is_empty(&self) -> bool {
        self.grants.lock().await.is_empty()
    }
}

#[async_trait]
impl PermissionGrantor for MemoryGrants {
    async fn grant_invoke(&self, grant: &InvokeGrant) -> Result<GrantStatus, GrantError> {
        if self.grants.lock().await.insert(grant.clone()) {
            Ok(GrantStatus::Granted)
        } else {
            Ok(GrantStatus::AlreadyGranted)
        }
    }

    async fn revoke_invoke(&self, grant: &InvokeGrant) -> Result<RevokeStatus, GrantError> {
        if self.grants.lock().await.remove(grant) {
            Ok(RevokeStatus::Revoked)
        } else {
            Ok(RevokeStatus::NotGranted)
        }
    }
}

/// Grants persisted in the `invoke_grants` table.
#[derive(Clone)]
pub struct SqliteGrants {
    pool: DbPool,
}

impl SqliteGrants {
    /// Wraps a migrated pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PermissionGrantor for SqliteGrants {
    async fn grant_invoke(&self, grant: &InvokeGrant) -> Result<GrantStatus, GrantError> {
        let pool = self.pool.clone();
        let grant = grant.clone();
        tokio::task::spawn_blocking(move || -> Result<GrantStatus, GrantError> {
            let conn = pool.get()?;
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO invoke_grants
                    (principal, target_handler_ref, source_location, source_account)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    grant.principal,
                    grant.target_handler_ref,
                    grant.source_location,
                    grant.source_account
                ],
            )?;
            Ok(if inserted == 0 {
                GrantStatus::AlreadyGranted
            } else {
                GrantStatus::Granted
            })
        })
        .await?
    }

    async fn revoke_invoke(&self, grant: &InvokeGrant) -> Result<RevokeStatus, GrantError> {
        let pool = self.pool.clone();
        let grant = grant.clone();
        tokio::task::spawn_blocking(move || -> Result<RevokeStatus, GrantError> {
            let conn = pool.get()?;
            let deleted = conn.execute(
                "DELETE FROM invoke_grants
                 WHERE principal = ?1 AND target_handler_ref = ?2
                   AND source_location = ?3 AND source_account = ?4",
                params![
                    grant.principal,
                    grant.target_handler_ref,
                    grant.source_location,
                    grant.source_account
                ],
            )?;
            Ok(if deleted == 0 {
                RevokeStatus::NotGranted
            } else {
                RevokeStatus::Revoked
            })
        })
        .await?
    }
}
