//! Durable [`ObjectStore`] on the pooled SQLite database.
//!
//! All SQL runs on the blocking pool. `register_subscription` takes the
//! write lock up front (`BEGIN IMMEDIATE`), so the existence check and the
//! insert cannot interleave with another replica's registration.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use lifewire_db::DbPool;
use lifewire_types::{
    NotificationSubscription, ObjectMeta, ObjectNotification, ObjectReference, SubscriptionKey,
    TriggerCondition,
};
use rusqlite::{params, Connection, TransactionBehavior};
use tokio::sync::broadcast;

use crate::error::StoreError;
use crate::facade::{etag_of, ObjectStore};
use crate::hub::NotificationHub;

/// An object store persisted in the `objects` and
/// `notification_subscriptions` tables.
#[derive(Clone)]
pub struct SqliteStore {
    pool: DbPool,
    hub: NotificationHub,
}

impl SqliteStore {
    /// Wraps a migrated pool.
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            hub: NotificationHub::default(),
        }
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            f(&mut *conn)
        })
        .await?
    }
}

fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
}

fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn active_at(conn: &Connection, location: &str) -> rusqlite::Result<Vec<SubscriptionKey>> {
    let mut stmt = conn.prepare(
        "SELECT storage_location, trigger_condition, target_handler_ref
         FROM notification_subscriptions
         WHERE storage_location = ?1
         ORDER BY trigger_condition, target_handler_ref",
    )?;
    let rows = stmt.query_map([location], |row| {
        let trigger: String = row.get(1)?;
        Ok(SubscriptionKey {
            storage_location: row.get(0)?,
            trigger_condition: trigger
                .parse::<TriggerCondition>()
                .map_err(|e| conversion_error(1, e))?,
            target_handler_ref: row.get(2)?,
        })
    })?;
    rows.collect()
}

fn meta_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ObjectMeta> {
    let size: i64 = row.get(1)?;
    let updated_at: String = row.get(3)?;
    Ok(ObjectMeta {
        key: row.get(0)?,
        size: size.max(0) as u64,
        etag: row.get(2)?,
        last_modified: parse_timestamp(3, &updated_at)?,
    })
}

#[async_trait]
impl ObjectStore for SqliteStore {
    async fn get_subscriptions(
        &self,
        location: &str,
    ) -> Result<Vec<NotificationSubscription>, StoreError> {
        let location = location.to_string();
        self.blocking(move |conn| {
            Ok(active_at(conn, &location)?
                .iter()
                .map(NotificationSubscription::active)
                .collect())
        })
        .await
    }

    async fn register_subscription(
        &self,
        subscription: &NotificationSubscription,
    ) -> Result<(), StoreError> {
        let key = subscription.key();
        self.blocking(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let existing: Vec<String> = {
                let mut stmt = tx.prepare(
                    "SELECT target_handler_ref FROM notification_subscriptions
                     WHERE storage_location = ?1 AND trigger_condition = ?2",
                )?;
                let rows = stmt.query_map(
                    params![key.storage_location, key.trigger_condition.as_str()],
                    |row| row.get(0),
                )?;
                rows.collect::<rusqlite::Result<_>>()?
            };

            if existing.iter().any(|t| *t == key.target_handler_ref) {
                return Err(StoreError::AlreadyExists(key.to_string()));
            }
            if let Some(other) = existing.into_iter().next() {
                return Err(StoreError::Conflict {
                    key: key.to_string(),
                    existing_target: other,
                });
            }

            match tx.execute(
                "INSERT INTO notification_subscriptions
                    (storage_location, trigger_condition, target_handler_ref)
                 VALUES (?1, ?2, ?3)",
                params![
                    key.storage_location,
                    key.trigger_condition.as_str(),
                    key.target_handler_ref
                ],
            ) {
                Ok(_) => {}
                Err(e) if lifewire_db::is_unique_violation(&e) => {
                    return Err(StoreError::AlreadyExists(key.to_string()));
                }
                Err(e) => return Err(e.into()),
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn unregister_subscription(&self, key: &SubscriptionKey) -> Result<(), StoreError> {
        let key = key.clone();
        self.blocking(move |conn| {
            let removed = conn.execute(
                "DELETE FROM notification_subscriptions
                 WHERE storage_location = ?1 AND trigger_condition = ?2 AND target_handler_ref = ?3",
                params![
                    key.storage_location,
                    key.trigger_condition.as_str(),
                    key.target_handler_ref
                ],
            )?;
            if removed == 0 {
                tracing::debug!(key = %key, "unregister of absent subscription");
            }
            Ok(())
        })
        .await
    }

    async fn put_object(
        &self,
        object: &ObjectReference,
        body: Bytes,
    ) -> Result<ObjectMeta, StoreError> {
        let meta = ObjectMeta {
            key: object.key.clone(),
            size: body.len() as u64,
            etag: etag_of(&body),
            last_modified: Utc::now(),
        };
        let location = object.storage_location.clone();
        let row_meta = meta.clone();
        let active = self
            .blocking(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                tx.execute(
                    "INSERT INTO objects
                        (storage_location, object_key, body, etag, size, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT (storage_location, object_key) DO UPDATE SET
                        body = excluded.body,
                        etag = excluded.etag,
                        size = excluded.size,
                        updated_at = excluded.updated_at",
                    params![
                        location,
                        row_meta.key,
                        body.as_ref(),
                        row_meta.etag,
                        row_meta.size as i64,
                        row_meta.last_modified.to_rfc3339(),
                    ],
                )?;
                let active = active_at(&tx, &location)?;
                tx.commit()?;
                Ok(active)
            })
            .await?;

        self.hub.raise(
            &active,
            TriggerCondition::ObjectCreated,
            object,
            meta.size,
            &meta.etag,
        );
        Ok(meta)
    }

    async fn get_object(&self, object: &ObjectReference) -> Result<Bytes, StoreError> {
        let object = object.clone();
        self.blocking(move |conn| {
            let body: Option<Vec<u8>> = conn
                .query_row(
                    "SELECT body FROM objects WHERE storage_location = ?1 AND object_key = ?2",
                    params![object.storage_location, object.key],
                    |row| row.get(0),
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(other),
                })?;
            body.map(Bytes::from)
                .ok_or_else(|| StoreError::NotFound(object.to_string()))
        })
        .await
    }

    async fn head_object(&self, object: &ObjectReference) -> Result<ObjectMeta, StoreError> {
        let object = object.clone();
        self.blocking(move |conn| {
            match conn.query_row(
                "SELECT object_key, size, etag, updated_at FROM objects
                 WHERE storage_location = ?1 AND object_key = ?2",
                params![object.storage_location, object.key],
                meta_from_row,
            ) {
                Ok(meta) => Ok(meta),
                Err(rusqlite::Error::QueryReturnedNoRows) => {
                    Err(StoreError::NotFound(object.to_string()))
                }
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn list_objects(
        &self,
        location: &str,
        prefix: &str,
    ) -> Result<Vec<ObjectMeta>, StoreError> {
        let location = location.to_string();
        let prefix = prefix.to_string();
        self.blocking(move |conn| {
            // substr comparison keeps LIKE wildcards in keys literal.
            let mut stmt = conn.prepare(
                "SELECT object_key, size, etag, updated_at FROM objects
                 WHERE storage_location = ?1 AND substr(object_key, 1, length(?2)) = ?2
                 ORDER BY object_key",
            )?;
            let rows = stmt.query_map(params![location, prefix], meta_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn delete_object(&self, object: &ObjectReference) -> Result<bool, StoreError> {
        let target = object.clone();
        let active = self
            .blocking(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let removed = tx.execute(
                    "DELETE FROM objects WHERE storage_location = ?1 AND object_key = ?2",
                    params![target.storage_location, target.key],
                )?;
                if removed == 0 {
                    return Ok(None);
                }
                let active = active_at(&tx, &target.storage_location)?;
                tx.commit()?;
                Ok(Some(active))
            })
            .await?;

        match active {
            Some(active) => {
                self.hub
                    .raise(&active, TriggerCondition::ObjectRemoved, object, 0, "");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn notifications(&self) -> broadcast::Receiver<ObjectNotification> {
        self.hub.subscribe()
    }
}
