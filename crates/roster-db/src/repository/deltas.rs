//! # Delta Log Repository
//!
//! Stores the delta log header (schema version + endpoint cache) and its
//! ordered fragments.
//!
//! ## Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Delta Log Storage                                    │
//! │                                                                         │
//! │  delta_logs                         delta_fragments                    │
//! │  ┌───────┬─────────┬───────────┐    ┌────┬───────┬─────┬──────────────┐│
//! │  │ owner │ version │ endpoints │◄───│ id │ owner │ seq │ kind/payload ││
//! │  └───────┴─────────┴───────────┘    └────┴───────┴─────┴──────────────┘│
//! │                                                                         │
//! │  save()      header upsert + fragments rewritten, one transaction      │
//! │  truncate()  DELETE fragments only; endpoint cache survives            │
//! │  delete()    header and fragments removed                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use roster_core::{DeltaLog, EndpointEntry, ServerFragment, DELTA_LOG_SCHEMA_VERSION};

use crate::error::{DbError, DbResult};

const RECORD: &str = "delta log";

/// Repository for delta log records.
#[derive(Debug, Clone)]
pub struct DeltaLogRepository {
    pool: SqlitePool,
}

impl DeltaLogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        DeltaLogRepository { pool }
    }

    /// Loads the delta log for `owner`, fragments in append order.
    pub async fn load(&self, owner: &str) -> DbResult<Option<DeltaLog>> {
        let header: Option<(i64, String)> = sqlx::query_as(
            r#"
            SELECT schema_version, endpoints
            FROM delta_logs
            WHERE owner = ?1
            "#,
        )
        .bind(owner)
        .fetch_optional(&self.pool)
        .await?;

        let Some((version, endpoints)) = header else {
            debug!(owner = %owner, "No stored delta log");
            return Ok(None);
        };

        let found = u32::try_from(version).unwrap_or(0);
        if found != DELTA_LOG_SCHEMA_VERSION {
            return Err(DbError::SchemaMismatch {
                record: RECORD,
                expected: DELTA_LOG_SCHEMA_VERSION,
                found,
            });
        }

        let endpoints: BTreeMap<String, EndpointEntry> =
            serde_json::from_str(&endpoints).map_err(|e| DbError::corrupt(RECORD, e))?;

        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT payload
            FROM delta_fragments
            WHERE owner = ?1
            ORDER BY seq ASC
            "#,
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;

        let fragments = rows
            .into_iter()
            .map(|(payload,)| serde_json::from_str::<ServerFragment>(&payload))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| DbError::corrupt(RECORD, e))?;

        debug!(
            owner = %owner,
            fragments = fragments.len(),
            endpoints = endpoints.len(),
            "Loaded delta log"
        );

        Ok(Some(DeltaLog {
            schema_version: found,
            fragments,
            endpoints,
        }))
    }

    /// Stores the full delta log for `owner` atomically.
    pub async fn save(&self, owner: &str, log: &DeltaLog) -> DbResult<()> {
        let endpoints =
            serde_json::to_string(&log.endpoints).map_err(|e| DbError::corrupt(RECORD, e))?;
        let now = Utc::now();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO delta_logs (owner, schema_version, endpoints, saved_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(owner) DO UPDATE SET
                schema_version = excluded.schema_version,
                endpoints = excluded.endpoints,
                saved_at = excluded.saved_at
            "#,
        )
        .bind(owner)
        .bind(i64::from(log.schema_version))
        .bind(&endpoints)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM delta_fragments WHERE owner = ?1")
            .bind(owner)
            .execute(&mut *tx)
            .await?;

        for (seq, fragment) in log.fragments.iter().enumerate() {
            let payload =
                serde_json::to_string(fragment).map_err(|e| DbError::corrupt(RECORD, e))?;

            sqlx::query(
                r#"
                INSERT INTO delta_fragments (id, owner, seq, kind, payload, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(owner)
            .bind(seq as i64)
            .bind(fragment.kind())
            .bind(&payload)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        debug!(
            owner = %owner,
            fragments = log.fragments.len(),
            endpoints = log.endpoints.len(),
            "Saved delta log"
        );
        Ok(())
    }

    /// Drops the stored fragments, keeping the endpoint cache. Returns the
    /// number of fragments removed.
    pub async fn truncate(&self, owner: &str) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM delta_fragments WHERE owner = ?1")
            .bind(owner)
            .execute(&self.pool)
            .await?;

        debug!(owner = %owner, removed = result.rows_affected(), "Truncated delta log");
        Ok(result.rows_affected())
    }

    /// Deletes the delta log and all its fragments.
    pub async fn delete(&self, owner: &str) -> DbResult<bool> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        sqlx::query("DELETE FROM delta_fragments WHERE owner = ?1")
            .bind(owner)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM delta_logs WHERE owner = ?1")
            .bind(owner)
            .execute(&mut *tx)
            .await?;

        tx.commit()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use crate::{Database, DbConfig, DbError};
    use roster_core::snapshot::{AddressBookFragment, MembershipFragment};
    use roster_core::{DeltaLog, ServerFragment};

    const OWNER: &str = "owner@example.com";

    async fn db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    fn sample() -> DeltaLog {
        let mut log = DeltaLog::new();
        log.append(ServerFragment::Membership(MembershipFragment::default()));
        log.append(ServerFragment::AddressBook(AddressBookFragment::default()));
        log.record_endpoint("FindMembership", Some("token-1".into()), Some("bay.example.com".into()));
        log
    }

    #[tokio::test]
    async fn test_save_then_load_keeps_order() {
        let db = db().await;
        let log = sample();

        db.delta_logs().save(OWNER, &log).await.unwrap();
        let loaded = db.delta_logs().load(OWNER).await.unwrap().unwrap();

        assert_eq!(loaded, log);
        assert!(matches!(loaded.fragments[0], ServerFragment::Membership(_)));
        assert!(matches!(loaded.fragments[1], ServerFragment::AddressBook(_)));
    }

    #[tokio::test]
    async fn test_resave_replaces_fragments() {
        let db = db().await;
        let mut log = sample();
        db.delta_logs().save(OWNER, &log).await.unwrap();

        log.truncate();
        log.append(ServerFragment::Membership(MembershipFragment::default()));
        db.delta_logs().save(OWNER, &log).await.unwrap();

        let loaded = db.delta_logs().load(OWNER).await.unwrap().unwrap();
        assert_eq!(loaded.fragments.len(), 1);
    }

    #[tokio::test]
    async fn test_truncate_keeps_endpoint_cache() {
        let db = db().await;
        db.delta_logs().save(OWNER, &sample()).await.unwrap();

        assert_eq!(db.delta_logs().truncate(OWNER).await.unwrap(), 2);

        let loaded = db.delta_logs().load(OWNER).await.unwrap().unwrap();
        assert!(loaded.fragments.is_empty());
        assert_eq!(
            loaded.endpoint("FindMembership").and_then(|e| e.host()),
            Some("bay.example.com")
        );
    }

    #[tokio::test]
    async fn test_schema_mismatch_is_reported() {
        let db = db().await;
        let mut log = sample();
        log.schema_version = 99;
        db.delta_logs().save(OWNER, &log).await.unwrap();

        let err = db.delta_logs().load(OWNER).await.unwrap_err();
        assert!(matches!(err, DbError::SchemaMismatch { found: 99, .. }));
    }

    #[tokio::test]
    async fn test_delete_removes_everything() {
        let db = db().await;
        db.delta_logs().save(OWNER, &sample()).await.unwrap();

        assert!(db.delta_logs().delete(OWNER).await.unwrap());
        assert!(db.delta_logs().load(OWNER).await.unwrap().is_none());
        assert_eq!(db.delta_logs().truncate(OWNER).await.unwrap(), 0);
    }
}
