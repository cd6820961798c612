//! PostgreSQL implementation of the persistence layer.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use super::models::{AggregateRow, CommittedEventRow};
use crate::config::LedgerConfig;
use crate::domain::{CommitRecord, Fingerprint, SavingsEvent, StoreStats, UserAggregate, UserId};
use crate::error::LedgerError;

/// Raw tuple shape of a `committed_events` row.
type CommittedEventTuple = (
    i64,
    Uuid,
    String,
    String,
    String,
    String,
    i64,
    Option<i64>,
    DateTime<Utc>,
);

/// PostgreSQL-backed ledger using `sqlx::PgPool`.
#[derive(Debug, Clone)]
pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    /// Creates a ledger over an existing connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects to PostgreSQL with pool settings from the config.
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError::PersistenceError`] if the pool cannot be
    /// established.
    pub async fn connect(config: &LedgerConfig) -> Result<Self, LedgerError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(config.database_min_connections)
            .acquire_timeout(Duration::from_secs(config.database_connect_timeout_secs))
            .connect(&config.database_url)
            .await
            .map_err(|e| LedgerError::PersistenceError(e.to_string()))?;

        tracing::info!(
            max_connections = config.database_max_connections,
            "postgres ledger connected"
        );

        Ok(Self::new(pool))
    }

    /// Creates the ledger tables if they do not exist yet.
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError::PersistenceError`] on database failure.
    pub async fn ensure_schema(&self) -> Result<(), LedgerError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS committed_events (
                id                 BIGSERIAL PRIMARY KEY,
                user_id            UUID NOT NULL,
                fingerprint        TEXT NOT NULL UNIQUE,
                coupon_id          TEXT NOT NULL,
                code               TEXT NOT NULL,
                store_id           TEXT NOT NULL,
                captured_at        BIGINT NOT NULL,
                amount_saved_cents BIGINT,
                committed_at       TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerError::PersistenceError(e.to_string()))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_committed_events_user
             ON committed_events (user_id, committed_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerError::PersistenceError(e.to_string()))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS user_aggregates (
                user_id            UUID PRIMARY KEY,
                total_saved_cents  BIGINT NOT NULL DEFAULT 0,
                coupons_used_count BIGINT NOT NULL DEFAULT 0,
                per_store          JSONB NOT NULL DEFAULT '{}'::jsonb,
                last_updated_at    TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerError::PersistenceError(e.to_string()))?;

        Ok(())
    }

    /// Records a commit: the canonical event row plus the aggregate row,
    /// atomically in one transaction.
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError::PersistenceError`] on database failure.
    pub async fn record_committed(
        &self,
        user_id: UserId,
        event: &SavingsEvent,
        aggregate: &UserAggregate,
    ) -> Result<(), LedgerError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| LedgerError::PersistenceError(e.to_string()))?;

        sqlx::query(
            "INSERT INTO committed_events
             (user_id, fingerprint, coupon_id, code, store_id, captured_at, amount_saved_cents)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (fingerprint) DO NOTHING",
        )
        .bind(*user_id.as_uuid())
        .bind(event.fingerprint.as_str())
        .bind(&event.coupon_id)
        .bind(&event.code)
        .bind(&event.store_id)
        .bind(event.captured_at)
        .bind(event.amount_saved_cents)
        .execute(&mut *tx)
        .await
        .map_err(|e| LedgerError::PersistenceError(e.to_string()))?;

        upsert_aggregate(&mut tx, aggregate).await?;

        tx.commit()
            .await
            .map_err(|e| LedgerError::PersistenceError(e.to_string()))
    }

    /// Records an amount amend: the corrected event row plus the adjusted
    /// aggregate row, atomically in one transaction.
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError::PersistenceError`] on database failure.
    pub async fn amend_committed(
        &self,
        user_id: UserId,
        fingerprint: &Fingerprint,
        amount_saved_cents: i64,
        aggregate: &UserAggregate,
    ) -> Result<(), LedgerError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| LedgerError::PersistenceError(e.to_string()))?;

        sqlx::query(
            "UPDATE committed_events SET amount_saved_cents = $1
             WHERE fingerprint = $2 AND user_id = $3",
        )
        .bind(amount_saved_cents)
        .bind(fingerprint.as_str())
        .bind(*user_id.as_uuid())
        .execute(&mut *tx)
        .await
        .map_err(|e| LedgerError::PersistenceError(e.to_string()))?;

        upsert_aggregate(&mut tx, aggregate).await?;

        tx.commit()
            .await
            .map_err(|e| LedgerError::PersistenceError(e.to_string()))
    }

    /// Loads all aggregate rows.
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError::PersistenceError`] on database failure.
    pub async fn load_aggregate_rows(&self) -> Result<Vec<AggregateRow>, LedgerError> {
        let rows = sqlx::query_as::<_, (Uuid, i64, i64, serde_json::Value, DateTime<Utc>)>(
            "SELECT user_id, total_saved_cents, coupons_used_count, per_store, last_updated_at
             FROM user_aggregates",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| LedgerError::PersistenceError(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(
                |(user_id, total_saved_cents, coupons_used_count, per_store, last_updated_at)| {
                    AggregateRow {
                        user_id,
                        total_saved_cents,
                        coupons_used_count,
                        per_store,
                        last_updated_at,
                    }
                },
            )
            .collect())
    }

    /// Loads all committed event rows, optionally for a single user.
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError::PersistenceError`] on database failure.
    pub async fn load_committed_events(
        &self,
        user_id: Option<Uuid>,
    ) -> Result<Vec<CommittedEventRow>, LedgerError> {
        let rows = if let Some(uid) = user_id {
            sqlx::query_as::<_, CommittedEventTuple>(
                "SELECT id, user_id, fingerprint, coupon_id, code, store_id, captured_at,
                        amount_saved_cents, committed_at
                 FROM committed_events WHERE user_id = $1 ORDER BY committed_at ASC",
            )
            .bind(uid)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query_as::<_, CommittedEventTuple>(
                "SELECT id, user_id, fingerprint, coupon_id, code, store_id, captured_at,
                        amount_saved_cents, committed_at
                 FROM committed_events ORDER BY committed_at ASC",
            )
            .fetch_all(&self.pool)
            .await
        }
        .map_err(|e| LedgerError::PersistenceError(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(
                |(
                    id,
                    user_id,
                    fingerprint,
                    coupon_id,
                    code,
                    store_id,
                    captured_at,
                    amount_saved_cents,
                    committed_at,
                )| CommittedEventRow {
                    id,
                    user_id,
                    fingerprint,
                    coupon_id,
                    code,
                    store_id,
                    captured_at,
                    amount_saved_cents,
                    committed_at,
                },
            )
            .collect())
    }

    /// Loads every aggregate with its committed-fingerprint ledger.
    ///
    /// Used at startup to rehydrate the in-memory registry.
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError::PersistenceError`] on database failure or
    /// a corrupt `per_store` document.
    pub async fn load_aggregates(
        &self,
    ) -> Result<Vec<(UserAggregate, HashMap<Fingerprint, CommitRecord>)>, LedgerError> {
        let aggregate_rows = self.load_aggregate_rows().await?;
        let event_rows = self.load_committed_events(None).await?;

        let mut committed_by_user: HashMap<Uuid, HashMap<Fingerprint, CommitRecord>> =
            HashMap::new();
        for row in event_rows {
            committed_by_user.entry(row.user_id).or_default().insert(
                Fingerprint::from_hex(row.fingerprint),
                CommitRecord {
                    store_id: row.store_id,
                    amount_saved_cents: row.amount_saved_cents,
                },
            );
        }

        let mut result = Vec::with_capacity(aggregate_rows.len());
        for row in aggregate_rows {
            let per_store: HashMap<String, StoreStats> = serde_json::from_value(row.per_store)
                .map_err(|e| {
                    LedgerError::PersistenceError(format!(
                        "corrupt per_store for {}: {e}",
                        row.user_id
                    ))
                })?;
            let aggregate = UserAggregate {
                user_id: UserId::from_uuid(row.user_id),
                total_saved_cents: row.total_saved_cents,
                coupons_used_count: row.coupons_used_count.max(0) as u64,
                per_store,
                last_updated_at: Some(row.last_updated_at),
            };
            let committed = committed_by_user.remove(&row.user_id).unwrap_or_default();
            result.push((aggregate, committed));
        }

        Ok(result)
    }

    /// Deletes committed event rows older than the given number of days,
    /// returning how many were removed. A zero `before_days` disables the
    /// sweep.
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError::PersistenceError`] on database failure.
    pub async fn delete_old_events(&self, before_days: u64) -> Result<u64, LedgerError> {
        if before_days == 0 {
            return Ok(0);
        }
        let cutoff =
            Utc::now() - chrono::Duration::days(i64::try_from(before_days).unwrap_or(i64::MAX));

        let result = sqlx::query("DELETE FROM committed_events WHERE committed_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(|e| LedgerError::PersistenceError(e.to_string()))?;

        Ok(result.rows_affected())
    }
}

/// Writes the aggregate row inside the caller's transaction.
async fn upsert_aggregate(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    aggregate: &UserAggregate,
) -> Result<(), LedgerError> {
    let per_store = serde_json::to_value(&aggregate.per_store)
        .map_err(|e| LedgerError::PersistenceError(e.to_string()))?;

    sqlx::query(
        "INSERT INTO user_aggregates
         (user_id, total_saved_cents, coupons_used_count, per_store, last_updated_at)
         VALUES ($1, $2, $3, $4, $5)
         ON CONFLICT (user_id) DO UPDATE SET
            total_saved_cents = EXCLUDED.total_saved_cents,
            coupons_used_count = EXCLUDED.coupons_used_count,
            per_store = EXCLUDED.per_store,
            last_updated_at = EXCLUDED.last_updated_at",
    )
    .bind(*aggregate.user_id.as_uuid())
    .bind(aggregate.total_saved_cents)
    .bind(i64::try_from(aggregate.coupons_used_count).unwrap_or(i64::MAX))
    .bind(per_store)
    .bind(aggregate.last_updated_at.unwrap_or_else(Utc::now))
    .execute(&mut **tx)
    .await
    .map_err(|e| LedgerError::PersistenceError(e.to_string()))?;

    Ok(())
}
