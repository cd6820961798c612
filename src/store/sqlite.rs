//! SQLite implementation of the local event store.
//!
//! A single `rusqlite` connection behind a `Mutex`, WAL mode, versioned
//! migrations. SQLite gives the queue its durability across extension
//! process restarts without any external service on the client machine.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info, warn};

use super::{Batch, EnqueueOutcome, EventStore, QueueConfig, QueuedEvent, StoreCounts};
use crate::domain::{Fingerprint, SavingsEvent, SyncState};
use crate::error::LedgerError;

/// Thread-safe SQLite database wrapper.
///
/// The connection is wrapped in a `Mutex` since `rusqlite::Connection` is
/// not `Sync`; the mutex is also the queue's single serialization point —
/// concurrent page contexts posting "simultaneously" line up here.
struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Opens (or creates) a database at the given path.
    fn open(path: &Path) -> Result<Self, LedgerError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| LedgerError::PersistenceError(e.to_string()))?;
        }

        let conn = Connection::open(path)
            .map_err(|e| LedgerError::PersistenceError(format!("failed to open queue db: {e}")))?;
        Self::init(conn, Some(path))
    }

    /// Opens an in-memory database (tests, ephemeral sessions).
    fn in_memory() -> Result<Self, LedgerError> {
        let conn = Connection::open_in_memory().map_err(|e| {
            LedgerError::PersistenceError(format!("failed to open in-memory queue db: {e}"))
        })?;
        Self::init(conn, None)
    }

    fn init(conn: Connection, path: Option<&Path>) -> Result<Self, LedgerError> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )
        .map_err(|e| LedgerError::PersistenceError(format!("failed to set pragmas: {e}")))?;

        if let Some(path) = path {
            info!(path = %path.display(), "event queue opened");
        }

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(run_migrations)?;
        Ok(db)
    }

    /// Executes a closure with exclusive access to the connection.
    fn with_conn<F, T>(&self, f: F) -> Result<T, LedgerError>
    where
        F: FnOnce(&mut Connection) -> Result<T, LedgerError>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| LedgerError::PersistenceError(format!("queue lock poisoned: {e}")))?;
        f(&mut conn)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish()
    }
}

/// Runs all pending schema migrations.
fn run_migrations(conn: &mut Connection) -> Result<(), LedgerError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| LedgerError::PersistenceError(format!("failed to create migrations table: {e}")))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| LedgerError::PersistenceError(format!("failed to query version: {e}")))?;

    if current_version < 1 {
        apply_v1(conn)?;
        debug!("applied queue migration v1: initial_schema");
    }

    Ok(())
}

/// Version 1: the savings queue.
fn apply_v1(conn: &Connection) -> Result<(), LedgerError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS savings_queue (
            fingerprint        TEXT PRIMARY KEY NOT NULL,
            coupon_id          TEXT NOT NULL,
            code               TEXT NOT NULL,
            store_id           TEXT NOT NULL,
            captured_at        INTEGER NOT NULL,
            amount_saved_cents INTEGER,
            state              TEXT NOT NULL DEFAULT 'pending'
                               CHECK (state IN ('pending', 'in_flight', 'committed',
                                                'failed', 'dead_lettered')),
            attempts           INTEGER NOT NULL DEFAULT 0,
            enqueued_at        INTEGER NOT NULL,
            inflight_at        INTEGER,
            next_attempt_at    INTEGER,
            committed_at       INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_savings_queue_state
            ON savings_queue (state, captured_at ASC);

        INSERT INTO schema_migrations (version, name) VALUES (1, 'initial_schema');
        ",
    )
    .map_err(|e| LedgerError::PersistenceError(format!("failed to apply v1: {e}")))
}

/// SQLite-backed [`EventStore`].
#[derive(Debug)]
pub struct SqliteEventStore {
    db: Database,
    config: QueueConfig,
}

impl SqliteEventStore {
    /// Opens (or creates) the queue at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::PersistenceError`] if the database cannot be
    /// opened or migrated.
    pub fn open(path: &Path, config: QueueConfig) -> Result<Self, LedgerError> {
        Ok(Self {
            db: Database::open(path)?,
            config,
        })
    }

    /// Opens an in-memory queue. State is lost when the store is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::PersistenceError`] if the database cannot be
    /// opened or migrated.
    pub fn in_memory(config: QueueConfig) -> Result<Self, LedgerError> {
        Ok(Self {
            db: Database::in_memory()?,
            config,
        })
    }

    /// Returns the queue tuning this store was opened with.
    #[must_use]
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }
}

#[async_trait]
impl EventStore for SqliteEventStore {
    async fn enqueue(&self, event: &SavingsEvent) -> Result<EnqueueOutcome, LedgerError> {
        let now_ms = Utc::now().timestamp_millis();
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "INSERT OR IGNORE INTO savings_queue
                     (fingerprint, coupon_id, code, store_id, captured_at,
                      amount_saved_cents, state, enqueued_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7)",
                    rusqlite::params![
                        event.fingerprint.as_str(),
                        event.coupon_id,
                        event.code,
                        event.store_id,
                        event.captured_at,
                        event.amount_saved_cents,
                        now_ms,
                    ],
                )
                .map_err(|e| LedgerError::PersistenceError(format!("enqueue failed: {e}")))?;

            if changed == 0 {
                Ok(EnqueueOutcome::Duplicate)
            } else {
                Ok(EnqueueOutcome::Accepted)
            }
        })
    }

    async fn next_batch(&self, max_size: usize, now: DateTime<Utc>) -> Result<Batch, LedgerError> {
        let now_ms = now.timestamp_millis();
        let stale_cutoff_ms = now_ms - duration_ms(self.config.staleness_timeout);

        self.db.with_conn(|conn| {
            let tx = conn
                .transaction()
                .map_err(|e| LedgerError::PersistenceError(e.to_string()))?;

            // Reclaim abandoned leases before selecting.
            let reclaimed = tx
                .execute(
                    "UPDATE savings_queue SET state = 'pending', inflight_at = NULL
                     WHERE state = 'in_flight' AND inflight_at <= ?1",
                    rusqlite::params![stale_cutoff_ms],
                )
                .map_err(|e| LedgerError::PersistenceError(format!("reclaim failed: {e}")))?;
            if reclaimed > 0 {
                warn!(reclaimed, "reclaimed stale in-flight events");
            }

            let events = {
                let mut stmt = tx
                    .prepare(
                        "SELECT fingerprint, coupon_id, code, store_id, captured_at,
                                amount_saved_cents
                         FROM savings_queue
                         WHERE state IN ('pending', 'failed')
                           AND (next_attempt_at IS NULL OR next_attempt_at <= ?1)
                         ORDER BY captured_at ASC
                         LIMIT ?2",
                    )
                    .map_err(|e| LedgerError::PersistenceError(e.to_string()))?;

                let rows = stmt
                    .query_map(rusqlite::params![now_ms, max_size as i64], |row| {
                        Ok(SavingsEvent {
                            fingerprint: Fingerprint::from_hex(row.get::<_, String>(0)?),
                            coupon_id: row.get(1)?,
                            code: row.get(2)?,
                            store_id: row.get(3)?,
                            captured_at: row.get(4)?,
                            amount_saved_cents: row.get(5)?,
                        })
                    })
                    .map_err(|e| LedgerError::PersistenceError(e.to_string()))?;

                let mut events = Vec::new();
                for row in rows {
                    events.push(row.map_err(|e| LedgerError::PersistenceError(e.to_string()))?);
                }
                events
            };

            for event in &events {
                tx.execute(
                    "UPDATE savings_queue SET state = 'in_flight', inflight_at = ?1
                     WHERE fingerprint = ?2",
                    rusqlite::params![now_ms, event.fingerprint.as_str()],
                )
                .map_err(|e| LedgerError::PersistenceError(format!("lease failed: {e}")))?;
            }

            tx.commit()
                .map_err(|e| LedgerError::PersistenceError(e.to_string()))?;

            Ok(Batch::new(events))
        })
    }

    async fn mark_committed(
        &self,
        fingerprints: &[Fingerprint],
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        let now_ms = now.timestamp_millis();
        self.db.with_conn(|conn| {
            let tx = conn
                .transaction()
                .map_err(|e| LedgerError::PersistenceError(e.to_string()))?;
            for fingerprint in fingerprints {
                tx.execute(
                    "UPDATE savings_queue
                     SET state = 'committed', committed_at = ?1,
                         inflight_at = NULL, next_attempt_at = NULL
                     WHERE fingerprint = ?2 AND state != 'dead_lettered'",
                    rusqlite::params![now_ms, fingerprint.as_str()],
                )
                .map_err(|e| LedgerError::PersistenceError(format!("commit failed: {e}")))?;
            }
            tx.commit()
                .map_err(|e| LedgerError::PersistenceError(e.to_string()))
        })
    }

    async fn mark_failed(
        &self,
        fingerprints: &[Fingerprint],
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        let now_ms = now.timestamp_millis();
        let max_attempts = self.config.max_attempts;
        let backoff_base_ms = duration_ms(self.config.backoff_base);

        self.db.with_conn(|conn| {
            let tx = conn
                .transaction()
                .map_err(|e| LedgerError::PersistenceError(e.to_string()))?;
            for fingerprint in fingerprints {
                let attempts: Option<u32> = tx
                    .query_row(
                        "SELECT attempts FROM savings_queue
                         WHERE fingerprint = ?1
                           AND state NOT IN ('committed', 'dead_lettered')",
                        rusqlite::params![fingerprint.as_str()],
                        |row| row.get(0),
                    )
                    .optional()
                    .map_err(|e| LedgerError::PersistenceError(e.to_string()))?;

                let Some(attempts) = attempts else {
                    continue;
                };
                let attempts_now = attempts.saturating_add(1);

                if attempts_now >= max_attempts {
                    tx.execute(
                        "UPDATE savings_queue
                         SET state = 'dead_lettered', attempts = ?1,
                             inflight_at = NULL, next_attempt_at = NULL
                         WHERE fingerprint = ?2",
                        rusqlite::params![attempts_now, fingerprint.as_str()],
                    )
                    .map_err(|e| LedgerError::PersistenceError(e.to_string()))?;
                    warn!(fingerprint = %fingerprint, attempts = attempts_now, "event dead-lettered");
                } else {
                    // Doubling backoff: 1st rejection waits base, 2nd 2x, ...
                    let shift = attempts.min(20);
                    let delay_ms = backoff_base_ms.saturating_mul(1_i64 << shift);
                    tx.execute(
                        "UPDATE savings_queue
                         SET state = 'failed', attempts = ?1,
                             inflight_at = NULL, next_attempt_at = ?2
                         WHERE fingerprint = ?3",
                        rusqlite::params![
                            attempts_now,
                            now_ms.saturating_add(delay_ms),
                            fingerprint.as_str()
                        ],
                    )
                    .map_err(|e| LedgerError::PersistenceError(e.to_string()))?;
                }
            }
            tx.commit()
                .map_err(|e| LedgerError::PersistenceError(e.to_string()))
        })
    }

    async fn release(&self, fingerprints: &[Fingerprint]) -> Result<(), LedgerError> {
        self.db.with_conn(|conn| {
            let tx = conn
                .transaction()
                .map_err(|e| LedgerError::PersistenceError(e.to_string()))?;
            for fingerprint in fingerprints {
                tx.execute(
                    "UPDATE savings_queue SET state = 'pending', inflight_at = NULL
                     WHERE fingerprint = ?1 AND state = 'in_flight'",
                    rusqlite::params![fingerprint.as_str()],
                )
                .map_err(|e| LedgerError::PersistenceError(format!("release failed: {e}")))?;
            }
            tx.commit()
                .map_err(|e| LedgerError::PersistenceError(e.to_string()))
        })
    }

    async fn gc_committed(
        &self,
        retention: Duration,
        now: DateTime<Utc>,
    ) -> Result<u64, LedgerError> {
        let cutoff_ms = now.timestamp_millis() - duration_ms(retention);
        self.db.with_conn(|conn| {
            let removed = conn
                .execute(
                    "DELETE FROM savings_queue
                     WHERE state = 'committed' AND committed_at <= ?1",
                    rusqlite::params![cutoff_ms],
                )
                .map_err(|e| LedgerError::PersistenceError(format!("gc failed: {e}")))?;
            Ok(removed as u64)
        })
    }

    async fn counts(&self) -> Result<StoreCounts, LedgerError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT state, COUNT(*) FROM savings_queue GROUP BY state")
                .map_err(|e| LedgerError::PersistenceError(e.to_string()))?;

            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })
                .map_err(|e| LedgerError::PersistenceError(e.to_string()))?;

            let mut counts = StoreCounts::default();
            for row in rows {
                let (state, count) =
                    row.map_err(|e| LedgerError::PersistenceError(e.to_string()))?;
                let count = count.max(0) as u64;
                match state.as_str() {
                    "pending" => counts.pending = count,
                    "in_flight" => counts.in_flight = count,
                    "committed" => counts.committed = count,
                    "failed" => counts.failed = count,
                    "dead_lettered" => counts.dead_lettered = count,
                    _ => {}
                }
            }
            Ok(counts)
        })
    }

    async fn dead_lettered(&self) -> Result<Vec<QueuedEvent>, LedgerError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT fingerprint, coupon_id, code, store_id, captured_at,
                            amount_saved_cents, state, attempts, enqueued_at,
                            inflight_at, next_attempt_at, committed_at
                     FROM savings_queue
                     WHERE state = 'dead_lettered'
                     ORDER BY captured_at ASC",
                )
                .map_err(|e| LedgerError::PersistenceError(e.to_string()))?;

            let rows = stmt
                .query_map([], row_to_raw)
                .map_err(|e| LedgerError::PersistenceError(e.to_string()))?;

            let mut events = Vec::new();
            for row in rows {
                let raw = row.map_err(|e| LedgerError::PersistenceError(e.to_string()))?;
                events.push(raw_to_queued(raw)?);
            }
            Ok(events)
        })
    }

    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<QueuedEvent>, LedgerError> {
        self.db.with_conn(|conn| {
            let raw = conn
                .query_row(
                    "SELECT fingerprint, coupon_id, code, store_id, captured_at,
                            amount_saved_cents, state, attempts, enqueued_at,
                            inflight_at, next_attempt_at, committed_at
                     FROM savings_queue WHERE fingerprint = ?1",
                    rusqlite::params![fingerprint.as_str()],
                    row_to_raw,
                )
                .optional()
                .map_err(|e| LedgerError::PersistenceError(e.to_string()))?;

            raw.map(raw_to_queued).transpose()
        })
    }
}

/// Raw row tuple before sync-state and timestamp conversion.
type RawRow = (
    String,
    String,
    String,
    String,
    i64,
    Option<i64>,
    String,
    u32,
    i64,
    Option<i64>,
    Option<i64>,
    Option<i64>,
);

fn row_to_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
        row.get(11)?,
    ))
}

fn raw_to_queued(raw: RawRow) -> Result<QueuedEvent, LedgerError> {
    let (
        fingerprint,
        coupon_id,
        code,
        store_id,
        captured_at,
        amount_saved_cents,
        state,
        attempts,
        enqueued_at,
        inflight_at,
        next_attempt_at,
        committed_at,
    ) = raw;

    Ok(QueuedEvent {
        event: SavingsEvent {
            fingerprint: Fingerprint::from_hex(fingerprint),
            coupon_id,
            code,
            store_id,
            captured_at,
            amount_saved_cents,
        },
        state: SyncState::from_parts(&state, attempts)?,
        attempts,
        enqueued_at: millis_to_datetime(enqueued_at)?,
        inflight_at: inflight_at.map(millis_to_datetime).transpose()?,
        next_attempt_at: next_attempt_at.map(millis_to_datetime).transpose()?,
        committed_at: committed_at.map(millis_to_datetime).transpose()?,
    })
}

fn millis_to_datetime(ms: i64) -> Result<DateTime<Utc>, LedgerError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| LedgerError::PersistenceError(format!("invalid timestamp: {ms}")))
}

fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn make_event(tag: &str, captured_at: i64) -> SavingsEvent {
        SavingsEvent {
            fingerprint: Fingerprint::from_hex(format!("fp-{tag}")),
            coupon_id: "cpn-1".to_string(),
            code: "SAVE10".to_string(),
            store_id: "store-1".to_string(),
            captured_at,
            amount_saved_cents: Some(500),
        }
    }

    fn make_store() -> SqliteEventStore {
        let store = SqliteEventStore::in_memory(QueueConfig::default());
        let Ok(store) = store else {
            panic!("in-memory store failed");
        };
        store
    }

    #[tokio::test]
    async fn enqueue_then_duplicate() {
        let store = make_store();
        let event = make_event("a", 1_000);

        let first = store.enqueue(&event).await;
        assert!(matches!(first, Ok(EnqueueOutcome::Accepted)));

        let second = store.enqueue(&event).await;
        assert!(matches!(second, Ok(EnqueueOutcome::Duplicate)));
    }

    #[tokio::test]
    async fn enqueue_survives_reopen() {
        let dir = tempfile::tempdir();
        let Ok(dir) = dir else {
            panic!("tempdir failed");
        };
        let path = dir.path().join("queue.db");

        {
            let store = SqliteEventStore::open(&path, QueueConfig::default());
            let Ok(store) = store else {
                panic!("open failed");
            };
            let result = store.enqueue(&make_event("a", 1_000)).await;
            assert!(result.is_ok());
        }

        // Reopen: the pending event must still be there and batchable.
        let store = SqliteEventStore::open(&path, QueueConfig::default());
        let Ok(store) = store else {
            panic!("reopen failed");
        };
        let counts = store.counts().await;
        let Ok(counts) = counts else {
            panic!("counts failed");
        };
        assert_eq!(counts.pending, 1);

        let batch = store.next_batch(10, Utc::now()).await;
        let Ok(batch) = batch else {
            panic!("next_batch failed");
        };
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test]
    async fn next_batch_is_fifo_by_captured_at() {
        let store = make_store();
        // Enqueue newest first to prove ordering comes from captured_at.
        for (tag, at) in [("c", 3_000), ("a", 1_000), ("b", 2_000)] {
            let result = store.enqueue(&make_event(tag, at)).await;
            assert!(result.is_ok());
        }

        let batch = store.next_batch(2, Utc::now()).await;
        let Ok(batch) = batch else {
            panic!("next_batch failed");
        };
        let captured: Vec<i64> = batch.events().iter().map(|e| e.captured_at).collect();
        assert_eq!(captured, vec![1_000, 2_000]);
    }

    #[tokio::test]
    async fn leased_events_are_not_rebatched() {
        let store = make_store();
        let result = store.enqueue(&make_event("a", 1_000)).await;
        assert!(result.is_ok());

        let now = Utc::now();
        let first = store.next_batch(10, now).await;
        let Ok(first) = first else {
            panic!("next_batch failed");
        };
        assert_eq!(first.len(), 1);

        let second = store.next_batch(10, now).await;
        let Ok(second) = second else {
            panic!("next_batch failed");
        };
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn stale_inflight_is_reclaimed() {
        let store = make_store();
        let result = store.enqueue(&make_event("a", 1_000)).await;
        assert!(result.is_ok());

        let now = Utc::now();
        let leased = store.next_batch(10, now).await;
        let Ok(leased) = leased else {
            panic!("next_batch failed");
        };
        assert_eq!(leased.len(), 1);

        // Before the staleness timeout: still leased.
        let early = now + chrono::Duration::seconds(10);
        let batch = store.next_batch(10, early).await;
        let Ok(batch) = batch else {
            panic!("next_batch failed");
        };
        assert!(batch.is_empty());

        // Past the timeout: abandoned lease is reclaimed and re-batchable.
        let late = now + chrono::Duration::seconds(301);
        let batch = store.next_batch(10, late).await;
        let Ok(batch) = batch else {
            panic!("next_batch failed");
        };
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test]
    async fn partial_batch_outcomes() {
        let store = make_store();
        let committed = make_event("a", 1_000);
        let rejected = make_event("b", 2_000);
        let unknown = make_event("c", 3_000);
        for event in [&committed, &rejected, &unknown] {
            let result = store.enqueue(event).await;
            assert!(result.is_ok());
        }

        let now = Utc::now();
        let batch = store.next_batch(10, now).await;
        let Ok(batch) = batch else {
            panic!("next_batch failed");
        };
        assert_eq!(batch.len(), 3);

        let r = store
            .mark_committed(std::slice::from_ref(&committed.fingerprint), now)
            .await;
        assert!(r.is_ok());
        let r = store
            .mark_failed(std::slice::from_ref(&rejected.fingerprint), now)
            .await;
        assert!(r.is_ok());
        let r = store
            .release(std::slice::from_ref(&unknown.fingerprint))
            .await;
        assert!(r.is_ok());

        let row = store.get(&committed.fingerprint).await;
        let Ok(Some(row)) = row else {
            panic!("missing committed row");
        };
        assert_eq!(row.state, SyncState::Committed);

        let row = store.get(&rejected.fingerprint).await;
        let Ok(Some(row)) = row else {
            panic!("missing rejected row");
        };
        assert_eq!(row.state, SyncState::Failed { attempts: 1 });

        let row = store.get(&unknown.fingerprint).await;
        let Ok(Some(row)) = row else {
            panic!("missing released row");
        };
        assert_eq!(row.state, SyncState::Pending);
        assert_eq!(row.attempts, 0);
    }

    #[tokio::test]
    async fn failed_events_wait_out_backoff() {
        let store = make_store();
        let event = make_event("a", 1_000);
        let result = store.enqueue(&event).await;
        assert!(result.is_ok());

        let now = Utc::now();
        let _ = store.next_batch(10, now).await;
        let r = store
            .mark_failed(std::slice::from_ref(&event.fingerprint), now)
            .await;
        assert!(r.is_ok());

        // Backoff of 1s has not elapsed.
        let batch = store.next_batch(10, now).await;
        let Ok(batch) = batch else {
            panic!("next_batch failed");
        };
        assert!(batch.is_empty());

        // After 1s the event is retryable.
        let later = now + chrono::Duration::milliseconds(1_100);
        let batch = store.next_batch(10, later).await;
        let Ok(batch) = batch else {
            panic!("next_batch failed");
        };
        assert_eq!(batch.len(), 1);

        // Second rejection doubles the delay.
        let r = store
            .mark_failed(std::slice::from_ref(&event.fingerprint), later)
            .await;
        assert!(r.is_ok());
        let row = store.get(&event.fingerprint).await;
        let Ok(Some(row)) = row else {
            panic!("missing row");
        };
        let Some(next_attempt_at) = row.next_attempt_at else {
            panic!("expected backoff schedule");
        };
        let delay = next_attempt_at.timestamp_millis() - later.timestamp_millis();
        assert_eq!(delay, 2_000);
    }

    #[tokio::test]
    async fn dead_letter_after_max_attempts() {
        let store = make_store();
        let event = make_event("a", 1_000);
        let result = store.enqueue(&event).await;
        assert!(result.is_ok());

        let mut now = Utc::now();
        for _ in 0..5 {
            // Jump past any backoff so every round leases the event.
            now += chrono::Duration::seconds(60);
            let batch = store.next_batch(10, now).await;
            let Ok(batch) = batch else {
                panic!("next_batch failed");
            };
            assert_eq!(batch.len(), 1);
            let r = store
                .mark_failed(std::slice::from_ref(&event.fingerprint), now)
                .await;
            assert!(r.is_ok());
        }

        let row = store.get(&event.fingerprint).await;
        let Ok(Some(row)) = row else {
            panic!("missing row");
        };
        assert_eq!(row.state, SyncState::DeadLettered);
        assert_eq!(row.attempts, 5);

        // Permanently excluded from batching.
        now += chrono::Duration::days(1);
        let batch = store.next_batch(10, now).await;
        let Ok(batch) = batch else {
            panic!("next_batch failed");
        };
        assert!(batch.is_empty());

        let dead = store.dead_lettered().await;
        let Ok(dead) = dead else {
            panic!("dead_lettered failed");
        };
        assert_eq!(dead.len(), 1);
    }

    #[tokio::test]
    async fn gc_removes_old_committed_rows() {
        let store = make_store();
        let event = make_event("a", 1_000);
        let result = store.enqueue(&event).await;
        assert!(result.is_ok());

        let now = Utc::now();
        let _ = store.next_batch(10, now).await;
        let r = store
            .mark_committed(std::slice::from_ref(&event.fingerprint), now)
            .await;
        assert!(r.is_ok());

        // Within retention: kept (still deduplicating re-fires).
        let removed = store
            .gc_committed(Duration::from_secs(3_600), now)
            .await;
        assert_eq!(removed.ok(), Some(0));

        // Past retention: removed, and the fingerprint becomes enqueueable
        // again.
        let later = now + chrono::Duration::hours(2);
        let removed = store.gc_committed(Duration::from_secs(3_600), later).await;
        assert_eq!(removed.ok(), Some(1));

        let again = store.enqueue(&event).await;
        assert!(matches!(again, Ok(EnqueueOutcome::Accepted)));
    }

    #[tokio::test]
    async fn counts_by_state() {
        let store = make_store();
        for (tag, at) in [("a", 1_000), ("b", 2_000), ("c", 3_000)] {
            let result = store.enqueue(&make_event(tag, at)).await;
            assert!(result.is_ok());
        }

        let now = Utc::now();
        let batch = store.next_batch(1, now).await;
        let Ok(batch) = batch else {
            panic!("next_batch failed");
        };
        assert_eq!(batch.len(), 1);

        let counts = store.counts().await;
        let Ok(counts) = counts else {
            panic!("counts failed");
        };
        assert_eq!(counts.pending, 2);
        assert_eq!(counts.in_flight, 1);
        assert_eq!(counts.committed, 0);
    }
}
