//! Local Event Store: the client-side durable queue of pending events.
//!
//! This is the durability boundary protecting against event loss when the
//! extension process is terminated mid-flight. Events enter as `Pending`,
//! are leased to outbound batches as `InFlight`, and leave as `Committed`
//! (garbage-collected after a retention window) or `DeadLettered`.

pub mod sqlite;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{Fingerprint, SavingsEvent, SyncState};
use crate::error::LedgerError;

pub use sqlite::SqliteEventStore;

/// Result of an enqueue attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// The event was new and persisted as `Pending`.
    Accepted,
    /// An entry with the same fingerprint already exists; no-op.
    Duplicate,
}

/// One row of the local queue: the event plus its sync bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedEvent {
    /// The canonical event.
    pub event: SavingsEvent,
    /// Current sync lifecycle state.
    pub state: SyncState,
    /// Rejection count so far.
    pub attempts: u32,
    /// When the event entered the queue.
    pub enqueued_at: DateTime<Utc>,
    /// When the event was last leased to a batch.
    pub inflight_at: Option<DateTime<Utc>>,
    /// Earliest time the next retry may be batched.
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// When the backend acknowledged the event.
    pub committed_at: Option<DateTime<Utc>>,
}

/// Per-state row counts, surfaced for diagnostics.
///
/// A non-zero `dead_lettered` count is the client's visible (non-fatal)
/// signal that the savings total undercounts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounts {
    /// Events waiting for a batch.
    pub pending: u64,
    /// Events leased to an outbound batch.
    pub in_flight: u64,
    /// Acknowledged events awaiting GC.
    pub committed: u64,
    /// Rejected events waiting out their backoff.
    pub failed: u64,
    /// Events excluded from retry forever.
    pub dead_lettered: u64,
}

/// Transient, ordered grouping of events leased for one send.
///
/// Never persisted — it is a view over queue rows that were flipped to
/// `InFlight` at lease time.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    events: Vec<SavingsEvent>,
}

impl Batch {
    /// Wraps leased events into a batch.
    #[must_use]
    pub fn new(events: Vec<SavingsEvent>) -> Self {
        Self { events }
    }

    /// The leased events, oldest capture first.
    #[must_use]
    pub fn events(&self) -> &[SavingsEvent] {
        &self.events
    }

    /// Fingerprints of all leased events.
    #[must_use]
    pub fn fingerprints(&self) -> Vec<Fingerprint> {
        self.events.iter().map(|e| e.fingerprint.clone()).collect()
    }

    /// Number of events in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns `true` if the batch holds no events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Tuning for the queue's lease and retry behavior.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// `InFlight` entries older than this are treated as abandoned and
    /// reclaimed to `Pending` (crash between lease and verdict).
    pub staleness_timeout: Duration,
    /// Rejections before an event is dead-lettered.
    pub max_attempts: u32,
    /// First retry delay; doubles per subsequent rejection.
    pub backoff_base: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            staleness_timeout: Duration::from_secs(300),
            max_attempts: 5,
            backoff_base: Duration::from_secs(1),
        }
    }
}

impl QueueConfig {
    /// Sets the staleness timeout.
    #[must_use]
    pub fn with_staleness_timeout(mut self, timeout: Duration) -> Self {
        self.staleness_timeout = timeout;
        self
    }

    /// Sets the attempt budget.
    #[must_use]
    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max;
        self
    }

    /// Sets the base backoff delay.
    #[must_use]
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }
}

/// Durable, fingerprint-keyed queue of savings events.
///
/// Time-dependent operations take `now` explicitly so that lease and
/// backoff behavior is deterministic under test.
#[async_trait]
pub trait EventStore: std::fmt::Debug + Send + Sync {
    /// Persists a new event as `Pending`, or reports a duplicate.
    ///
    /// Any live row with the same fingerprint — whatever its state —
    /// makes this a no-op returning [`EnqueueOutcome::Duplicate`].
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::PersistenceError`] on storage failure.
    async fn enqueue(&self, event: &SavingsEvent) -> Result<EnqueueOutcome, LedgerError>;

    /// Leases up to `max_size` batchable events, oldest capture first.
    ///
    /// Reclaims stale `InFlight` rows first, then selects `Pending` and
    /// backoff-elapsed `Failed` rows and flips them to `InFlight`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::PersistenceError`] on storage failure.
    async fn next_batch(&self, max_size: usize, now: DateTime<Utc>) -> Result<Batch, LedgerError>;

    /// Marks acknowledged events `Committed`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::PersistenceError`] on storage failure.
    async fn mark_committed(
        &self,
        fingerprints: &[Fingerprint],
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError>;

    /// Records a rejection for each event, scheduling the retry backoff;
    /// events exceeding the attempt budget become `DeadLettered`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::PersistenceError`] on storage failure.
    async fn mark_failed(
        &self,
        fingerprints: &[Fingerprint],
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError>;

    /// Reverts `InFlight` events to `Pending` without an attempt penalty.
    ///
    /// Used when a whole send produced no verdict (network outage) or a
    /// verdict omitted some events — their outcome is unknown, not failed.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::PersistenceError`] on storage failure.
    async fn release(&self, fingerprints: &[Fingerprint]) -> Result<(), LedgerError>;

    /// Deletes `Committed` rows older than the retention window, returning
    /// the number removed.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::PersistenceError`] on storage failure.
    async fn gc_committed(
        &self,
        retention: Duration,
        now: DateTime<Utc>,
    ) -> Result<u64, LedgerError>;

    /// Per-state row counts.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::PersistenceError`] on storage failure.
    async fn counts(&self) -> Result<StoreCounts, LedgerError>;

    /// All dead-lettered rows, retained for diagnostics.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::PersistenceError`] on storage failure.
    async fn dead_lettered(&self) -> Result<Vec<QueuedEvent>, LedgerError>;

    /// Looks up a single row by fingerprint.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::PersistenceError`] on storage failure.
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<QueuedEvent>, LedgerError>;
}
