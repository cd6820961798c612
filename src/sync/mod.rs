//! Sync engine: drains the local queue into the ingestion endpoint.
//!
//! Runs on a recurring interval and on demand (e.g. network-reconnect).
//! Each pass leases batches from the [`EventStore`], ships them through an
//! [`IngestTransport`], and applies the per-event verdicts: commit, fail
//! toward dead-letter, or release when the outcome is unknown. A batch is
//! not atomic — partial success is the normal case.

pub mod transport;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::domain::{EventOutcome, Fingerprint, UserId};
use crate::error::LedgerError;
use crate::store::EventStore;

pub use transport::{HttpIngestTransport, IngestTransport};

/// Tuning for the sync engine.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Maximum events per outbound batch.
    pub batch_size: usize,
    /// Delay between scheduled sync passes.
    pub interval: Duration,
    /// How long committed rows stay in the local queue for dedup before GC.
    pub retention: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            interval: Duration::from_secs(30),
            retention: Duration::from_secs(24 * 3600),
        }
    }
}

impl SyncConfig {
    /// Sets the maximum batch size.
    #[must_use]
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Sets the scheduled pass interval.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets the committed-row retention window.
    #[must_use]
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }
}

/// Counters for one sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    /// Batches shipped (including ones that got no verdict).
    pub batches: u32,
    /// Events acknowledged by the backend.
    pub committed: u64,
    /// Events rejected (attempt recorded).
    pub failed: u64,
    /// Events released with unknown outcome (no attempt penalty).
    pub released: u64,
    /// Committed rows garbage-collected after retention.
    pub gc_removed: u64,
}

/// Drains the local queue into the backend on a schedule.
#[derive(Debug)]
pub struct SyncEngine {
    store: Arc<dyn EventStore>,
    transport: Arc<dyn IngestTransport>,
    user_id: UserId,
    config: SyncConfig,
}

impl SyncEngine {
    /// Creates an engine over the given store and transport.
    #[must_use]
    pub fn new(
        store: Arc<dyn EventStore>,
        transport: Arc<dyn IngestTransport>,
        user_id: UserId,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            transport,
            user_id,
            config,
        }
    }

    /// Runs one full drain pass at the given instant.
    ///
    /// Keeps leasing batches until the queue has nothing batchable. Stops
    /// early when a send yields no verdict (endpoint unreachable) or an
    /// incomplete one — the released events wait for the next pass, and
    /// the stale-lease reclaim covers a crash between lease and verdict.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::PersistenceError`] if the local queue fails;
    /// transport failures are absorbed into the stats, not errors.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<DrainStats, LedgerError> {
        let mut stats = DrainStats::default();

        loop {
            let batch = self.store.next_batch(self.config.batch_size, now).await?;
            if batch.is_empty() {
                break;
            }
            stats.batches = stats.batches.saturating_add(1);

            match self.transport.send(self.user_id, batch.events()).await {
                Ok(results) => {
                    let verdicts: HashMap<&str, &EventOutcome> = results
                        .iter()
                        .map(|r| (r.fingerprint.as_str(), &r.outcome))
                        .collect();

                    let mut committed: Vec<Fingerprint> = Vec::new();
                    let mut failed: Vec<Fingerprint> = Vec::new();
                    let mut released: Vec<Fingerprint> = Vec::new();

                    for event in batch.events() {
                        match verdicts.get(event.fingerprint.as_str()) {
                            Some(EventOutcome::Committed | EventOutcome::AlreadyCommitted) => {
                                committed.push(event.fingerprint.clone());
                            }
                            Some(EventOutcome::Rejected { reason }) => {
                                debug!(
                                    fingerprint = %event.fingerprint,
                                    reason,
                                    "event rejected by backend"
                                );
                                failed.push(event.fingerprint.clone());
                            }
                            None => released.push(event.fingerprint.clone()),
                        }
                    }

                    if !committed.is_empty() {
                        self.store.mark_committed(&committed, now).await?;
                        stats.committed = stats.committed.saturating_add(committed.len() as u64);
                    }
                    if !failed.is_empty() {
                        self.store.mark_failed(&failed, now).await?;
                        stats.failed = stats.failed.saturating_add(failed.len() as u64);
                    }
                    if !released.is_empty() {
                        warn!(
                            count = released.len(),
                            "verdict missing for some events; releasing"
                        );
                        self.store.release(&released).await?;
                        stats.released = stats.released.saturating_add(released.len() as u64);
                        break;
                    }
                }
                Err(err) => {
                    // No verdict for the whole batch: outcome unknown for
                    // every event, so no attempt is charged.
                    warn!(%err, count = batch.len(), "batch send failed; releasing");
                    self.store.release(&batch.fingerprints()).await?;
                    stats.released = stats.released.saturating_add(batch.len() as u64);
                    break;
                }
            }
        }

        stats.gc_removed = self.store.gc_committed(self.config.retention, now).await?;

        Ok(stats)
    }

    /// Spawns the recurring sync loop and returns its control handle.
    ///
    /// The first pass runs immediately, which doubles as restart recovery
    /// for events left over from a previous session.
    #[must_use]
    pub fn start(self) -> SyncHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let (trigger_tx, mut trigger_rx) = mpsc::channel::<()>(8);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(
                interval_secs = self.config.interval.as_secs(),
                batch_size = self.config.batch_size,
                "sync engine started"
            );

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("sync engine shutting down");
                        break;
                    }
                    _ = ticker.tick() => {}
                    triggered = trigger_rx.recv() => {
                        if triggered.is_none() {
                            break;
                        }
                        debug!("sync pass triggered on demand");
                    }
                }

                match self.run_once(Utc::now()).await {
                    Ok(stats) if stats.batches > 0 => {
                        debug!(
                            committed = stats.committed,
                            failed = stats.failed,
                            released = stats.released,
                            "sync pass finished"
                        );
                    }
                    Ok(_) => {}
                    Err(err) => warn!(%err, "sync pass failed"),
                }
            }
        });

        SyncHandle {
            trigger_tx,
            shutdown_tx,
        }
    }
}

/// Handle for controlling a running sync engine.
#[derive(Debug, Clone)]
pub struct SyncHandle {
    trigger_tx: mpsc::Sender<()>,
    shutdown_tx: mpsc::Sender<()>,
}

impl SyncHandle {
    /// Requests an immediate sync pass (e.g. on network-reconnect).
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Internal`] if the engine task is gone.
    pub async fn trigger(&self) -> Result<(), LedgerError> {
        self.trigger_tx
            .send(())
            .await
            .map_err(|_| LedgerError::Internal("sync engine not running".to_string()))
    }

    /// Signals the engine to stop after the current pass.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Internal`] if the engine task is gone.
    pub async fn shutdown(&self) -> Result<(), LedgerError> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| LedgerError::Internal("sync engine not running".to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use crate::domain::{PerEventResult, SavingsEvent, SyncState};
    use crate::store::{QueueConfig, SqliteEventStore};

    /// One scripted reply for the fake transport.
    enum Reply {
        /// Per-event verdicts aligned by batch index; `None` omits the
        /// event from the response entirely.
        Verdicts(Vec<Option<EventOutcome>>),
        /// Simulated network outage: no response at all.
        Offline,
    }

    /// Transport that replays a script, committing everything once the
    /// script is exhausted.
    struct ScriptedTransport {
        script: Mutex<VecDeque<Reply>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Reply>) -> Self {
            Self {
                script: Mutex::new(script.into_iter().collect()),
            }
        }
    }

    impl std::fmt::Debug for ScriptedTransport {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("ScriptedTransport").finish()
        }
    }

    #[async_trait]
    impl IngestTransport for ScriptedTransport {
        async fn send(
            &self,
            _user_id: UserId,
            events: &[SavingsEvent],
        ) -> Result<Vec<PerEventResult>, LedgerError> {
            let reply = {
                let mut script = self.script.lock().unwrap_or_else(|e| e.into_inner());
                script.pop_front()
            };
            match reply {
                None => Ok(events
                    .iter()
                    .map(|e| PerEventResult {
                        fingerprint: e.fingerprint.clone(),
                        outcome: EventOutcome::Committed,
                    })
                    .collect()),
                Some(Reply::Offline) => {
                    Err(LedgerError::Transport("connection refused".to_string()))
                }
                Some(Reply::Verdicts(verdicts)) => Ok(events
                    .iter()
                    .zip(verdicts)
                    .filter_map(|(event, outcome)| {
                        outcome.map(|outcome| PerEventResult {
                            fingerprint: event.fingerprint.clone(),
                            outcome,
                        })
                    })
                    .collect()),
            }
        }
    }

    fn make_event(tag: &str, captured_at: i64) -> SavingsEvent {
        SavingsEvent {
            fingerprint: crate::domain::Fingerprint::from_hex(format!("fp-{tag}")),
            coupon_id: "cpn-1".to_string(),
            code: "SAVE10".to_string(),
            store_id: "store-1".to_string(),
            captured_at,
            amount_saved_cents: Some(500),
        }
    }

    fn make_store() -> Arc<SqliteEventStore> {
        let store = SqliteEventStore::in_memory(QueueConfig::default());
        let Ok(store) = store else {
            panic!("store failed");
        };
        Arc::new(store)
    }

    fn make_engine(store: Arc<SqliteEventStore>, script: Vec<Reply>) -> SyncEngine {
        SyncEngine::new(
            store,
            Arc::new(ScriptedTransport::new(script)),
            UserId::new(),
            SyncConfig::default().with_batch_size(8),
        )
    }

    #[tokio::test]
    async fn empty_queue_is_a_noop() {
        let store = make_store();
        let engine = make_engine(Arc::clone(&store), vec![]);

        let stats = engine.run_once(Utc::now()).await;
        let Ok(stats) = stats else {
            panic!("run_once failed");
        };
        assert_eq!(stats, DrainStats::default());
    }

    #[tokio::test]
    async fn drain_commits_everything() {
        let store = make_store();
        for (tag, at) in [("a", 1_000), ("b", 2_000), ("c", 3_000)] {
            let r = store.enqueue(&make_event(tag, at)).await;
            assert!(r.is_ok());
        }
        let engine = make_engine(Arc::clone(&store), vec![]);

        let stats = engine.run_once(Utc::now()).await;
        let Ok(stats) = stats else {
            panic!("run_once failed");
        };
        assert_eq!(stats.committed, 3);
        assert_eq!(stats.failed, 0);

        let counts = store.counts().await;
        let Ok(counts) = counts else {
            panic!("counts failed");
        };
        assert_eq!(counts.committed, 3);
        assert_eq!(counts.pending, 0);
    }

    #[tokio::test]
    async fn partial_batch_applies_per_event_verdicts() {
        let store = make_store();
        let a = make_event("a", 1_000);
        let b = make_event("b", 2_000);
        let c = make_event("c", 3_000);
        for event in [&a, &b, &c] {
            let r = store.enqueue(event).await;
            assert!(r.is_ok());
        }

        // Committed, rejected, and no verdict at all for the third.
        let engine = make_engine(
            Arc::clone(&store),
            vec![Reply::Verdicts(vec![
                Some(EventOutcome::Committed),
                Some(EventOutcome::Rejected {
                    reason: "schema mismatch".to_string(),
                }),
                None,
            ])],
        );

        let stats = engine.run_once(Utc::now()).await;
        let Ok(stats) = stats else {
            panic!("run_once failed");
        };
        assert_eq!(stats.committed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.released, 1);

        let row = store.get(&a.fingerprint).await;
        let Ok(Some(row)) = row else {
            panic!("missing row a");
        };
        assert_eq!(row.state, SyncState::Committed);

        let row = store.get(&b.fingerprint).await;
        let Ok(Some(row)) = row else {
            panic!("missing row b");
        };
        assert_eq!(row.state, SyncState::Failed { attempts: 1 });

        let row = store.get(&c.fingerprint).await;
        let Ok(Some(row)) = row else {
            panic!("missing row c");
        };
        assert_eq!(row.state, SyncState::Pending);
        assert_eq!(row.attempts, 0);
    }

    #[tokio::test]
    async fn outage_releases_whole_batch_without_penalty() {
        let store = make_store();
        for (tag, at) in [("a", 1_000), ("b", 2_000)] {
            let r = store.enqueue(&make_event(tag, at)).await;
            assert!(r.is_ok());
        }
        let engine = make_engine(Arc::clone(&store), vec![Reply::Offline]);

        let stats = engine.run_once(Utc::now()).await;
        let Ok(stats) = stats else {
            panic!("run_once failed");
        };
        assert_eq!(stats.released, 2);
        assert_eq!(stats.committed, 0);
        assert_eq!(stats.failed, 0);

        let counts = store.counts().await;
        let Ok(counts) = counts else {
            panic!("counts failed");
        };
        assert_eq!(counts.pending, 2);
        assert_eq!(counts.failed, 0);
    }

    #[tokio::test]
    async fn recovered_events_commit_on_next_pass() {
        let store = make_store();
        let r = store.enqueue(&make_event("a", 1_000)).await;
        assert!(r.is_ok());

        let engine = make_engine(Arc::clone(&store), vec![Reply::Offline]);
        let now = Utc::now();

        let stats = engine.run_once(now).await;
        let Ok(stats) = stats else {
            panic!("run_once failed");
        };
        assert_eq!(stats.released, 1);

        // Next scheduled pass: the script is exhausted, transport commits.
        let stats = engine.run_once(now + chrono::Duration::seconds(30)).await;
        let Ok(stats) = stats else {
            panic!("run_once failed");
        };
        assert_eq!(stats.committed, 1);
    }

    #[tokio::test]
    async fn drain_spans_multiple_batches() {
        let store = make_store();
        for i in 0..20_i64 {
            let r = store.enqueue(&make_event(&format!("e{i}"), 1_000 + i)).await;
            assert!(r.is_ok());
        }
        let engine = make_engine(Arc::clone(&store), vec![]);

        let stats = engine.run_once(Utc::now()).await;
        let Ok(stats) = stats else {
            panic!("run_once failed");
        };
        assert_eq!(stats.committed, 20);
        assert_eq!(stats.batches, 3); // batch_size 8 -> 8 + 8 + 4
    }

    #[tokio::test]
    async fn gc_runs_after_drain() {
        let store = make_store();
        let r = store.enqueue(&make_event("a", 1_000)).await;
        assert!(r.is_ok());

        let engine = SyncEngine::new(
            Arc::clone(&store) as Arc<dyn EventStore>,
            Arc::new(ScriptedTransport::new(vec![])),
            UserId::new(),
            SyncConfig::default().with_retention(Duration::from_secs(60)),
        );

        let now = Utc::now();
        let stats = engine.run_once(now).await;
        let Ok(stats) = stats else {
            panic!("run_once failed");
        };
        assert_eq!(stats.committed, 1);
        assert_eq!(stats.gc_removed, 0);

        let stats = engine.run_once(now + chrono::Duration::seconds(120)).await;
        let Ok(stats) = stats else {
            panic!("run_once failed");
        };
        assert_eq!(stats.gc_removed, 1);
    }

    #[tokio::test]
    async fn handle_trigger_and_shutdown() {
        let store = make_store();
        let engine = SyncEngine::new(
            store,
            Arc::new(ScriptedTransport::new(vec![])),
            UserId::new(),
            SyncConfig::default().with_interval(Duration::from_secs(3600)),
        );

        let handle = engine.start();
        let triggered = handle.trigger().await;
        assert!(triggered.is_ok());

        let shutdown = handle.shutdown().await;
        assert!(shutdown.is_ok());
    }
}
