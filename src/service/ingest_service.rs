//! Ingest service: commits savings events and folds user aggregates.
//!
//! The exactly-once enforcement point. Every event in a batch gets an
//! individual verdict; a fingerprint is folded into its user's aggregate
//! at most once no matter how many times the client (re)sends it. All
//! mutation for one user happens under that user's registry write lock,
//! so concurrent batches (retries racing a later send) serialize here.

use std::sync::Arc;

use chrono::Utc;

use crate::domain::{
    AggregateRegistry, EventBus, EventOutcome, Fingerprint, LedgerEvent, PerEventResult,
    SavingsEvent, UserAggregate, UserId,
};
use crate::error::LedgerError;
use crate::persistence::PostgresLedger;

/// Orchestration layer for ingestion and aggregate queries.
///
/// Stateless coordinator: owns references to the [`AggregateRegistry`] for
/// state, the [`EventBus`] for event emission, and optionally the
/// [`PostgresLedger`] for durability. Every commit follows the pattern:
/// acquire user lock → fold a copy → persist → install → emit events.
#[derive(Debug, Clone)]
pub struct IngestService {
    registry: Arc<AggregateRegistry>,
    event_bus: EventBus,
    ledger: Option<Arc<PostgresLedger>>,
}

impl IngestService {
    /// Creates a new `IngestService`.
    #[must_use]
    pub fn new(
        registry: Arc<AggregateRegistry>,
        event_bus: EventBus,
        ledger: Option<Arc<PostgresLedger>>,
    ) -> Self {
        Self {
            registry,
            event_bus,
            ledger,
        }
    }

    /// Returns a reference to the inner [`EventBus`].
    #[must_use]
    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Returns a reference to the inner [`AggregateRegistry`].
    #[must_use]
    pub fn registry(&self) -> &Arc<AggregateRegistry> {
        &self.registry
    }

    /// Ingests a batch for one user, returning per-event verdicts in
    /// request order.
    ///
    /// Holding the user's write lock across the batch serializes
    /// concurrent ingests for the same user; other users are unaffected.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::PersistenceError`] if the durable write
    /// fails — the client treats that as an unknown outcome and re-sends,
    /// which lands on `AlreadyCommitted` for anything already folded.
    pub async fn ingest(
        &self,
        user_id: UserId,
        events: &[SavingsEvent],
    ) -> Result<Vec<PerEventResult>, LedgerError> {
        let entry_lock = self.registry.entry(user_id).await;
        let mut entry = entry_lock.write().await;

        let mut results = Vec::with_capacity(events.len());
        for event in events {
            if let Err(reason) = validate_event(event) {
                results.push(PerEventResult {
                    fingerprint: event.fingerprint.clone(),
                    outcome: EventOutcome::Rejected { reason },
                });
                continue;
            }

            if entry.is_committed(&event.fingerprint) {
                results.push(PerEventResult {
                    fingerprint: event.fingerprint.clone(),
                    outcome: EventOutcome::AlreadyCommitted,
                });
                continue;
            }

            let now = Utc::now();
            let mut updated = entry.aggregate.clone();
            updated.apply(event, now);

            if let Some(ledger) = &self.ledger {
                ledger.record_committed(user_id, event, &updated).await?;
            }
            entry.install_commit(event, updated);

            let _ = self.event_bus.publish(LedgerEvent::EventCommitted {
                user_id,
                fingerprint: event.fingerprint.clone(),
                store_id: event.store_id.clone(),
                code: event.code.clone(),
                amount_saved_cents: event.amount_saved_cents,
                timestamp: now,
            });
            let _ = self.event_bus.publish(LedgerEvent::AggregateUpdated {
                user_id,
                total_saved_cents: entry.aggregate.total_saved_cents,
                coupons_used_count: entry.aggregate.coupons_used_count,
                timestamp: now,
            });

            results.push(PerEventResult {
                fingerprint: event.fingerprint.clone(),
                outcome: EventOutcome::Committed,
            });
        }

        tracing::info!(
            %user_id,
            batch = events.len(),
            committed = results
                .iter()
                .filter(|r| r.outcome == EventOutcome::Committed)
                .count(),
            "batch ingested"
        );

        Ok(results)
    }

    /// Fills in or corrects the savings amount of a committed event,
    /// adjusting the aggregate by the delta.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidRequest`] for negative amounts,
    /// [`LedgerError::UserNotFound`] for unknown users,
    /// [`LedgerError::EventNotFound`] for fingerprints never committed,
    /// and [`LedgerError::PersistenceError`] if the durable write fails.
    pub async fn amend_amount(
        &self,
        user_id: UserId,
        fingerprint: &Fingerprint,
        amount_saved_cents: i64,
    ) -> Result<UserAggregate, LedgerError> {
        if amount_saved_cents < 0 {
            return Err(LedgerError::InvalidRequest(format!(
                "negative amount_saved_cents: {amount_saved_cents}"
            )));
        }

        let entry_lock = self
            .registry
            .get(user_id)
            .await
            .ok_or_else(|| LedgerError::UserNotFound(*user_id.as_uuid()))?;
        let mut entry = entry_lock.write().await;

        let (store_id, delta_cents) = entry.amend_delta(fingerprint, amount_saved_cents)?;

        let now = Utc::now();
        let mut updated = entry.aggregate.clone();
        updated.amend(&store_id, delta_cents, now);

        if let Some(ledger) = &self.ledger {
            ledger
                .amend_committed(user_id, fingerprint, amount_saved_cents, &updated)
                .await?;
        }
        entry.install_amend(fingerprint, amount_saved_cents, updated.clone());

        let _ = self.event_bus.publish(LedgerEvent::AmountAmended {
            user_id,
            fingerprint: fingerprint.clone(),
            amount_saved_cents,
            delta_cents,
            timestamp: now,
        });
        let _ = self.event_bus.publish(LedgerEvent::AggregateUpdated {
            user_id,
            total_saved_cents: updated.total_saved_cents,
            coupons_used_count: updated.coupons_used_count,
            timestamp: now,
        });

        tracing::info!(%user_id, %fingerprint, delta_cents, "amount amended");

        Ok(updated)
    }

    /// Returns a committed-only snapshot of the user's aggregate.
    ///
    /// Users with no committed events get a zeroed aggregate — lazy
    /// creation without materializing registry entries.
    pub async fn aggregate(&self, user_id: UserId) -> UserAggregate {
        self.registry
            .snapshot(user_id)
            .await
            .unwrap_or_else(|| UserAggregate::new(user_id))
    }
}

/// Backend-side schema check for one batch event.
fn validate_event(event: &SavingsEvent) -> Result<(), String> {
    if event.fingerprint.is_empty() {
        return Err("missing fingerprint".to_string());
    }
    if event.store_id.trim().is_empty() {
        return Err("missing store_id".to_string());
    }
    if event.code.trim().is_empty() {
        return Err("missing code".to_string());
    }
    if event.captured_at <= 0 {
        return Err(format!("non-positive captured_at: {}", event.captured_at));
    }
    if let Some(amount) = event.amount_saved_cents
        && amount < 0
    {
        return Err(format!("negative amount_saved_cents: {amount}"));
    }
    Ok(())
}
