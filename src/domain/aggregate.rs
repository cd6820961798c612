//! User savings aggregates and the commit bookkeeping behind them.
//!
//! A [`UserAggregate`] is the dashboard's source of truth: lifetime savings
//! total, coupons-used count, and a per-store breakdown. It only ever moves
//! forward — events are folded in exactly once and never un-applied. The
//! wrapping [`AggregateEntry`] tracks which fingerprints have been folded
//! (the exactly-once enforcement point) and the amount recorded for each,
//! which later amends need for delta arithmetic.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{Fingerprint, SavingsEvent, UserId};
use crate::error::LedgerError;

/// Per-merchant slice of a user's savings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct StoreStats {
    /// Coupons applied at this store.
    pub count: u64,
    /// Savings at this store in minor units.
    pub saved_cents: i64,
}

/// Rolling savings totals for one user.
///
/// Mutated only through [`UserAggregate::apply`] and
/// [`UserAggregate::amend`]; both are monotonic folds. Events with an
/// unknown amount still count toward `coupons_used_count` but contribute
/// nothing to `total_saved_cents` until amended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAggregate {
    /// Owning user.
    pub user_id: UserId,
    /// Lifetime savings in minor units.
    pub total_saved_cents: i64,
    /// Lifetime count of committed coupon applications.
    pub coupons_used_count: u64,
    /// Per-merchant breakdown keyed by store id.
    pub per_store: HashMap<String, StoreStats>,
    /// Timestamp of the last fold; `None` until the first committed event.
    pub last_updated_at: Option<DateTime<Utc>>,
}

impl UserAggregate {
    /// Creates a zeroed aggregate for a user with no committed events yet.
    #[must_use]
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            total_saved_cents: 0,
            coupons_used_count: 0,
            per_store: HashMap::new(),
            last_updated_at: None,
        }
    }

    /// Folds one committed event into the totals.
    pub fn apply(&mut self, event: &SavingsEvent, now: DateTime<Utc>) {
        let amount = event.amount_saved_cents.unwrap_or(0);
        self.coupons_used_count = self.coupons_used_count.saturating_add(1);
        self.total_saved_cents = self.total_saved_cents.saturating_add(amount);

        let stats = self.per_store.entry(event.store_id.clone()).or_default();
        stats.count = stats.count.saturating_add(1);
        stats.saved_cents = stats.saved_cents.saturating_add(amount);

        self.last_updated_at = Some(now);
    }

    /// Applies an amount correction for an already-folded event.
    ///
    /// `delta_cents` is the difference between the newly recorded amount
    /// and whatever was folded in before (zero for amount-less events).
    pub fn amend(&mut self, store_id: &str, delta_cents: i64, now: DateTime<Utc>) {
        self.total_saved_cents = self.total_saved_cents.saturating_add(delta_cents);

        let stats = self.per_store.entry(store_id.to_string()).or_default();
        stats.saved_cents = stats.saved_cents.saturating_add(delta_cents);

        self.last_updated_at = Some(now);
    }
}

/// Amount and store recorded for one committed fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    /// Merchant the event was committed for.
    pub store_id: String,
    /// Amount folded into the aggregate, if known.
    pub amount_saved_cents: Option<i64>,
}

/// A user's aggregate plus the committed-fingerprint ledger guarding it.
///
/// Owned exclusively by the [`super::AggregateRegistry`]; all mutation
/// happens under that registry's per-user write lock.
#[derive(Debug)]
pub struct AggregateEntry {
    /// The user-facing totals.
    pub aggregate: UserAggregate,
    committed: HashMap<Fingerprint, CommitRecord>,
}

impl AggregateEntry {
    /// Creates an empty entry for a user's first committed event.
    #[must_use]
    pub fn new(user_id: UserId) -> Self {
        Self {
            aggregate: UserAggregate::new(user_id),
            committed: HashMap::new(),
        }
    }

    /// Rebuilds an entry from persisted state at startup.
    #[must_use]
    pub fn restore(
        aggregate: UserAggregate,
        committed: HashMap<Fingerprint, CommitRecord>,
    ) -> Self {
        Self {
            aggregate,
            committed,
        }
    }

    /// Returns `true` if the fingerprint has already been folded.
    #[must_use]
    pub fn is_committed(&self, fingerprint: &Fingerprint) -> bool {
        self.committed.contains_key(fingerprint)
    }

    /// Returns the commit record for a fingerprint, if present.
    #[must_use]
    pub fn record(&self, fingerprint: &Fingerprint) -> Option<&CommitRecord> {
        self.committed.get(fingerprint)
    }

    /// Number of committed fingerprints tracked by this entry.
    #[must_use]
    pub fn committed_count(&self) -> usize {
        self.committed.len()
    }

    /// Installs a freshly folded aggregate and records the fingerprint.
    ///
    /// `updated` must be the result of applying `event` to the current
    /// aggregate; the split lets the caller persist the new state before
    /// the in-memory swap.
    pub fn install_commit(&mut self, event: &SavingsEvent, updated: UserAggregate) {
        self.committed.insert(
            event.fingerprint.clone(),
            CommitRecord {
                store_id: event.store_id.clone(),
                amount_saved_cents: event.amount_saved_cents,
            },
        );
        self.aggregate = updated;
    }

    /// Computes the aggregate delta for amending a committed event.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::EventNotFound`] if the fingerprint was never
    /// committed for this user.
    pub fn amend_delta(
        &self,
        fingerprint: &Fingerprint,
        amount_saved_cents: i64,
    ) -> Result<(String, i64), LedgerError> {
        let record = self
            .committed
            .get(fingerprint)
            .ok_or_else(|| LedgerError::EventNotFound(fingerprint.to_string()))?;
        let prior = record.amount_saved_cents.unwrap_or(0);
        Ok((
            record.store_id.clone(),
            amount_saved_cents.saturating_sub(prior),
        ))
    }

    /// Installs an amended aggregate and updates the recorded amount.
    pub fn install_amend(
        &mut self,
        fingerprint: &Fingerprint,
        amount_saved_cents: i64,
        updated: UserAggregate,
    ) {
        if let Some(record) = self.committed.get_mut(fingerprint) {
            record.amount_saved_cents = Some(amount_saved_cents);
        }
        self.aggregate = updated;
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn make_event(store_id: &str, amount: Option<i64>) -> SavingsEvent {
        SavingsEvent {
            fingerprint: Fingerprint::compute(
                store_id,
                "SAVE10",
                1_700_000_000_000 + amount.unwrap_or(0),
                "client-a",
                60_000,
            ),
            coupon_id: "cpn-1".to_string(),
            code: "SAVE10".to_string(),
            store_id: store_id.to_string(),
            captured_at: 1_700_000_000_000,
            amount_saved_cents: amount,
        }
    }

    #[test]
    fn apply_folds_amounts_and_counts() {
        let mut agg = UserAggregate::new(UserId::new());
        let now = Utc::now();

        agg.apply(&make_event("store-1", Some(500)), now);
        agg.apply(&make_event("store-1", Some(300)), now);
        agg.apply(&make_event("store-2", None), now);

        assert_eq!(agg.total_saved_cents, 800);
        assert_eq!(agg.coupons_used_count, 3);
        assert_eq!(
            agg.per_store.get("store-1"),
            Some(&StoreStats {
                count: 2,
                saved_cents: 800
            })
        );
        assert_eq!(
            agg.per_store.get("store-2"),
            Some(&StoreStats {
                count: 1,
                saved_cents: 0
            })
        );
        assert!(agg.last_updated_at.is_some());
    }

    #[test]
    fn amend_adjusts_total_and_store_bucket() {
        let mut agg = UserAggregate::new(UserId::new());
        let now = Utc::now();
        agg.apply(&make_event("store-1", None), now);
        assert_eq!(agg.total_saved_cents, 0);

        agg.amend("store-1", 450, now);
        assert_eq!(agg.total_saved_cents, 450);
        assert_eq!(
            agg.per_store.get("store-1").map(|s| s.saved_cents),
            Some(450)
        );
        // Count is untouched by amends.
        assert_eq!(agg.coupons_used_count, 1);
    }

    #[test]
    fn entry_tracks_committed_fingerprints() {
        let user_id = UserId::new();
        let mut entry = AggregateEntry::new(user_id);
        let event = make_event("store-1", Some(500));
        let now = Utc::now();

        assert!(!entry.is_committed(&event.fingerprint));

        let mut updated = entry.aggregate.clone();
        updated.apply(&event, now);
        entry.install_commit(&event, updated);

        assert!(entry.is_committed(&event.fingerprint));
        assert_eq!(entry.committed_count(), 1);
        assert_eq!(entry.aggregate.total_saved_cents, 500);
    }

    #[test]
    fn amend_delta_against_prior_amount() {
        let mut entry = AggregateEntry::new(UserId::new());
        let event = make_event("store-1", Some(500));
        let now = Utc::now();
        let mut updated = entry.aggregate.clone();
        updated.apply(&event, now);
        entry.install_commit(&event, updated);

        let delta = entry.amend_delta(&event.fingerprint, 750);
        let Ok((store_id, delta)) = delta else {
            panic!("expected delta");
        };
        assert_eq!(store_id, "store-1");
        assert_eq!(delta, 250);
    }

    #[test]
    fn amend_delta_for_amount_less_event_is_full_amount() {
        let mut entry = AggregateEntry::new(UserId::new());
        let event = make_event("store-1", None);
        let now = Utc::now();
        let mut updated = entry.aggregate.clone();
        updated.apply(&event, now);
        entry.install_commit(&event, updated);

        let delta = entry.amend_delta(&event.fingerprint, 450);
        let Ok((_, delta)) = delta else {
            panic!("expected delta");
        };
        assert_eq!(delta, 450);
    }

    #[test]
    fn amend_delta_unknown_fingerprint_errors() {
        let entry = AggregateEntry::new(UserId::new());
        let result = entry.amend_delta(&Fingerprint::from_hex("missing"), 100);
        assert!(result.is_err());
    }

    #[test]
    fn install_amend_updates_recorded_amount() {
        let mut entry = AggregateEntry::new(UserId::new());
        let event = make_event("store-1", None);
        let now = Utc::now();
        let mut updated = entry.aggregate.clone();
        updated.apply(&event, now);
        entry.install_commit(&event, updated);

        let mut amended = entry.aggregate.clone();
        amended.amend("store-1", 450, now);
        entry.install_amend(&event.fingerprint, 450, amended);

        assert_eq!(
            entry
                .record(&event.fingerprint)
                .and_then(|r| r.amount_saved_cents),
            Some(450)
        );
        assert_eq!(entry.aggregate.total_saved_cents, 450);
    }
}
