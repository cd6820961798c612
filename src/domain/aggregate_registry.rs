//! Concurrent aggregate storage with per-user fine-grained locking.
//!
//! [`AggregateRegistry`] stores all live user aggregates in a `HashMap`
//! where each entry is individually protected by a
//! [`tokio::sync::RwLock`]. Ingest calls for the same user serialize on
//! the entry lock (the atomic-fold invariant); calls for different users
//! run fully in parallel.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::aggregate::AggregateEntry;
use super::{UserAggregate, UserId};

/// Central store for all live user aggregates.
///
/// Uses a `RwLock<HashMap<...>>` for the outer map and per-entry
/// `Arc<RwLock<AggregateEntry>>` for fine-grained per-user locking.
///
/// # Concurrency
///
/// - Multiple tasks may read the same aggregate concurrently.
/// - Ingests for different users are concurrent.
/// - Ingests for the same user are serialized.
#[derive(Debug)]
pub struct AggregateRegistry {
    users: RwLock<HashMap<UserId, Arc<RwLock<AggregateEntry>>>>,
}

impl AggregateRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the entry for a user, creating a zeroed one on first touch.
    ///
    /// Aggregates are created lazily on the first committed event; callers
    /// that only read should prefer [`AggregateRegistry::get`] to avoid
    /// materializing empty entries.
    pub async fn entry(&self, user_id: UserId) -> Arc<RwLock<AggregateEntry>> {
        {
            let map = self.users.read().await;
            if let Some(entry) = map.get(&user_id) {
                return Arc::clone(entry);
            }
        }
        let mut map = self.users.write().await;
        Arc::clone(
            map.entry(user_id)
                .or_insert_with(|| Arc::new(RwLock::new(AggregateEntry::new(user_id)))),
        )
    }

    /// Returns the entry for a user if one exists.
    pub async fn get(&self, user_id: UserId) -> Option<Arc<RwLock<AggregateEntry>>> {
        let map = self.users.read().await;
        map.get(&user_id).cloned()
    }

    /// Inserts a rehydrated entry at startup, replacing any placeholder.
    pub async fn insert(&self, user_id: UserId, entry: AggregateEntry) {
        let mut map = self.users.write().await;
        map.insert(user_id, Arc::new(RwLock::new(entry)));
    }

    /// Returns a committed-only snapshot of a user's aggregate.
    pub async fn snapshot(&self, user_id: UserId) -> Option<UserAggregate> {
        let entry = self.get(user_id).await?;
        let entry = entry.read().await;
        Some(entry.aggregate.clone())
    }

    /// Returns the number of users with live aggregates.
    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    /// Returns `true` if the registry contains no aggregates.
    pub async fn is_empty(&self) -> bool {
        self.users.read().await.is_empty()
    }
}

impl Default for AggregateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::{Fingerprint, SavingsEvent};
    use chrono::Utc;

    fn make_event(tag: u8) -> SavingsEvent {
        SavingsEvent {
            fingerprint: Fingerprint::from_hex(format!("fp-{tag}")),
            coupon_id: "cpn-1".to_string(),
            code: "SAVE10".to_string(),
            store_id: "store-1".to_string(),
            captured_at: 1_700_000_000_000,
            amount_saved_cents: Some(100),
        }
    }

    #[tokio::test]
    async fn entry_creates_lazily() {
        let registry = AggregateRegistry::new();
        assert!(registry.is_empty().await);

        let user_id = UserId::new();
        let _entry = registry.entry(user_id).await;
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn entry_returns_same_instance() {
        let registry = AggregateRegistry::new();
        let user_id = UserId::new();

        let a = registry.entry(user_id).await;
        let b = registry.entry(user_id).await;
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn get_nonexistent_returns_none() {
        let registry = AggregateRegistry::new();
        assert!(registry.get(UserId::new()).await.is_none());
    }

    #[tokio::test]
    async fn snapshot_reflects_committed_folds() {
        let registry = AggregateRegistry::new();
        let user_id = UserId::new();
        let event = make_event(1);
        let now = Utc::now();

        let entry_lock = registry.entry(user_id).await;
        {
            let mut entry = entry_lock.write().await;
            let mut updated = entry.aggregate.clone();
            updated.apply(&event, now);
            entry.install_commit(&event, updated);
        }

        let snapshot = registry.snapshot(user_id).await;
        let Some(snapshot) = snapshot else {
            panic!("expected snapshot");
        };
        assert_eq!(snapshot.total_saved_cents, 100);
        assert_eq!(snapshot.coupons_used_count, 1);
    }

    #[tokio::test]
    async fn users_are_isolated() {
        let registry = AggregateRegistry::new();
        let user_a = UserId::new();
        let user_b = UserId::new();
        let now = Utc::now();

        let lock_a = registry.entry(user_a).await;
        {
            let mut entry = lock_a.write().await;
            let event = make_event(1);
            let mut updated = entry.aggregate.clone();
            updated.apply(&event, now);
            entry.install_commit(&event, updated);
        }

        let snap_b = registry.snapshot(user_b).await;
        assert!(snap_b.is_none());

        let _lock_b = registry.entry(user_b).await;
        let snap_b = registry.snapshot(user_b).await;
        let Some(snap_b) = snap_b else {
            panic!("expected snapshot");
        };
        assert_eq!(snap_b.total_saved_cents, 0);
    }
}
