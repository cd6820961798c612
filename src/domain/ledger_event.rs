//! Domain events reflecting ledger state mutations.
//!
//! Every committed fold or amend emits a [`LedgerEvent`] through the
//! [`super::EventBus`]. Events are broadcast to WebSocket subscribers so a
//! dashboard can update totals live; they only describe state the backend
//! has certified (committed events, never pending client-side data).

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{Fingerprint, UserId};

/// Domain event emitted after every ledger mutation.
///
/// Monetary amounts are integer minor units (cents).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum LedgerEvent {
    /// Emitted when a savings event is committed for the first time.
    EventCommitted {
        /// Owning user.
        user_id: UserId,
        /// Dedup key of the committed event.
        fingerprint: Fingerprint,
        /// Merchant the coupon was applied at.
        store_id: String,
        /// The coupon code that was applied.
        code: String,
        /// Savings in minor units, if known at commit time.
        amount_saved_cents: Option<i64>,
        /// Commit timestamp.
        timestamp: DateTime<Utc>,
    },

    /// Emitted when a later reconciliation fills in or corrects the
    /// savings amount of an already-committed event.
    AmountAmended {
        /// Owning user.
        user_id: UserId,
        /// Dedup key of the amended event.
        fingerprint: Fingerprint,
        /// Newly recorded amount in minor units.
        amount_saved_cents: i64,
        /// Difference applied to the aggregate in minor units.
        delta_cents: i64,
        /// Amend timestamp.
        timestamp: DateTime<Utc>,
    },

    /// Emitted after any mutation with the resulting aggregate totals.
    AggregateUpdated {
        /// Owning user.
        user_id: UserId,
        /// New lifetime savings total in minor units.
        total_saved_cents: i64,
        /// New lifetime coupons-used count.
        coupons_used_count: u64,
        /// Update timestamp.
        timestamp: DateTime<Utc>,
    },
}

impl LedgerEvent {
    /// Returns the user this event belongs to.
    #[must_use]
    pub const fn user_id(&self) -> UserId {
        match self {
            Self::EventCommitted { user_id, .. }
            | Self::AmountAmended { user_id, .. }
            | Self::AggregateUpdated { user_id, .. } => *user_id,
        }
    }

    /// Returns the event type as a static string slice.
    #[must_use]
    pub const fn event_type_str(&self) -> &'static str {
        match self {
            Self::EventCommitted { .. } => "event_committed",
            Self::AmountAmended { .. } => "amount_amended",
            Self::AggregateUpdated { .. } => "aggregate_updated",
        }
    }
}
