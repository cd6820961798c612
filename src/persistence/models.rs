//! Database models for committed events and aggregate rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A canonical committed event row from the `committed_events` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommittedEventRow {
    /// Auto-increment row ID.
    pub id: i64,
    /// Owning user.
    pub user_id: Uuid,
    /// Dedup key; unique across the table.
    pub fingerprint: String,
    /// Coupon identifier.
    pub coupon_id: String,
    /// The applied coupon code.
    pub code: String,
    /// Merchant identifier.
    pub store_id: String,
    /// Client-observed application time (epoch milliseconds).
    pub captured_at: i64,
    /// Savings in minor units; null until amended.
    pub amount_saved_cents: Option<i64>,
    /// Server-side commit timestamp.
    pub committed_at: DateTime<Utc>,
}

/// A user aggregate row from the `user_aggregates` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateRow {
    /// Owning user (primary key).
    pub user_id: Uuid,
    /// Lifetime savings in minor units.
    pub total_saved_cents: i64,
    /// Lifetime coupons-used count.
    pub coupons_used_count: i64,
    /// Per-store breakdown as JSONB.
    pub per_store: serde_json::Value,
    /// Timestamp of the last fold.
    pub last_updated_at: DateTime<Utc>,
}
