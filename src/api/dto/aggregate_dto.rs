//! Aggregate (dashboard) DTOs.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::domain::{StoreStats, UserAggregate, UserId};

/// Committed-only aggregate snapshot for `GET /users/{id}/aggregate`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AggregateResponse {
    /// Owning user.
    pub user_id: UserId,
    /// Lifetime savings in minor units.
    pub total_saved_cents: i64,
    /// Lifetime coupons-used count.
    pub coupons_used_count: u64,
    /// Per-merchant breakdown keyed by store id.
    pub per_store: HashMap<String, StoreStats>,
    /// Timestamp of the last fold; null for users with no committed events.
    pub last_updated_at: Option<DateTime<Utc>>,
}

impl From<UserAggregate> for AggregateResponse {
    fn from(aggregate: UserAggregate) -> Self {
        Self {
            user_id: aggregate.user_id,
            total_saved_cents: aggregate.total_saved_cents,
            coupons_used_count: aggregate.coupons_used_count,
            per_store: aggregate.per_store,
            last_updated_at: aggregate.last_updated_at,
        }
    }
}
