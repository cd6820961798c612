//! Ingest and amend DTOs.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::domain::{PerEventResult, SavingsEvent, UserId};

/// Request body for `POST /events/batch`.
///
/// The same shape the sync engine's HTTP transport produces; the event
/// array is bounded client-side by the engine's batch size.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct IngestRequest {
    /// User the batch belongs to (auth context is out of band).
    pub user_id: UserId,
    /// Events to ingest, oldest capture first.
    pub events: Vec<SavingsEvent>,
}

/// Response body for `POST /events/batch`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct IngestResponse {
    /// Per-event verdicts, in request order.
    pub results: Vec<PerEventResult>,
}

/// Request body for `POST /events/{fingerprint}/amount`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AmendAmountRequest {
    /// User the committed event belongs to.
    pub user_id: UserId,
    /// Reconciled savings amount in minor units.
    pub amount_saved_cents: i64,
}
