//! Per-event ingestion outcomes shared by client and server.
//!
//! The ingest response is an ordered array of `{fingerprint, outcome}`
//! pairs. Both halves of the pipeline speak this type: the server builds
//! it, the sync engine consumes it to drive local state transitions.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::Fingerprint;

/// Backend verdict for a single event within an ingest batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EventOutcome {
    /// First time seen: persisted and folded into the user aggregate.
    Committed,
    /// Fingerprint was already committed; no re-aggregation happened.
    AlreadyCommitted,
    /// Explicitly refused (schema mismatch etc.); counts toward the
    /// client's attempt budget.
    Rejected {
        /// Human-readable rejection reason.
        reason: String,
    },
}

impl EventOutcome {
    /// Returns `true` for outcomes the client should treat as success.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Committed | Self::AlreadyCommitted)
    }
}

/// One entry of the ingest response, in request order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PerEventResult {
    /// Fingerprint of the event this verdict applies to.
    pub fingerprint: Fingerprint,
    /// The verdict.
    #[serde(flatten)]
    pub outcome: EventOutcome,
}
