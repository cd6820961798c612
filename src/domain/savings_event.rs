//! Capture signals, canonical savings events, and their sync lifecycle.
//!
//! A [`CaptureSignal`] is the raw, untrusted message an in-page observer
//! posts when it believes a coupon was applied. The message bus validates
//! it and converts it into a [`SavingsEvent`], the canonical record that
//! flows through the local queue, the ingest batch, and the backend ledger.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::Fingerprint;
use crate::error::LedgerError;

/// The only signal type the pipeline accepts.
pub const SIGNAL_COUPON_APPLIED: &str = "COUPON_APPLIED";

/// Raw in-page message announcing a coupon application.
///
/// Untrusted input: page contexts can post anything. [`CaptureSignal::validate`]
/// is the gate — malformed signals are dropped at the bus edge and never
/// reach the local queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureSignal {
    /// Message type discriminator. Must equal [`SIGNAL_COUPON_APPLIED`].
    #[serde(rename = "type")]
    pub signal_type: String,
    /// Coupon identifier from the discovery catalog.
    pub coupon_id: String,
    /// The coupon code that was applied.
    pub code: String,
    /// Merchant identifier.
    pub store_id: String,
    /// Client-observed application time (epoch milliseconds).
    pub captured_at: i64,
    /// Observed savings in minor units, when the checkout page exposed it.
    #[serde(default)]
    pub amount_saved_cents: Option<i64>,
}

impl CaptureSignal {
    /// Checks the fixed event schema: type tag, non-empty identifiers,
    /// positive timestamp, non-negative amount.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidEvent`] naming the first offending
    /// field.
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.signal_type != SIGNAL_COUPON_APPLIED {
            return Err(LedgerError::InvalidEvent(format!(
                "unsupported type: {}",
                self.signal_type
            )));
        }
        if self.coupon_id.trim().is_empty() {
            return Err(LedgerError::InvalidEvent("missing coupon_id".to_string()));
        }
        if self.code.trim().is_empty() {
            return Err(LedgerError::InvalidEvent("missing code".to_string()));
        }
        if self.store_id.trim().is_empty() {
            return Err(LedgerError::InvalidEvent("missing store_id".to_string()));
        }
        if self.captured_at <= 0 {
            return Err(LedgerError::InvalidEvent(format!(
                "non-positive captured_at: {}",
                self.captured_at
            )));
        }
        if let Some(amount) = self.amount_saved_cents
            && amount < 0
        {
            return Err(LedgerError::InvalidEvent(format!(
                "negative amount_saved_cents: {amount}"
            )));
        }
        Ok(())
    }
}

/// Canonical savings event flowing from capture to the backend ledger.
///
/// Monetary amounts are integer minor units (cents); an absent amount means
/// the savings were not observable at capture time and will be filled in by
/// a later amend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SavingsEvent {
    /// Dedup key; unique per (store, code, time bucket, client instance).
    pub fingerprint: Fingerprint,
    /// Coupon identifier from the discovery catalog.
    pub coupon_id: String,
    /// The coupon code that was applied.
    pub code: String,
    /// Merchant identifier.
    pub store_id: String,
    /// Client-observed application time (epoch milliseconds).
    pub captured_at: i64,
    /// Savings in minor units; `None` until reconciled.
    pub amount_saved_cents: Option<i64>,
}

impl SavingsEvent {
    /// Builds the canonical event from a validated signal and its computed
    /// fingerprint.
    #[must_use]
    pub fn from_signal(signal: &CaptureSignal, fingerprint: Fingerprint) -> Self {
        Self {
            fingerprint,
            coupon_id: signal.coupon_id.clone(),
            code: signal.code.clone(),
            store_id: signal.store_id.clone(),
            captured_at: signal.captured_at,
            amount_saved_cents: signal.amount_saved_cents,
        }
    }
}

/// Sync lifecycle of a locally queued event.
///
/// `Pending → InFlight → Committed` is the happy path. `Failed` events
/// re-enter the batchable set once their backoff elapses; events that
/// exhaust the attempt budget become `DeadLettered` and are retained for
/// diagnostics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SyncState {
    /// Queued, waiting for the next outbound batch.
    Pending,
    /// Included in an outbound batch; awaiting the backend verdict.
    InFlight,
    /// Acknowledged by the backend; eligible for local GC after retention.
    Committed,
    /// Explicitly rejected by the backend; retried after backoff.
    Failed {
        /// Rejection count so far.
        attempts: u32,
    },
    /// Exceeded the attempt budget; excluded from all future batches.
    DeadLettered,
}

impl SyncState {
    /// Returns the state discriminator as stored in the local queue.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Committed => "committed",
            Self::Failed { .. } => "failed",
            Self::DeadLettered => "dead_lettered",
        }
    }

    /// Rebuilds the state from its stored discriminator and attempt count.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::PersistenceError`] on an unknown discriminator.
    pub fn from_parts(state: &str, attempts: u32) -> Result<Self, LedgerError> {
        match state {
            "pending" => Ok(Self::Pending),
            "in_flight" => Ok(Self::InFlight),
            "committed" => Ok(Self::Committed),
            "failed" => Ok(Self::Failed { attempts }),
            "dead_lettered" => Ok(Self::DeadLettered),
            other => Err(LedgerError::PersistenceError(format!(
                "unknown sync state: {other}"
            ))),
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn valid_signal() -> CaptureSignal {
        CaptureSignal {
            signal_type: SIGNAL_COUPON_APPLIED.to_string(),
            coupon_id: "cpn-1".to_string(),
            code: "SAVE10".to_string(),
            store_id: "store-1".to_string(),
            captured_at: 1_700_000_000_000,
            amount_saved_cents: Some(500),
        }
    }

    #[test]
    fn valid_signal_passes() {
        assert!(valid_signal().validate().is_ok());
    }

    #[test]
    fn wrong_type_rejected() {
        let mut signal = valid_signal();
        signal.signal_type = "CART_UPDATED".to_string();
        assert!(signal.validate().is_err());
    }

    #[test]
    fn empty_fields_rejected() {
        for field in ["coupon_id", "code", "store_id"] {
            let mut signal = valid_signal();
            match field {
                "coupon_id" => signal.coupon_id.clear(),
                "code" => signal.code.clear(),
                _ => signal.store_id.clear(),
            }
            assert!(signal.validate().is_err(), "{field} should be required");
        }
    }

    #[test]
    fn non_positive_timestamp_rejected() {
        let mut signal = valid_signal();
        signal.captured_at = 0;
        assert!(signal.validate().is_err());
    }

    #[test]
    fn negative_amount_rejected() {
        let mut signal = valid_signal();
        signal.amount_saved_cents = Some(-1);
        assert!(signal.validate().is_err());
    }

    #[test]
    fn missing_amount_is_valid() {
        let mut signal = valid_signal();
        signal.amount_saved_cents = None;
        assert!(signal.validate().is_ok());
    }

    #[test]
    fn signal_type_deserializes_from_type_field() {
        let json = r#"{
            "type": "COUPON_APPLIED",
            "coupon_id": "cpn-1",
            "code": "SAVE10",
            "store_id": "store-1",
            "captured_at": 1700000000000
        }"#;
        let signal: Result<CaptureSignal, _> = serde_json::from_str(json);
        let Ok(signal) = signal else {
            panic!("deserialization failed");
        };
        assert_eq!(signal.signal_type, SIGNAL_COUPON_APPLIED);
        assert_eq!(signal.amount_saved_cents, None);
    }

    #[test]
    fn sync_state_round_trips_through_parts() {
        let states = [
            SyncState::Pending,
            SyncState::InFlight,
            SyncState::Committed,
            SyncState::Failed { attempts: 3 },
            SyncState::DeadLettered,
        ];
        for state in states {
            let attempts = match state {
                SyncState::Failed { attempts } => attempts,
                _ => 0,
            };
            let back = SyncState::from_parts(state.as_str(), attempts);
            let Ok(back) = back else {
                panic!("round trip failed for {state:?}");
            };
            assert_eq!(state, back);
        }
    }

    #[test]
    fn unknown_state_is_error() {
        assert!(SyncState::from_parts("exploded", 0).is_err());
    }
}
