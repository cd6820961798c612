//! Message bus between in-page capture and the local queue.
//!
//! Many page contexts post [`CaptureSignal`]s concurrently; the bus
//! validates each one, stamps it with a deterministic fingerprint, and
//! hands it to the injected [`EventStore`]. The store's enqueue is the
//! single serialization point, so the bus itself holds no state beyond
//! its dependencies — construction-time injection keeps the pipeline
//! testable without any process-wide listener registration.

use std::sync::Arc;

use tracing::debug;

use crate::domain::{CaptureSignal, Fingerprint, SavingsEvent};
use crate::error::LedgerError;
use crate::store::{EnqueueOutcome, EventStore};

/// Acknowledgment returned to the posting page context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusAck {
    /// The signal became a new pending event.
    Accepted,
    /// An event with the same fingerprint is already queued or synced.
    Duplicate,
}

/// Validating front door of the client pipeline.
#[derive(Debug, Clone)]
pub struct MessageBus {
    store: Arc<dyn EventStore>,
    client_instance_id: String,
    bucket_ms: i64,
}

impl MessageBus {
    /// Creates a bus over the given store.
    ///
    /// `client_instance_id` identifies this extension install and is part
    /// of the fingerprint input; `bucket_ms` is the dedup time bucket
    /// width (see [`crate::domain::fingerprint::DEFAULT_BUCKET_MS`]).
    #[must_use]
    pub fn new(store: Arc<dyn EventStore>, client_instance_id: String, bucket_ms: i64) -> Self {
        Self {
            store,
            client_instance_id,
            bucket_ms,
        }
    }

    /// Validates a raw signal and enqueues the resulting event.
    ///
    /// Malformed input never reaches the store; it is logged at debug and
    /// rejected. Errors here must never block page-level capture — the
    /// caller drops the signal and moves on.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidEvent`] for malformed signals and
    /// [`LedgerError::PersistenceError`] if the queue write fails.
    pub async fn receive(&self, signal: CaptureSignal) -> Result<BusAck, LedgerError> {
        if let Err(err) = signal.validate() {
            debug!(%err, "dropping malformed capture signal");
            return Err(err);
        }

        let fingerprint = Fingerprint::compute(
            &signal.store_id,
            &signal.code,
            signal.captured_at,
            &self.client_instance_id,
            self.bucket_ms,
        );
        let event = SavingsEvent::from_signal(&signal, fingerprint);

        match self.store.enqueue(&event).await? {
            EnqueueOutcome::Accepted => {
                debug!(
                    fingerprint = %event.fingerprint,
                    store_id = %event.store_id,
                    "capture signal queued"
                );
                Ok(BusAck::Accepted)
            }
            EnqueueOutcome::Duplicate => Ok(BusAck::Duplicate),
        }
    }
}
