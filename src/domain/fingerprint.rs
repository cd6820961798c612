//! Deterministic event fingerprints for deduplication.
//!
//! A [`Fingerprint`] is the SHA-256 hash of the fields that identify one
//! coupon application: store, code, a coarse timestamp bucket, and the
//! client instance that observed it. Two observations of the same code at
//! the same store within one bucket collapse to the same fingerprint, which
//! is what makes enqueue and backend ingestion idempotent.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use utoipa::ToSchema;

/// Default width of the capture-timestamp bucket in milliseconds.
///
/// Re-fires of the same checkout signal (page re-render, double click on
/// "apply") land in the same bucket and dedupe to one event.
pub const DEFAULT_BUCKET_MS: i64 = 60_000;

/// Deterministic dedup key derived from event content.
///
/// Stored as a lowercase hex SHA-256 digest. Serialized transparently as a
/// string on every wire surface (local queue, ingest batch, ws events).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Computes the fingerprint for one coupon application.
    ///
    /// The hash input is `store_id | code | bucket | client_instance_id`
    /// where `bucket = captured_at_ms / bucket_ms` (integer division).
    /// A non-positive `bucket_ms` falls back to [`DEFAULT_BUCKET_MS`].
    #[must_use]
    pub fn compute(
        store_id: &str,
        code: &str,
        captured_at_ms: i64,
        client_instance_id: &str,
        bucket_ms: i64,
    ) -> Self {
        let bucket_ms = if bucket_ms > 0 {
            bucket_ms
        } else {
            DEFAULT_BUCKET_MS
        };
        let bucket = captured_at_ms.div_euclid(bucket_ms);

        let mut hasher = Sha256::new();
        hasher.update(store_id.as_bytes());
        hasher.update(b"|");
        hasher.update(code.as_bytes());
        hasher.update(b"|");
        hasher.update(bucket.to_le_bytes());
        hasher.update(b"|");
        hasher.update(client_instance_id.as_bytes());

        Self(hex::encode(hasher.finalize()))
    }

    /// Wraps an already-computed fingerprint string (e.g. read back from
    /// the local queue or an ingest request).
    #[must_use]
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    /// Returns the hex digest as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if the digest string is empty (never produced by
    /// [`Fingerprint::compute`]; possible on hand-built wire input).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Fingerprint {
    fn from(hex: String) -> Self {
        Self(hex)
    }
}
