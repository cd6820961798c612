//! Transport seam between the sync engine and the ingestion endpoint.
//!
//! The engine only knows the [`IngestTransport`] trait; production uses
//! the HTTP implementation, tests substitute scripted ones. A transport
//! error means "no verdict for anyone in the batch" — the engine releases
//! those events rather than penalizing them.

use async_trait::async_trait;

use crate::api::dto::{IngestRequest, IngestResponse};
use crate::domain::{PerEventResult, SavingsEvent, UserId};
use crate::error::LedgerError;

/// Request/response contract for shipping one batch to the backend.
#[async_trait]
pub trait IngestTransport: std::fmt::Debug + Send + Sync {
    /// Sends a batch and returns the per-event verdicts, in batch order.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Transport`] when the endpoint was
    /// unreachable or answered abnormally; per-event problems are carried
    /// inside the verdict list, never as a call-level error.
    async fn send(
        &self,
        user_id: UserId,
        events: &[SavingsEvent],
    ) -> Result<Vec<PerEventResult>, LedgerError>;
}

/// HTTP transport posting batches to `POST /api/v1/events/batch`.
#[derive(Debug, Clone)]
pub struct HttpIngestTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpIngestTransport {
    /// Creates a transport against the given base URL
    /// (e.g. `https://api.example.com`).
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Internal`] if the HTTP client cannot be
    /// constructed.
    pub fn new(base_url: impl Into<String>) -> Result<Self, LedgerError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| LedgerError::Internal(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl IngestTransport for HttpIngestTransport {
    async fn send(
        &self,
        user_id: UserId,
        events: &[SavingsEvent],
    ) -> Result<Vec<PerEventResult>, LedgerError> {
        let url = format!("{}/api/v1/events/batch", self.base_url);
        let body = IngestRequest {
            user_id,
            events: events.to_vec(),
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| LedgerError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LedgerError::Transport(format!(
                "ingest endpoint returned {status}"
            )));
        }

        let parsed: IngestResponse = response
            .json()
            .await
            .map_err(|e| LedgerError::Transport(format!("malformed ingest response: {e}")))?;

        Ok(parsed.results)
    }
}
