//! Ingestion handlers: batch ingest and amount amend.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};

use crate::api::dto::{AmendAmountRequest, IngestRequest, IngestResponse};
use crate::app_state::AppState;
use crate::domain::Fingerprint;
use crate::error::{ErrorResponse, LedgerError};

/// `POST /events/batch` — Ingest a batch of savings events.
///
/// Per-event problems come back as per-event outcomes in the results
/// array, never as an HTTP error; only a malformed body or a storage
/// failure fails the whole call.
///
/// # Errors
///
/// Returns [`LedgerError`] if the durable write fails.
#[utoipa::path(
    post,
    path = "/api/v1/events/batch",
    tag = "Ingest",
    summary = "Ingest a batch of savings events",
    description = "Deduplicates each event by fingerprint, folds new ones into the user's aggregate, and returns a per-event verdict in request order. Safe to retry: re-sent events come back as already_committed.",
    request_body = IngestRequest,
    responses(
        (status = 200, description = "Per-event verdicts in request order", body = IngestResponse),
        (status = 400, description = "Malformed request body", body = ErrorResponse),
        (status = 500, description = "Durable write failed", body = ErrorResponse),
    )
)]
pub async fn ingest_batch(
    State(state): State<AppState>,
    Json(req): Json<IngestRequest>,
) -> Result<impl IntoResponse, LedgerError> {
    let results = state
        .ingest_service
        .ingest(req.user_id, &req.events)
        .await?;

    Ok(Json(IngestResponse { results }))
}

/// `POST /events/{fingerprint}/amount` — Amend the savings amount of a
/// committed event.
///
/// # Errors
///
/// Returns [`LedgerError::EventNotFound`] if the fingerprint was never
/// committed for the user.
#[utoipa::path(
    post,
    path = "/api/v1/events/{fingerprint}/amount",
    tag = "Ingest",
    summary = "Amend a committed event's savings amount",
    description = "Fills in or corrects the amount of an already-committed event; the user's aggregate is adjusted by the delta against the previously recorded amount.",
    params(
        ("fingerprint" = String, Path, description = "Fingerprint of the committed event"),
    ),
    request_body = AmendAmountRequest,
    responses(
        (status = 200, description = "Adjusted aggregate snapshot", body = crate::api::dto::AggregateResponse),
        (status = 404, description = "Unknown user or fingerprint", body = ErrorResponse),
    )
)]
pub async fn amend_amount(
    State(state): State<AppState>,
    Path(fingerprint): Path<String>,
    Json(req): Json<AmendAmountRequest>,
) -> Result<impl IntoResponse, LedgerError> {
    let aggregate = state
        .ingest_service
        .amend_amount(
            req.user_id,
            &Fingerprint::from_hex(fingerprint),
            req.amount_saved_cents,
        )
        .await?;

    Ok(Json(crate::api::dto::AggregateResponse::from(aggregate)))
}

/// Ingestion routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/events/batch", post(ingest_batch))
        .route("/events/{fingerprint}/amount", post(amend_amount))
}
