//! Dashboard query handlers.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use crate::api::dto::AggregateResponse;
use crate::app_state::AppState;
use crate::domain::UserId;
use crate::error::{ErrorResponse, LedgerError};

/// `GET /users/{id}/aggregate` — Committed-only savings snapshot.
///
/// Never exposes pending or in-flight client-side data; only state the
/// backend has certified. Users with no committed events get zeros.
///
/// # Errors
///
/// Returns [`LedgerError`] on internal failures.
#[utoipa::path(
    get,
    path = "/api/v1/users/{id}/aggregate",
    tag = "Dashboard",
    summary = "Get a user's savings aggregate",
    description = "Returns lifetime savings total, coupons-used count, and the per-store breakdown, reflecting committed events only.",
    params(
        ("id" = uuid::Uuid, Path, description = "User UUID"),
    ),
    responses(
        (status = 200, description = "Aggregate snapshot", body = AggregateResponse),
        (status = 400, description = "Malformed user id", body = ErrorResponse),
    )
)]
pub async fn get_aggregate(
    State(state): State<AppState>,
    Path(id): Path<uuid::Uuid>,
) -> Result<impl IntoResponse, LedgerError> {
    let aggregate = state.ingest_service.aggregate(UserId::from_uuid(id)).await;
    Ok(Json(AggregateResponse::from(aggregate)))
}

/// Dashboard routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/users/{id}/aggregate", get(get_aggregate))
}
