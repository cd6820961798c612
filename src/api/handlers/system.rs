//! System endpoints: health check and client sync defaults.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;
use utoipa::ToSchema;

use crate::app_state::AppState;
use crate::store::QueueConfig;
use crate::sync::SyncConfig;

/// Health check response.
#[derive(Debug, Serialize, ToSchema)]
struct HealthResponse {
    status: String,
    timestamp: String,
    version: String,
}

/// `GET /health` — Service health status.
#[utoipa::path(
    get,
    path = "/health",
    tag = "System",
    summary = "Health check",
    description = "Returns service health status, version, and current timestamp.",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
    )
)]
pub async fn health_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            timestamp: Utc::now().to_rfc3339(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}

/// Recommended client-side sync tuning.
#[derive(Debug, Serialize, ToSchema)]
struct SyncDefaultsResponse {
    batch_size: usize,
    interval_secs: u64,
    staleness_timeout_secs: u64,
    max_attempts: u32,
    backoff_base_ms: u64,
    retention_secs: u64,
}

/// `GET /config/sync-defaults` — Recommended sync engine tuning.
///
/// Extensions may fetch this at startup instead of hardcoding their
/// batch size and retry policy.
#[utoipa::path(
    get,
    path = "/config/sync-defaults",
    tag = "System",
    summary = "Recommended client sync tuning",
    description = "Returns the batch size, schedule, and retry policy the backend recommends for client sync engines.",
    responses(
        (status = 200, description = "Sync tuning defaults", body = SyncDefaultsResponse),
    )
)]
pub async fn sync_defaults_handler() -> impl IntoResponse {
    let sync = SyncConfig::default();
    let queue = QueueConfig::default();
    (
        StatusCode::OK,
        Json(SyncDefaultsResponse {
            batch_size: sync.batch_size,
            interval_secs: sync.interval.as_secs(),
            staleness_timeout_secs: queue.staleness_timeout.as_secs(),
            max_attempts: queue.max_attempts,
            backoff_base_ms: u64::try_from(queue.backoff_base.as_millis()).unwrap_or(u64::MAX),
            retention_secs: sync.retention.as_secs(),
        }),
    )
}

/// System routes mounted at the root level (not under /api/v1).
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_handler))
        .route("/config/sync-defaults", get(sync_defaults_handler))
}
