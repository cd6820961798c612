//! savings-ledger server entry point.
//!
//! Starts the Axum HTTP server with the ingestion, dashboard, and
//! WebSocket endpoints, optionally backed by PostgreSQL persistence.

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use savings_ledger::api;
use savings_ledger::app_state::AppState;
use savings_ledger::config::LedgerConfig;
use savings_ledger::domain::{AggregateEntry, AggregateRegistry, EventBus};
use savings_ledger::persistence::PostgresLedger;
use savings_ledger::service::IngestService;
use savings_ledger::ws::handler::ws_handler;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = LedgerConfig::from_env()?;
    tracing::info!(addr = %config.listen_addr, "starting savings-ledger");

    // Build domain layer
    let registry = Arc::new(AggregateRegistry::new());
    let event_bus = EventBus::new(config.event_bus_capacity);

    // Optional persistence: connect, migrate, rehydrate the registry
    let ledger = if config.persistence_enabled {
        let ledger = PostgresLedger::connect(&config).await?;
        ledger.ensure_schema().await?;

        let restored = ledger.load_aggregates().await?;
        let users = restored.len();
        for (aggregate, committed) in restored {
            let user_id = aggregate.user_id;
            registry
                .insert(user_id, AggregateEntry::restore(aggregate, committed))
                .await;
        }
        tracing::info!(users, "registry rehydrated from postgres");

        Some(Arc::new(ledger))
    } else {
        tracing::warn!("persistence disabled; ledger state is in-memory only");
        None
    };

    // Build service layer
    let ingest_service = Arc::new(IngestService::new(
        Arc::clone(&registry),
        event_bus.clone(),
        ledger.clone(),
    ));

    // Periodic retention sweep over the backend event log
    if let Some(ledger) = ledger.clone() {
        let retention_days = config.event_retention_days;
        let sweep_interval = std::time::Duration::from_secs(config.retention_sweep_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            loop {
                ticker.tick().await;
                match ledger.delete_old_events(retention_days).await {
                    Ok(0) => {}
                    Ok(removed) => tracing::info!(removed, "retention sweep"),
                    Err(err) => tracing::warn!(%err, "retention sweep failed"),
                }
            }
        });
    }

    // Build application state
    let app_state = AppState {
        ingest_service,
        event_bus,
    };

    // Build router
    let app = Router::new()
        .merge(api::build_router())
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(listener, app).await?;

    Ok(())
}
