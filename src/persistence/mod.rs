//! Persistence layer: PostgreSQL canonical event log and aggregate rows.
//!
//! The backend's system of record for committed savings events and user
//! aggregates. The registry serves all reads from memory; this layer makes
//! commits durable and rehydrates the registry at startup. Controlled at
//! runtime by `PERSISTENCE_ENABLED`.

pub mod models;
pub mod postgres;

pub use postgres::PostgresLedger;
