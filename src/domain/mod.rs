//! Domain layer: core types, aggregate registry, and event system.
//!
//! This module contains the shared domain model for both halves of the
//! pipeline: typed identifiers and fingerprints, capture signals and
//! canonical savings events, per-event ingestion outcomes, user aggregates
//! with their registry, and the event bus for broadcasting ledger changes.

pub mod aggregate;
pub mod aggregate_registry;
pub mod event_bus;
pub mod fingerprint;
pub mod ledger_event;
pub mod outcome;
pub mod savings_event;
pub mod user_id;

pub use aggregate::{AggregateEntry, CommitRecord, StoreStats, UserAggregate};
pub use aggregate_registry::AggregateRegistry;
pub use event_bus::EventBus;
pub use fingerprint::Fingerprint;
pub use ledger_event::LedgerEvent;
pub use outcome::{EventOutcome, PerEventResult};
pub use savings_event::{CaptureSignal, SavingsEvent, SyncState};
pub use user_id::UserId;
