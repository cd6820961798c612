//! # savings-ledger
//!
//! Savings event pipeline and ledger service for coupon-savings tracking.
//!
//! A browser extension observes coupon applications on checkout pages and
//! reports the savings to a user dashboard. This crate is the pipeline in
//! between: capture signals are validated, durably queued on the client,
//! deduplicated, batched to the backend, and folded into per-user totals —
//! at-least-once delivery with exactly-once effect, so event loss or
//! duplication can never corrupt a user's financial summary.
//!
//! ## Architecture
//!
//! ```text
//! Page contexts (capture signals)
//!     │
//!     ├── MessageBus (bus)            — validate + fingerprint
//!     ├── SqliteEventStore (store)    — durable local queue
//!     ├── SyncEngine (sync)           — batch, retry, dead-letter
//!     │        ▼ HTTP
//!     ├── REST Handlers (api/)
//!     ├── WS Handler (ws/)
//!     │
//!     ├── IngestService (service/)
//!     ├── EventBus (domain/)
//!     │
//!     ├── AggregateRegistry (domain/)
//!     │
//!     └── PostgreSQL Persistence
//! ```
//!
//! The client half (`bus`, `store`, `sync`) links into the extension's
//! background process; the server half (`api`, `ws`, `service`,
//! `persistence`) runs behind the binary in `main.rs`.

pub mod api;
pub mod app_state;
pub mod bus;
pub mod config;
pub mod domain;
pub mod error;
pub mod persistence;
pub mod service;
pub mod store;
pub mod sync;
pub mod ws;
