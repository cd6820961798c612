//! WebSocket layer: connection handling, message routing, subscriptions.
//!
//! The WebSocket endpoint at `/ws` pushes committed ledger events to
//! dashboard clients so totals update live. Read-only: clients can only
//! manage their subscription filter.

pub mod connection;
pub mod handler;
pub mod messages;
pub mod subscription;
