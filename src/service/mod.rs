//! Service layer: ingestion, aggregation, and amend orchestration.

pub mod ingest_service;

pub use ingest_service::IngestService;
