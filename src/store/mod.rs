//! Durable per-folder state: seen and processed records.

pub mod state_db;

pub use state_db::{ProcessedRecord, SeenRecord, StateStore};
