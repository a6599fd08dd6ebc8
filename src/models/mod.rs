//! Core data models for the storage gateway.
//!
//! These entities map cleanly to database tables via `sqlx::FromRow` and
//! serialize naturally as JSON via `serde`.

pub mod app;
pub mod bucket;
pub mod file_metadata;
pub mod reconciliation;
pub mod replication_rule;
