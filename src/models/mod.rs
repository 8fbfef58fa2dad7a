//! Core data models for the file vault.
//!
//! These entities map to SQLite rows via `sqlx::FromRow` and serialize as
//! JSON via `serde`.

pub mod audit;
pub mod file_object;
