//! sb-db: checkpoint persistence layer.
//!
//! This crate provides SQLite-backed storage for storyboard snapshots with
//! connection pooling, embedded migrations, typed models, and query modules.

pub mod migrations;
pub mod models;
pub mod pool;
pub mod queries;
