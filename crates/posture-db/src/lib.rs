//! PostgreSQL persistence for posture
//!
//! Snapshot mirror tables (one logical row per remote directory object,
//! continuously overwritten by sync) plus the append-only scan log and
//! compliance check results.
//!
//! Models are plain structs with associated async functions taking a
//! `&PgPool`; all queries are organization-scoped.

mod error;
mod migrations;
pub mod models;

pub use error::DbError;
pub use migrations::run_migrations;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Connects a pool with sane defaults for the scanner workload.
///
/// # Errors
///
/// Returns `DbError::ConnectionFailed` when the database is unreachable.
pub async fn connect(database_url: &str) -> Result<PgPool, DbError> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .map_err(DbError::ConnectionFailed)
}
