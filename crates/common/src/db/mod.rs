//! Database layer for Lexigraph
//!
//! Provides:
//! - Row models for the documents and keywords tables
//! - Repository with per-record transactional upsert
//! - SQLite connection pool management

pub mod models;
mod repository;

pub use repository::{Repository, StoreOutcome};

use crate::config::DatabaseConfig;
use crate::errors::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::info;

/// Open the SQLite pool, creating the database file (and its parent
/// directory) on first use.
pub async fn connect(config: &DatabaseConfig) -> Result<SqlitePool> {
    if let Some(parent) = config.path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::new()
        .filename(&config.path)
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    info!(path = %config.path.display(), "Database connection established");
    Ok(pool)
}

/// In-memory pool, used by tests.
pub async fn connect_in_memory() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new().in_memory(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;
    Ok(pool)
}
