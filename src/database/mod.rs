//! Postgres connection pooling and schema migrations for the durable store
//! named in spec §6 ("Persistent store schemas"): `users`, `templates`,
//! `audit_logs`.
//!
//! Grounded on the donor's `database::connection_pool`/`database::migrations`
//! pair, generalized from SQLite to Postgres (the donor's `query_optimizer`,
//! `spatial_index`, `replication`, `sharding`, `backup`, and in-module `cache`
//! submodules are CAD/DB-ops scope with no counterpart here and were dropped).

use thiserror::Error;

/// Database-layer error, folded into [`crate::error::Error`] at call sites
/// via `?` (see the `From<sqlx::Error>` impl there).
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("connection pool error: {0}")]
    ConnectionPool(String),

    #[error("query execution error: {0}")]
    QueryExecution(String),

    #[error("migration error: {0}")]
    Migration(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, DatabaseError>;

pub mod connection_pool;
pub mod migrations;

pub use connection_pool::{ConnectionPool, DatabaseConfig};
pub use migrations::MigrationManager;
