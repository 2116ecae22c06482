//! `PostgreSQL` order store for the order intake service.
//!
//! This crate provides:
//!
//! - [`PostgresOrderStore`]: the [`OrderStore`](order_intake_core::OrderStore)
//!   implementation, with idempotent inserts backed by a unique index and
//!   compare-and-swap status updates
//! - [`FailureLog`]: a table of orders that exhausted their retries, for
//!   operators to review and resolve
//! - [`migrate`]: embedded schema migrations
//!
//! Queries are checked at runtime, so building the crate needs no database.
//!
//! # Example
//!
//! ```ignore
//! use order_intake_postgres::{PostgresOrderStore, migrate};
//!
//! let store = PostgresOrderStore::connect("postgres://localhost/orders", 10).await?;
//! migrate(store.pool()).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
pub mod failure_log;
pub mod store;

pub use error::map_sqlx_error;
pub use failure_log::{FailureEntry, FailureLog};
pub use store::PostgresOrderStore;

use order_intake_core::StoreError;
use sqlx::PgPool;

/// Apply the embedded migrations.
///
/// # Errors
///
/// Returns [`StoreError::Fatal`] if a migration fails to apply.
pub async fn migrate(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| StoreError::Fatal(format!("migration failed: {e}")))?;
    tracing::info!("Database migrations applied");
    Ok(())
}
