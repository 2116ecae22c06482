//! Order store abstraction.
//!
//! The store is the only owner of authoritative order state. Implementations
//! must provide two atomic primitives the orchestrator relies on:
//!
//! - **Unique idempotency key**: `create` fails with [`StoreError::Duplicate`]
//!   when an order with the same key already exists.
//! - **Conditional status write**: `update_status` only succeeds when the
//!   stored status equals `expected` (compare-and-swap).
//!
//! # Implementations
//!
//! - `InMemoryOrderStore` (testing crate) - for tests
//! - `PostgresOrderStore` (postgres crate) - for production

use crate::error::StoreError;
use crate::order::{IdempotencyKey, Order, OrderId, OrderStatus, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Durable keyed storage for orders.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Insert a new order.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Duplicate`] if an order with the same idempotency key exists
    /// - [`StoreError::Unavailable`] / [`StoreError::Timeout`] on transient I/O failure
    async fn create(&self, order: &Order) -> Result<(), StoreError>;

    /// Fetch an order by id.
    ///
    /// # Errors
    ///
    /// Returns an error only on I/O or decoding failure; a miss is `Ok(None)`.
    async fn get(&self, id: &OrderId) -> Result<Option<Order>, StoreError>;

    /// Fetch an order by the idempotency key that created it.
    ///
    /// # Errors
    ///
    /// Returns an error only on I/O or decoding failure; a miss is `Ok(None)`.
    async fn get_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<Order>, StoreError>;

    /// Move an order from `expected` to `next`, returning the updated record.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`] if the order does not exist
    /// - [`StoreError::StatusMismatch`] if the stored status is not `expected`
    async fn update_status(
        &self,
        id: &OrderId,
        expected: OrderStatus,
        next: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<Order, StoreError>;

    /// All orders of a user, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O or decoding failure.
    async fn list_by_user(&self, user_id: &UserId) -> Result<Vec<Order>, StoreError>;

    /// Cheap connectivity probe used by readiness checks.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be reached.
    async fn ping(&self) -> Result<(), StoreError>;
}
