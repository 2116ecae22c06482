//! In-memory order stores.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use order_intake_core::{IdempotencyKey, Order, OrderId, OrderStatus, OrderStore, StoreError, UserId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Default)]
struct Inner {
    orders: HashMap<OrderId, (u64, Order)>,
    by_key: HashMap<IdempotencyKey, OrderId>,
    next_seq: u64,
}

/// In-memory order store.
///
/// A single mutex makes every operation atomic, which gives the same
/// guarantees the SQL store gets from its unique index and conditional
/// `UPDATE`.
#[derive(Default)]
pub struct InMemoryOrderStore {
    inner: Mutex<Inner>,
}

impl InMemoryOrderStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored orders
    pub async fn len(&self) -> usize {
        self.inner.lock().await.orders.len()
    }

    /// Whether the store is empty
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn create(&self, order: &Order) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.by_key.contains_key(&order.idempotency_key) || inner.orders.contains_key(&order.id)
        {
            return Err(StoreError::Duplicate(order.idempotency_key.to_string()));
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.by_key.insert(order.idempotency_key.clone(), order.id);
        inner.orders.insert(order.id, (seq, order.clone()));
        Ok(())
    }

    async fn get(&self, id: &OrderId) -> Result<Option<Order>, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .orders
            .get(id)
            .map(|(_, order)| order.clone()))
    }

    async fn get_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<Order>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .by_key
            .get(key)
            .and_then(|id| inner.orders.get(id))
            .map(|(_, order)| order.clone()))
    }

    async fn update_status(
        &self,
        id: &OrderId,
        expected: OrderStatus,
        next: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<Order, StoreError> {
        let mut inner = self.inner.lock().await;
        let (_, order) = inner.orders.get_mut(id).ok_or(StoreError::NotFound)?;
        if order.status != expected {
            return Err(StoreError::StatusMismatch {
                expected,
                actual: order.status,
            });
        }
        order.status = next;
        order.updated_at = at;
        Ok(order.clone())
    }

    async fn list_by_user(&self, user_id: &UserId) -> Result<Vec<Order>, StoreError> {
        let inner = self.inner.lock().await;
        let mut orders: Vec<(u64, Order)> = inner
            .orders
            .values()
            .filter(|(_, order)| &order.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by(|(seq_a, a), (seq_b, b)| {
            a.created_at.cmp(&b.created_at).then(seq_a.cmp(seq_b))
        });
        Ok(orders.into_iter().map(|(_, order)| order).collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Store wrapper that injects failures in front of an [`InMemoryOrderStore`].
///
/// - placement failures: `create` of a `Placed` order fails with
///   [`StoreError::Unavailable`] while the failure budget lasts; recording a
///   `Failed` order always goes through
/// - lost: every call fails with [`StoreError::Fatal`]
/// - unavailable: every call fails with [`StoreError::Unavailable`]
/// - rejecting: every call but `ping` fails with [`StoreError::Rejected`]
/// - delay: every call sleeps first (for timeout tests)
#[derive(Default)]
pub struct FlakyOrderStore {
    inner: InMemoryOrderStore,
    placement_failures: AtomicU32,
    placement_attempts: AtomicU32,
    lost: AtomicBool,
    unavailable: AtomicBool,
    rejecting: AtomicBool,
    delay: Option<Duration>,
}

impl FlakyOrderStore {
    /// A store that behaves normally until configured otherwise
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` placements
    #[must_use]
    pub fn failing_placements(n: u32) -> Self {
        let store = Self::default();
        store.placement_failures.store(n, Ordering::SeqCst);
        store
    }

    /// Fail every placement
    #[must_use]
    pub fn always_failing_placements() -> Self {
        Self::failing_placements(u32::MAX)
    }

    /// Sleep for `delay` before every call
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Toggle fatal loss of the store
    pub fn set_lost(&self, lost: bool) {
        self.lost.store(lost, Ordering::SeqCst);
    }

    /// Toggle transient unavailability of the store
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Toggle rejection of every value sent, as a database refusing bad
    /// encoding does. `ping` still answers.
    pub fn set_rejecting(&self, rejecting: bool) {
        self.rejecting.store(rejecting, Ordering::SeqCst);
    }

    /// How many `create` calls for `Placed` orders were made
    #[must_use]
    pub fn placement_attempts(&self) -> u32 {
        self.placement_attempts.load(Ordering::SeqCst)
    }

    /// The wrapped store
    #[must_use]
    pub const fn inner(&self) -> &InMemoryOrderStore {
        &self.inner
    }

    async fn gate(&self) -> Result<(), StoreError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.lost.load(Ordering::SeqCst) {
            return Err(StoreError::Fatal("connection pool closed".to_string()));
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }

    async fn gate_values(&self) -> Result<(), StoreError> {
        self.gate().await?;
        if self.rejecting.load(Ordering::SeqCst) {
            return Err(StoreError::Rejected(
                "invalid byte sequence for encoding \"UTF8\": 0x00".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl OrderStore for FlakyOrderStore {
    async fn create(&self, order: &Order) -> Result<(), StoreError> {
        self.gate_values().await?;
        if order.status == OrderStatus::Placed {
            self.placement_attempts.fetch_add(1, Ordering::SeqCst);
            let budget = self.placement_failures.load(Ordering::SeqCst);
            if budget > 0 {
                if budget != u32::MAX {
                    self.placement_failures.fetch_sub(1, Ordering::SeqCst);
                }
                return Err(StoreError::Unavailable("injected placement failure".to_string()));
            }
        }
        self.inner.create(order).await
    }

    async fn get(&self, id: &OrderId) -> Result<Option<Order>, StoreError> {
        self.gate_values().await?;
        self.inner.get(id).await
    }

    async fn get_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<Order>, StoreError> {
        self.gate_values().await?;
        self.inner.get_by_idempotency_key(key).await
    }

    async fn update_status(
        &self,
        id: &OrderId,
        expected: OrderStatus,
        next: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<Order, StoreError> {
        self.gate_values().await?;
        self.inner.update_status(id, expected, next, at).await
    }

    async fn list_by_user(&self, user_id: &UserId) -> Result<Vec<Order>, StoreError> {
        self.gate_values().await?;
        self.inner.list_by_user(user_id).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.gate().await
    }
}
