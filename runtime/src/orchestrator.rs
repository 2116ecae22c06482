//! Order orchestration.
//!
//! The [`Orchestrator`] is the only component that talks to the
//! [`OrderStore`]. The bus consumer calls [`Orchestrator::place_order`]; the
//! HTTP gateway calls the read and cancel operations. All of them go through
//! the store on every call, so both paths see the same state.
//!
//! # Exactly-once effect
//!
//! Delivery is at-least-once. Placement is made idempotent by the store's
//! uniqueness constraint on the idempotency key, and the order id is derived
//! from that key, so every retry of a command targets the same order:
//!
//! ```text
//! place_order(cmd)
//!   ├─ get_by_idempotency_key ── Some ──► Duplicate(existing)
//!   └─ create(Placed)
//!        ├─ Ok ─────────────────────────► Created(order)
//!        ├─ Duplicate ── re-read ───────► Duplicate(existing)
//!        └─ transient or rejected ── attempts += 1
//!             ├─ attempts < ceiling ────► Err(Transient)   (caller retries)
//!             └─ attempts = ceiling ── create(Failed) ──► Failed(order) + FailureReport
//! ```
//!
//! Giving up is final even when the `Failed` record itself cannot be written:
//! the report is still sent and the command is not retried again.

use crate::metrics::OrderMetrics;
use crate::shutdown::ServiceEvents;
use order_intake_core::{
    Clock, FailureReport, IdempotencyKey, Order, OrderError, OrderId, OrderStatus, OrderStore,
    PlaceOrderCommand, StoreError, SystemClock, UserId,
};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

/// Default number of failed attempts before an order is recorded as `Failed`.
pub const DEFAULT_RETRY_CEILING: u32 = 5;

/// Default bound on a single store call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Definitive outcome of [`Orchestrator::place_order`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// First application of the command
    Created(Order),
    /// The command was already applied; the existing order, unchanged
    Duplicate(Order),
    /// Retries were exhausted and the order was recorded as `Failed`, or
    /// would have been had the store accepted the record
    Failed(Order),
}

impl Placement {
    /// The order this outcome refers to.
    #[must_use]
    pub const fn order(&self) -> &Order {
        match self {
            Self::Created(order) | Self::Duplicate(order) | Self::Failed(order) => order,
        }
    }

    /// Consume the outcome, keeping the order.
    #[must_use]
    pub fn into_order(self) -> Order {
        match self {
            Self::Created(order) | Self::Duplicate(order) | Self::Failed(order) => order,
        }
    }

    /// Short label for logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Created(_) => "created",
            Self::Duplicate(_) => "duplicate",
            Self::Failed(_) => "failed",
        }
    }
}

/// Per-key failure counters for in-flight placements.
///
/// Holds counters only. An entry is removed as soon as its key reaches a
/// definitive outcome, so the map is bounded by the keys currently retrying.
#[derive(Debug, Default)]
pub struct AttemptLedger {
    attempts: Mutex<HashMap<IdempotencyKey, u32>>,
}

impl AttemptLedger {
    /// Failed attempts recorded for `key`.
    #[must_use]
    pub fn attempts(&self, key: &IdempotencyKey) -> u32 {
        self.lock().get(key).copied().unwrap_or(0)
    }

    /// Record one more failure for `key` and return the new count.
    pub fn record_failure(&self, key: &IdempotencyKey) -> u32 {
        let mut attempts = self.lock();
        let count = attempts.entry(key.clone()).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    /// Forget `key`.
    pub fn clear(&self, key: &IdempotencyKey) {
        self.lock().remove(key);
    }

    /// Number of keys currently tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no key is currently tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<IdempotencyKey, u32>> {
        self.attempts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Coordinates placement, lookup and cancellation of orders.
///
/// Shared behind an `Arc` by the consumer and the HTTP handlers.
///
/// # Example
///
/// ```ignore
/// let (failures_tx, failures_rx) = tokio::sync::mpsc::unbounded_channel();
/// let orchestrator = Orchestrator::new(store)
///     .with_retry_ceiling(5)
///     .with_store_timeout(Duration::from_secs(5))
///     .with_failure_reports(failures_tx);
///
/// match orchestrator.place_order(command).await? {
///     Placement::Created(order) => { /* new */ }
///     Placement::Duplicate(order) => { /* redelivery */ }
///     Placement::Failed(order) => { /* gave up */ }
/// }
/// ```
pub struct Orchestrator {
    store: Arc<dyn OrderStore>,
    clock: Arc<dyn Clock>,
    retry_ceiling: u32,
    store_timeout: Duration,
    ledger: AttemptLedger,
    failure_reports: Option<mpsc::UnboundedSender<FailureReport>>,
    events: Option<ServiceEvents>,
}

impl Orchestrator {
    /// Orchestrator over `store` with the system clock and default limits.
    #[must_use]
    pub fn new(store: Arc<dyn OrderStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            retry_ceiling: DEFAULT_RETRY_CEILING,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            ledger: AttemptLedger::default(),
            failure_reports: None,
            events: None,
        }
    }

    /// Use `clock` for order timestamps.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Failed attempts after which an order is recorded as `Failed` (minimum 1).
    #[must_use]
    pub fn with_retry_ceiling(mut self, ceiling: u32) -> Self {
        self.retry_ceiling = ceiling.max(1);
        self
    }

    /// Bound every store call by `timeout`.
    #[must_use]
    pub const fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Send a [`FailureReport`] on `tx` for every order recorded as `Failed`.
    #[must_use]
    pub fn with_failure_reports(mut self, tx: mpsc::UnboundedSender<FailureReport>) -> Self {
        self.failure_reports = Some(tx);
        self
    }

    /// Forward fatal store errors to the supervisor.
    #[must_use]
    pub fn with_service_events(mut self, events: ServiceEvents) -> Self {
        self.events = Some(events);
        self
    }

    /// The configured retry ceiling
    #[must_use]
    pub const fn retry_ceiling(&self) -> u32 {
        self.retry_ceiling
    }

    /// In-flight attempt counters
    #[must_use]
    pub const fn ledger(&self) -> &AttemptLedger {
        &self.ledger
    }

    /// Apply a place-order command.
    ///
    /// # Errors
    ///
    /// - [`OrderError::Transient`] while the retry ceiling has not been reached;
    ///   the caller should retry the same command. Data the store rejects
    ///   counts toward the ceiling like an outage does
    /// - [`OrderError::Fatal`] if the store is lost
    /// - [`OrderError::Conflict`] if the key collides but no order can be read back
    #[instrument(
        skip(self, command),
        fields(idempotency_key = %command.idempotency_key, user_id = %command.user_id)
    )]
    pub async fn place_order(&self, command: PlaceOrderCommand) -> Result<Placement, OrderError> {
        let key = command.idempotency_key.clone();

        if self.ledger.attempts(&key) >= self.retry_ceiling {
            return self.record_failed(&command, "retry ceiling reached").await;
        }

        let started = Instant::now();
        match self.try_place(&command).await {
            Ok(placement) => {
                self.ledger.clear(&key);
                match &placement {
                    Placement::Created(order) => {
                        OrderMetrics::record_placed(started.elapsed());
                        info!(order_id = %order.id, "Order placed");
                    }
                    Placement::Duplicate(order) => {
                        OrderMetrics::record_duplicate();
                        info!(order_id = %order.id, status = %order.status, "Command already applied");
                    }
                    Placement::Failed(_) => {}
                }
                Ok(placement)
            }
            Err(err) if err.counts_as_attempt() => {
                OrderMetrics::record_retry();
                let attempt = self.ledger.record_failure(&key);
                warn!(attempt, ceiling = self.retry_ceiling, error = %err, "Placement attempt failed");
                if attempt >= self.retry_ceiling {
                    self.record_failed(&command, &err.to_string()).await
                } else {
                    Err(OrderError::Transient {
                        attempt,
                        reason: err.to_string(),
                    })
                }
            }
            Err(err) => {
                self.ledger.clear(&key);
                self.escalate(&err);
                Err(err)
            }
        }
    }

    async fn try_place(&self, command: &PlaceOrderCommand) -> Result<Placement, OrderError> {
        if let Some(existing) = self
            .bounded(self.store.get_by_idempotency_key(&command.idempotency_key))
            .await?
        {
            return Ok(Placement::Duplicate(existing));
        }

        let order = Order::from_command(command, OrderStatus::Placed, self.clock.now());
        match self.bounded(self.store.create(&order)).await {
            Ok(()) => Ok(Placement::Created(order)),
            Err(StoreError::Duplicate(_)) => self
                .reread_existing(&command.idempotency_key)
                .await
                .map(Placement::Duplicate),
            Err(err) => Err(err.into()),
        }
    }

    /// Record the command as a `Failed` order and notify operators.
    async fn record_failed(
        &self,
        command: &PlaceOrderCommand,
        last_error: &str,
    ) -> Result<Placement, OrderError> {
        let key = &command.idempotency_key;
        let attempts = self.ledger.attempts(key);
        let order = Order::from_command(command, OrderStatus::Failed, self.clock.now());

        let last_error = match self.bounded(self.store.create(&order)).await {
            Ok(()) => last_error.to_string(),
            Err(StoreError::Duplicate(_)) => {
                // Applied concurrently by another delivery.
                self.ledger.clear(key);
                return self.reread_existing(key).await.map(Placement::Duplicate);
            }
            Err(err) => {
                let err = OrderError::from(err);
                if err.is_fatal() {
                    self.ledger.clear(key);
                    self.escalate(&err);
                    return Err(err);
                }
                error!(error = %err, "Could not record order as failed");
                format!("{last_error}; failed order not recorded: {err}")
            }
        };

        self.ledger.clear(key);
        OrderMetrics::record_failed();
        let report = FailureReport {
            idempotency_key: key.clone(),
            order_id: order.id,
            user_id: order.user_id.clone(),
            attempts,
            last_error,
            at: order.created_at,
        };
        error!(
            order_id = %report.order_id,
            attempts = report.attempts,
            last_error = %report.last_error,
            "Order recorded as failed after exhausting retries"
        );
        if let Some(tx) = &self.failure_reports {
            if tx.send(report).is_err() {
                debug!("Failure report channel closed");
            }
        }
        Ok(Placement::Failed(order))
    }

    async fn reread_existing(&self, key: &IdempotencyKey) -> Result<Order, OrderError> {
        self.bounded(self.store.get_by_idempotency_key(key))
            .await?
            .ok_or_else(|| OrderError::Conflict(format!("idempotency key '{key}' collides with an unreadable order")))
    }

    /// Fetch an order by id.
    ///
    /// # Errors
    ///
    /// [`OrderError::NotFound`] if no such order exists; store errors otherwise.
    #[instrument(skip(self, id), fields(order_id = %id))]
    pub async fn get_order(&self, id: &OrderId) -> Result<Order, OrderError> {
        self.observe(async {
            self.bounded(self.store.get(id))
                .await?
                .ok_or_else(|| OrderError::NotFound(id.to_string()))
        })
        .await
    }

    /// Cancel a `Placed` order.
    ///
    /// # Errors
    ///
    /// - [`OrderError::NotFound`] if no such order exists
    /// - [`OrderError::InvalidState`] if the order is terminal, including when
    ///   a concurrent cancel won the race
    #[instrument(skip(self, id), fields(order_id = %id))]
    pub async fn cancel_order(&self, id: &OrderId) -> Result<Order, OrderError> {
        self.observe(async {
            let current = self
                .bounded(self.store.get(id))
                .await?
                .ok_or_else(|| OrderError::NotFound(id.to_string()))?;

            if !current.status.can_transition_to(OrderStatus::Cancelled) {
                return Err(OrderError::InvalidState {
                    id: *id,
                    status: current.status,
                });
            }

            match self
                .bounded(self.store.update_status(
                    id,
                    OrderStatus::Placed,
                    OrderStatus::Cancelled,
                    self.clock.now(),
                ))
                .await
            {
                Ok(order) => {
                    OrderMetrics::record_cancelled();
                    info!("Order cancelled");
                    Ok(order)
                }
                Err(StoreError::StatusMismatch { actual, .. }) => Err(OrderError::InvalidState {
                    id: *id,
                    status: actual,
                }),
                Err(StoreError::NotFound) => Err(OrderError::NotFound(id.to_string())),
                Err(err) => Err(err.into()),
            }
        })
        .await
    }

    /// All orders of a user, oldest first.
    ///
    /// # Errors
    ///
    /// Store errors only; an unknown user has no orders.
    #[instrument(skip(self, user_id), fields(user_id = %user_id))]
    pub async fn list_user_orders(&self, user_id: &UserId) -> Result<Vec<Order>, OrderError> {
        self.observe(async { Ok(self.bounded(self.store.list_by_user(user_id)).await?) })
            .await
    }

    /// Check that the store answers.
    ///
    /// # Errors
    ///
    /// The store error, mapped into the order taxonomy.
    pub async fn ping(&self) -> Result<(), OrderError> {
        self.observe(async { Ok(self.bounded(self.store.ping()).await?) })
            .await
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        tokio::time::timeout(self.store_timeout, call)
            .await
            .map_err(|_| StoreError::Timeout)?
    }

    async fn observe<T>(
        &self,
        operation: impl Future<Output = Result<T, OrderError>>,
    ) -> Result<T, OrderError> {
        let result = operation.await;
        if let Err(err) = &result {
            self.escalate(err);
        }
        result
    }

    fn escalate(&self, err: &OrderError) {
        if !err.is_fatal() {
            return;
        }
        match &self.events {
            Some(events) => events.fatal("order-store", err.to_string()),
            None => error!(error = %err, "Fatal store error with no supervisor attached"),
        }
    }
}
