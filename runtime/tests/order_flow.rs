//! End-to-end behaviour of the orchestrator and consumer over in-memory doubles.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use order_intake_core::{
    IdempotencyKey, MessageBus, OrderError, OrderId, OrderStatus, OrderStore, UserId,
    encode_place_order,
};
use order_intake_runtime::{Orchestrator, Placement, PlaceOrderConsumer, RetryPolicy};
use order_intake_testing::{
    FlakyOrderStore, InMemoryMessageBus, InMemoryOrderStore, sample_command, stepping_clock,
};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

const SUBJECT: &str = "order.place";

fn orchestrator(store: Arc<dyn OrderStore>) -> Orchestrator {
    Orchestrator::new(store).with_clock(Arc::new(stepping_clock()))
}

fn fast_backoff() -> RetryPolicy {
    RetryPolicy::builder()
        .initial_delay(Duration::from_millis(1))
        .max_delay(Duration::from_millis(2))
        .build()
}

// ============================================================================
// Orchestrator
// ============================================================================

#[tokio::test]
async fn example_flow_place_redeliver_cancel() {
    let store = Arc::new(InMemoryOrderStore::new());
    let orchestrator = orchestrator(store.clone());

    let placed = orchestrator
        .place_order(sample_command("k1", "u1"))
        .await
        .unwrap()
        .into_order();
    assert_eq!(placed.status, OrderStatus::Placed);
    assert_eq!(placed.total().minor(), 20);

    let redelivered = orchestrator.place_order(sample_command("k1", "u1")).await.unwrap();
    assert_eq!(redelivered, Placement::Duplicate(placed.clone()));
    assert_eq!(store.len().await, 1);

    let fetched = orchestrator.get_order(&placed.id).await.unwrap();
    assert_eq!(fetched, placed);

    let cancelled = orchestrator.cancel_order(&placed.id).await.unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);

    assert!(matches!(
        orchestrator.cancel_order(&placed.id).await,
        Err(OrderError::InvalidState { status: OrderStatus::Cancelled, .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_duplicates_persist_one_order() {
    let store = Arc::new(InMemoryOrderStore::new());
    let orchestrator = Arc::new(orchestrator(store.clone()));

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(async move { orchestrator.place_order(sample_command("k1", "u1")).await })
        })
        .collect();

    let mut created = 0;
    let mut ids = Vec::new();
    for task in tasks {
        let placement = task.await.unwrap().unwrap();
        if matches!(placement, Placement::Created(_)) {
            created += 1;
        }
        ids.push(placement.order().id);
    }

    assert_eq!(created, 1);
    assert!(ids.iter().all(|id| *id == ids[0]));
    assert_eq!(store.len().await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_cancels_have_exactly_one_winner() {
    let orchestrator = Arc::new(orchestrator(Arc::new(InMemoryOrderStore::new())));
    let order = orchestrator
        .place_order(sample_command("k1", "u1"))
        .await
        .unwrap()
        .into_order();

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let orchestrator = Arc::clone(&orchestrator);
            let id = order.id;
            tokio::spawn(async move { orchestrator.cancel_order(&id).await })
        })
        .collect();

    let mut winners = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(order) => {
                assert_eq!(order.status, OrderStatus::Cancelled);
                winners += 1;
            }
            Err(OrderError::InvalidState { status, .. }) => {
                assert_eq!(status, OrderStatus::Cancelled);
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn list_is_ordered_by_creation_under_concurrent_placements() {
    let orchestrator = Arc::new(orchestrator(Arc::new(InMemoryOrderStore::new())));

    let tasks: Vec<_> = (0..32)
        .map(|i| {
            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(async move {
                orchestrator
                    .place_order(sample_command(&format!("k{i}"), "u1"))
                    .await
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let orders = orchestrator.list_user_orders(&UserId::new("u1")).await.unwrap();
    assert_eq!(orders.len(), 32);
    assert!(orders.windows(2).all(|w| w[0].created_at <= w[1].created_at));
    assert!(orchestrator.list_user_orders(&UserId::new("nobody")).await.unwrap().is_empty());
}

#[tokio::test]
async fn cancel_of_unknown_order_is_not_found() {
    let orchestrator = orchestrator(Arc::new(InMemoryOrderStore::new()));
    let id = OrderId::for_key(&IdempotencyKey::new("never-placed"));
    assert!(matches!(
        orchestrator.cancel_order(&id).await,
        Err(OrderError::NotFound(_))
    ));
}

#[derive(Debug, Clone)]
enum Op {
    Place(u8),
    Cancel(u8),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![(0..4u8).prop_map(Op::Place), (0..4u8).prop_map(Op::Cancel)]
}

proptest! {
    #[test]
    fn observed_status_transitions_are_monotonic(ops in prop::collection::vec(op(), 1..40)) {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        runtime.block_on(async {
            let orchestrator = orchestrator(Arc::new(InMemoryOrderStore::new()));
            let mut last_seen: [Option<OrderStatus>; 4] = [None; 4];

            for op in ops {
                let (slot, result) = match op {
                    Op::Place(k) => (
                        k,
                        orchestrator
                            .place_order(sample_command(&format!("k{k}"), "u1"))
                            .await
                            .map(Placement::into_order),
                    ),
                    Op::Cancel(k) => {
                        let id = OrderId::for_key(&IdempotencyKey::new(format!("k{k}")));
                        (k, orchestrator.cancel_order(&id).await)
                    }
                };

                if let Ok(order) = result {
                    let slot = usize::from(slot);
                    if let Some(previous) = last_seen[slot] {
                        prop_assert!(
                            previous == order.status || previous.can_transition_to(order.status),
                            "illegal transition {previous} -> {}", order.status
                        );
                    }
                    last_seen[slot] = Some(order.status);
                }
            }
            Ok::<(), proptest::test_runner::TestCaseError>(())
        })?;
    }
}

// ============================================================================
// Consumer
// ============================================================================

struct Harness {
    bus: Arc<InMemoryMessageBus>,
    shutdown_tx: broadcast::Sender<()>,
    consumer: tokio::task::JoinHandle<()>,
}

impl Harness {
    fn start(orchestrator: Arc<Orchestrator>) -> Self {
        let bus = Arc::new(InMemoryMessageBus::new());
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let consumer = PlaceOrderConsumer::new(SUBJECT, bus.clone(), orchestrator, shutdown_rx)
            .with_backoff(fast_backoff())
            .with_reconnect_delay(Duration::from_millis(5));
        Self {
            bus,
            shutdown_tx,
            consumer: tokio::spawn(consumer.run()),
        }
    }

    async fn publish(&self, key: &str, user: &str) {
        let payload = encode_place_order(&sample_command(key, user)).unwrap();
        self.bus.publish(SUBJECT, Some(key), &payload).await.unwrap();
    }

    async fn stop(self) {
        self.shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), self.consumer)
            .await
            .unwrap()
            .unwrap();
    }
}

#[tokio::test]
async fn malformed_message_does_not_block_the_next_one() {
    let store = Arc::new(InMemoryOrderStore::new());
    let harness = Harness::start(Arc::new(orchestrator(store.clone())));

    harness.bus.publish(SUBJECT, None, br#"{"userID":"u1","items":[]}"#).await.unwrap();
    harness.publish("k2", "u1").await;

    assert!(harness.bus.wait_for_acks(2, Duration::from_secs(2)).await);
    assert_eq!(store.len().await, 1);
    assert!(store
        .get_by_idempotency_key(&IdempotencyKey::new("k2"))
        .await
        .unwrap()
        .is_some());

    harness.stop().await;
}

#[tokio::test]
async fn redelivered_message_is_applied_once() {
    let store = Arc::new(InMemoryOrderStore::new());
    let harness = Harness::start(Arc::new(orchestrator(store.clone())));

    harness.publish("k1", "u1").await;
    harness.publish("k1", "u1").await;

    assert!(harness.bus.wait_for_acks(2, Duration::from_secs(2)).await);
    assert_eq!(store.len().await, 1);

    harness.stop().await;
}

#[tokio::test]
async fn transient_failures_are_retried_until_success() {
    let store = Arc::new(FlakyOrderStore::failing_placements(2));
    let harness = Harness::start(Arc::new(orchestrator(store.clone()).with_retry_ceiling(5)));

    harness.publish("k1", "u1").await;

    assert!(harness.bus.wait_for_acks(1, Duration::from_secs(2)).await);
    assert_eq!(store.placement_attempts(), 3);
    let order = store
        .get_by_idempotency_key(&IdempotencyKey::new("k1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, OrderStatus::Placed);

    harness.stop().await;
}

#[tokio::test]
async fn retry_ceiling_records_failed_order_with_one_report() {
    let store = Arc::new(FlakyOrderStore::always_failing_placements());
    let (failures_tx, mut failures_rx) = mpsc::unbounded_channel();
    let orchestrator = orchestrator(store.clone())
        .with_retry_ceiling(3)
        .with_failure_reports(failures_tx);
    let harness = Harness::start(Arc::new(orchestrator));

    harness.publish("k1", "u1").await;
    assert!(harness.bus.wait_for_acks(1, Duration::from_secs(2)).await);

    let order = store
        .get_by_idempotency_key(&IdempotencyKey::new("k1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, OrderStatus::Failed);
    assert_eq!(store.placement_attempts(), 3);

    // Redelivery after the failure is recorded makes no further attempts.
    harness.publish("k1", "u1").await;
    assert!(harness.bus.wait_for_acks(2, Duration::from_secs(2)).await);
    assert_eq!(store.placement_attempts(), 3);

    let report = failures_rx.try_recv().unwrap();
    assert_eq!(report.idempotency_key, IdempotencyKey::new("k1"));
    assert_eq!(report.attempts, 3);
    assert!(failures_rx.try_recv().is_err());

    harness.stop().await;
}
