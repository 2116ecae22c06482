//! Place-order bus consumer.
//!
//! Subscribe-process-reconnect loop:
//!
//! ```text
//! loop {
//!     subscribe(subject)            (retry after reconnect_delay on failure)
//!     for each delivery {
//!         decode                    (failure: warn, count, ack, next)
//!         place_order               (transient: back off, retry same command)
//!         ack                       (only after a definitive outcome)
//!     }
//!     stream ended                  (reconnect after reconnect_delay)
//! }
//! ```
//!
//! The loop exits on the shutdown broadcast, or on a fatal error, which is
//! reported to the supervisor. A delivery that is not acknowledged when the
//! loop exits is redelivered by the bus.

use crate::metrics::OrderMetrics;
use crate::orchestrator::Orchestrator;
use crate::retry::RetryPolicy;
use crate::shutdown::ServiceEvents;
use futures::StreamExt;
use order_intake_core::{Delivery, DeliveryStream, MessageBus, decode_place_order};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Outcome of processing part of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    StreamEnded,
    Shutdown,
    Fatal,
}

/// Consumes place-order commands and hands them to the [`Orchestrator`].
///
/// # Example
///
/// ```rust,ignore
/// let consumer = PlaceOrderConsumer::new("order.place", bus, orchestrator, shutdown_rx)
///     .with_service_events(supervisor.events())
///     .with_reconnect_delay(Duration::from_secs(5));
///
/// supervisor.spawn("consumer", consumer.run());
/// ```
pub struct PlaceOrderConsumer {
    subject: String,
    bus: Arc<dyn MessageBus>,
    orchestrator: Arc<Orchestrator>,
    shutdown: broadcast::Receiver<()>,
    events: Option<ServiceEvents>,
    reconnect_delay: Duration,
    backoff: RetryPolicy,
}

impl PlaceOrderConsumer {
    /// Create a consumer for `subject`.
    ///
    /// Defaults: reconnect after 5 seconds; placement backoff from 100ms
    /// doubling up to 10 seconds with jitter.
    #[must_use]
    pub fn new(
        subject: impl Into<String>,
        bus: Arc<dyn MessageBus>,
        orchestrator: Arc<Orchestrator>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            subject: subject.into(),
            bus,
            orchestrator,
            shutdown,
            events: None,
            reconnect_delay: Duration::from_secs(5),
            backoff: RetryPolicy::builder()
                .max_delay(Duration::from_secs(10))
                .jitter(true)
                .build(),
        }
    }

    /// Report fatal errors to the supervisor.
    #[must_use]
    pub fn with_service_events(mut self, events: ServiceEvents) -> Self {
        self.events = Some(events);
        self
    }

    /// Delay before resubscribing after a failure or stream end.
    #[must_use]
    pub const fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Backoff between attempts of the same command.
    #[must_use]
    pub fn with_backoff(mut self, backoff: RetryPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Run until shutdown or a fatal error.
    pub async fn run(mut self) {
        info!(subject = %self.subject, "Place-order consumer started");

        loop {
            let subscribed = tokio::select! {
                _ = self.shutdown.recv() => break,
                result = self.bus.subscribe(&self.subject) => result,
            };

            match subscribed {
                Ok(mut stream) => {
                    info!(subject = %self.subject, "Subscribed to message bus");
                    match self.process_stream(&mut stream).await {
                        Flow::Shutdown | Flow::Fatal => break,
                        Flow::StreamEnded | Flow::Continue => {
                            warn!(
                                subject = %self.subject,
                                "Message stream ended, reconnecting in {:?}",
                                self.reconnect_delay
                            );
                        }
                    }
                }
                Err(e) => {
                    error!(
                        subject = %self.subject,
                        error = %e,
                        "Failed to subscribe to message bus, retrying in {:?}",
                        self.reconnect_delay
                    );
                }
            }

            if self.pause(self.reconnect_delay).await == Flow::Shutdown {
                break;
            }
        }

        info!(subject = %self.subject, "Place-order consumer stopped");
    }

    async fn process_stream(&mut self, stream: &mut DeliveryStream) -> Flow {
        loop {
            let next = tokio::select! {
                _ = self.shutdown.recv() => return Flow::Shutdown,
                next = stream.next() => next,
            };

            match next {
                Some(Ok(delivery)) => match self.handle_delivery(delivery).await {
                    Flow::Continue => {}
                    other => return other,
                },
                Some(Err(e)) => {
                    error!(subject = %self.subject, error = %e, "Error receiving message");
                }
                None => return Flow::StreamEnded,
            }
        }
    }

    async fn handle_delivery(&mut self, delivery: Delivery) -> Flow {
        let command = match decode_place_order(&delivery.payload, delivery.message_id.as_deref()) {
            Ok(command) => command,
            Err(e) => {
                warn!(
                    subject = %self.subject,
                    message_id = ?delivery.message_id,
                    error = %e,
                    "Rejecting undecodable place-order message"
                );
                OrderMetrics::record_rejected(e.reason());
                delivery.ack();
                return Flow::Continue;
            }
        };

        let mut attempt = 0;
        loop {
            match self.orchestrator.place_order(command.clone()).await {
                Ok(placement) => {
                    info!(
                        idempotency_key = %command.idempotency_key,
                        order_id = %placement.order().id,
                        outcome = placement.label(),
                        "Place-order message applied"
                    );
                    delivery.ack();
                    return Flow::Continue;
                }
                Err(e) if e.is_transient() => {
                    let delay = self.backoff.delay_for_attempt(attempt);
                    attempt = attempt.saturating_add(1);
                    warn!(
                        idempotency_key = %command.idempotency_key,
                        error = %e,
                        "Placement failed transiently, retrying in {:?}",
                        delay
                    );
                    if self.pause(delay).await == Flow::Shutdown {
                        // Unacknowledged: the bus redelivers it.
                        return Flow::Shutdown;
                    }
                }
                Err(e) if e.is_fatal() => {
                    match &self.events {
                        Some(events) => events.fatal("consumer", e.to_string()),
                        None => error!(
                            idempotency_key = %command.idempotency_key,
                            error = %e,
                            "Fatal placement error with no supervisor attached"
                        ),
                    }
                    return Flow::Fatal;
                }
                Err(e) => {
                    error!(
                        idempotency_key = %command.idempotency_key,
                        error = %e,
                        "Place-order message could not be applied, dropping"
                    );
                    delivery.ack();
                    return Flow::Continue;
                }
            }
        }
    }

    /// Sleep for `delay` unless shutdown arrives first.
    async fn pause(&mut self, delay: Duration) -> Flow {
        tokio::select! {
            _ = self.shutdown.recv() => Flow::Shutdown,
            () = tokio::time::sleep(delay) => Flow::Continue,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use order_intake_core::{IdempotencyKey, OrderStatus, OrderStore, encode_place_order};
    use order_intake_testing::{
        FlakyOrderStore, InMemoryMessageBus, InMemoryOrderStore, sample_command, stepping_clock,
    };

    const SUBJECT: &str = "order.place";

    fn fast_backoff() -> RetryPolicy {
        RetryPolicy::builder()
            .initial_delay(Duration::from_millis(1))
            .max_delay(Duration::from_millis(5))
            .build()
    }

    #[tokio::test]
    async fn test_malformed_message_is_acked_and_skipped() {
        let bus = Arc::new(InMemoryMessageBus::new());
        let store = Arc::new(InMemoryOrderStore::new());
        let orchestrator = Arc::new(Orchestrator::new(store.clone()).with_clock(Arc::new(stepping_clock())));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        bus.publish(SUBJECT, None, b"{not json").await.unwrap();
        let payload = encode_place_order(&sample_command("k1", "u1")).unwrap();
        bus.publish(SUBJECT, None, &payload).await.unwrap();

        let consumer = PlaceOrderConsumer::new(SUBJECT, bus.clone(), orchestrator, shutdown_rx)
            .with_backoff(fast_backoff());
        let handle = tokio::spawn(consumer.run());

        assert!(bus.wait_for_acks(2, Duration::from_secs(2)).await);
        let order = store
            .get_by_idempotency_key(&IdempotencyKey::new("k1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(order.status, OrderStatus::Placed);

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_consumer_resubscribes_after_failure() {
        let bus = Arc::new(InMemoryMessageBus::new());
        bus.fail_next_subscribes(2);
        let store = Arc::new(InMemoryOrderStore::new());
        let orchestrator = Arc::new(Orchestrator::new(store.clone()));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let payload = encode_place_order(&sample_command("k1", "u1")).unwrap();
        bus.publish(SUBJECT, None, &payload).await.unwrap();

        let consumer = PlaceOrderConsumer::new(SUBJECT, bus.clone(), orchestrator, shutdown_rx)
            .with_reconnect_delay(Duration::from_millis(5));
        let handle = tokio::spawn(consumer.run());

        assert!(bus.wait_for_acks(1, Duration::from_secs(2)).await);
        assert_eq!(store.len().await, 1);

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_stops_idle_consumer() {
        let bus = Arc::new(InMemoryMessageBus::new());
        let orchestrator = Arc::new(Orchestrator::new(Arc::new(InMemoryOrderStore::new())));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = tokio::spawn(PlaceOrderConsumer::new(SUBJECT, bus, orchestrator, shutdown_rx).run());
        tokio::task::yield_now().await;
        shutdown_tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_fatal_error_without_supervisor_stops_consumer_unacked() {
        let bus = Arc::new(InMemoryMessageBus::new());
        let store = Arc::new(FlakyOrderStore::new());
        store.set_lost(true);
        let orchestrator = Arc::new(Orchestrator::new(store));
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let payload = encode_place_order(&sample_command("k1", "u1")).unwrap();
        bus.publish(SUBJECT, None, &payload).await.unwrap();

        let handle = tokio::spawn(PlaceOrderConsumer::new(SUBJECT, bus.clone(), orchestrator, shutdown_rx).run());

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(bus.acked_count(), 0);
    }

    #[tokio::test]
    async fn test_rejected_command_is_acked_once_recorded_failed() {
        let bus = Arc::new(InMemoryMessageBus::new());
        let store = Arc::new(FlakyOrderStore::new());
        store.set_rejecting(true);
        let orchestrator = Arc::new(Orchestrator::new(store).with_retry_ceiling(3));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let payload = encode_place_order(&sample_command("k1", "u1")).unwrap();
        bus.publish(SUBJECT, None, &payload).await.unwrap();

        let consumer = PlaceOrderConsumer::new(SUBJECT, bus.clone(), orchestrator.clone(), shutdown_rx)
            .with_backoff(fast_backoff());
        let handle = tokio::spawn(consumer.run());

        assert!(bus.wait_for_acks(1, Duration::from_secs(2)).await);
        assert!(orchestrator.ledger().is_empty());

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
