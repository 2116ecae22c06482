//! In-memory message bus with at-least-once delivery.

use futures::StreamExt;
use order_intake_core::{BusError, Delivery, DeliveryStream, MessageBus};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

#[derive(Debug, Clone)]
struct Message {
    message_id: Option<String>,
    payload: Vec<u8>,
}

struct Topic {
    tx: mpsc::UnboundedSender<Message>,
    rx: Option<mpsc::UnboundedReceiver<Message>>,
}

impl Topic {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx: Some(rx) }
    }
}

#[derive(Default)]
struct Counters {
    acked: AtomicUsize,
    redelivered: AtomicUsize,
    notify: Notify,
}

/// In-memory message bus for tests.
///
/// Each subject is a queue with a single subscriber. Messages published
/// before the subscription are buffered. A delivery dropped without being
/// acknowledged goes back on its queue, which mirrors an uncommitted offset
/// being redelivered by a real broker.
///
/// # Example
///
/// ```ignore
/// let bus = InMemoryMessageBus::new();
/// bus.publish("order.place", Some("k1"), &payload).await?;
/// let mut stream = bus.subscribe("order.place").await?;
/// let delivery = stream.next().await.unwrap()?;
/// delivery.ack();
/// assert!(bus.wait_for_acks(1, Duration::from_secs(1)).await);
/// ```
#[derive(Default)]
pub struct InMemoryMessageBus {
    topics: Mutex<HashMap<String, Topic>>,
    counters: Arc<Counters>,
    subscribe_failures: AtomicU32,
}

impl InMemoryMessageBus {
    /// Create an empty bus
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` calls to `subscribe` fail
    pub fn fail_next_subscribes(&self, n: u32) {
        self.subscribe_failures.store(n, Ordering::SeqCst);
    }

    /// Number of acknowledged deliveries
    #[must_use]
    pub fn acked_count(&self) -> usize {
        self.counters.acked.load(Ordering::SeqCst)
    }

    /// Number of deliveries dropped unacknowledged and queued again
    #[must_use]
    pub fn redelivered_count(&self) -> usize {
        self.counters.redelivered.load(Ordering::SeqCst)
    }

    /// Wait until at least `n` deliveries were acknowledged.
    ///
    /// Returns `false` if `timeout` elapses first.
    pub async fn wait_for_acks(&self, n: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.counters.notify.notified();
            if self.acked_count() >= n {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.acked_count() >= n;
            }
        }
    }

    fn with_topic<R>(&self, subject: &str, f: impl FnOnce(&mut Topic) -> R) -> R {
        let mut topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        let topic = topics.entry(subject.to_string()).or_insert_with(Topic::new);
        f(topic)
    }
}

impl MessageBus for InMemoryMessageBus {
    fn publish(
        &self,
        subject: &str,
        message_id: Option<&str>,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>> {
        let message = Message {
            message_id: message_id.map(str::to_string),
            payload: payload.to_vec(),
        };
        let result = self.with_topic(subject, |topic| topic.tx.send(message)).map_err(|_| {
            BusError::PublishFailed {
                subject: subject.to_string(),
                reason: "queue closed".to_string(),
            }
        });
        Box::pin(async move { result })
    }

    fn subscribe(
        &self,
        subject: &str,
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryStream, BusError>> + Send + '_>> {
        let subject = subject.to_string();
        Box::pin(async move {
            let injected = self
                .subscribe_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if injected {
                return Err(BusError::SubscriptionFailed {
                    subject,
                    reason: "injected subscribe failure".to_string(),
                });
            }

            let (tx, rx) = self.with_topic(&subject, |topic| (topic.tx.clone(), topic.rx.take()));
            let mut rx = rx.ok_or_else(|| BusError::SubscriptionFailed {
                subject: subject.clone(),
                reason: "subject already has a subscriber".to_string(),
            })?;
            let counters = Arc::clone(&self.counters);

            let stream = async_stream::stream! {
                while let Some(message) = rx.recv().await {
                    let (delivery, ack) = Delivery::with_ack(
                        subject.clone(),
                        message.message_id.clone(),
                        message.payload.clone(),
                    );
                    let tx = tx.clone();
                    let counters = Arc::clone(&counters);
                    tokio::spawn(async move {
                        if ack.await.is_ok() {
                            counters.acked.fetch_add(1, Ordering::SeqCst);
                        } else {
                            counters.redelivered.fetch_add(1, Ordering::SeqCst);
                            let _ = tx.send(message);
                        }
                        counters.notify.notify_waiters();
                    });
                    yield Ok(delivery);
                }
            };
            Ok(stream.boxed())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn buffered_messages_are_delivered_after_subscribe() {
        let bus = InMemoryMessageBus::new();
        bus.publish("orders", Some("k1"), b"one").await.unwrap();

        let mut stream = bus.subscribe("orders").await.unwrap();
        let delivery = stream.next().await.unwrap().unwrap();
        assert_eq!(delivery.payload, b"one");
        assert_eq!(delivery.message_id.as_deref(), Some("k1"));

        delivery.ack();
        assert!(bus.wait_for_acks(1, Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn unacked_delivery_is_redelivered() {
        let bus = InMemoryMessageBus::new();
        bus.publish("orders", None, b"one").await.unwrap();
        let mut stream = bus.subscribe("orders").await.unwrap();

        drop(stream.next().await.unwrap().unwrap());
        let again = stream.next().await.unwrap().unwrap();
        assert_eq!(again.payload, b"one");
        assert_eq!(bus.redelivered_count(), 1);
    }

    #[tokio::test]
    async fn second_subscriber_is_rejected() {
        let bus = InMemoryMessageBus::new();
        let _first = bus.subscribe("orders").await.unwrap();
        assert!(bus.subscribe("orders").await.is_err());
    }

    #[tokio::test]
    async fn injected_subscribe_failures_are_consumed() {
        let bus = InMemoryMessageBus::new();
        bus.fail_next_subscribes(1);
        assert!(bus.subscribe("orders").await.is_err());
        assert!(bus.subscribe("orders").await.is_ok());
    }
}
