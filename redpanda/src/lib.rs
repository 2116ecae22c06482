//! Redpanda message bus for the order intake service.
//!
//! This crate provides a [`MessageBus`] backed by rdkafka, so it works with
//! Redpanda or any other Kafka-compatible broker.
//!
//! # Delivery Semantics
//!
//! **At-least-once delivery** with manual offset commits:
//! - A message's offset is committed only after the consumer acknowledges
//!   the [`Delivery`]
//! - A delivery dropped without acknowledgement ends the subscription without
//!   committing; the next subscription (or the next instance in the consumer
//!   group) receives the message again
//! - One delivery is in flight per subscription, so messages of a partition
//!   are applied in order
//!
//! The Kafka message key carries the message id. Producers that publish
//! place-order commands set it to the idempotency key.
//!
//! # Example
//!
//! ```no_run
//! use order_intake_redpanda::RedpandaMessageBus;
//! use order_intake_core::MessageBus;
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = RedpandaMessageBus::builder()
//!     .brokers("localhost:9092")
//!     .consumer_group("order-service")
//!     .build()?;
//!
//! bus.publish("order.place", Some("k1"), br#"{"userID":"u1","items":[]}"#).await?;
//!
//! let mut stream = bus.subscribe("order.place").await?;
//! while let Some(result) = stream.next().await {
//!     let delivery = result?;
//!     println!("Received {} bytes", delivery.payload.len());
//!     delivery.ack();
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use order_intake_core::{BusError, Delivery, DeliveryStream, MessageBus};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::mpsc;

const DEFAULT_CONSUMER_GROUP: &str = "order-service";
const DEFAULT_OFFSET_RESET: &str = "earliest";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(6);

/// Redpanda message bus.
///
/// Holds one producer for the life of the bus; every call to
/// [`MessageBus::subscribe`] creates a fresh consumer in the configured
/// consumer group.
pub struct RedpandaMessageBus {
    producer: FutureProducer,
    brokers: String,
    timeout: Duration,
    consumer_group: String,
    auto_offset_reset: String,
    session_timeout: Duration,
}

impl RedpandaMessageBus {
    /// Create a bus with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::ConnectionFailed`] if the producer cannot be created.
    pub fn new(brokers: &str) -> Result<Self, BusError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a new builder for configuring the bus.
    #[must_use]
    pub fn builder() -> RedpandaMessageBusBuilder {
        RedpandaMessageBusBuilder::default()
    }

    /// Bootstrap servers this bus talks to
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    /// Consumer group used by subscriptions
    #[must_use]
    pub fn consumer_group(&self) -> &str {
        &self.consumer_group
    }

    fn consumer_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", &self.consumer_group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &self.auto_offset_reset)
            .set(
                "session.timeout.ms",
                self.session_timeout.as_millis().to_string(),
            )
            .set("enable.partition.eof", "false");
        config
    }
}

/// Builder for a [`RedpandaMessageBus`].
#[derive(Default)]
pub struct RedpandaMessageBusBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    timeout: Option<Duration>,
    consumer_group: Option<String>,
    auto_offset_reset: Option<String>,
    session_timeout: Option<Duration>,
}

impl RedpandaMessageBusBuilder {
    /// Comma-separated bootstrap servers (e.g. `"localhost:9092"`)
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Producer acknowledgement mode: `"0"`, `"1"` or `"all"`.
    ///
    /// Default: `"all"`
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Producer delivery timeout.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Consumer group shared by every instance of the service.
    ///
    /// Default: `"order-service"`
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Where a new consumer group starts reading: `"earliest"` or `"latest"`.
    ///
    /// Default: `"earliest"`, so commands published before the first
    /// instance started are not lost.
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Consumer group session timeout.
    ///
    /// Default: 6 seconds
    #[must_use]
    pub const fn session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = Some(timeout);
        self
    }

    /// Build the [`RedpandaMessageBus`].
    ///
    /// # Errors
    ///
    /// Returns [`BusError::ConnectionFailed`] if brokers are not set or the
    /// producer cannot be created.
    pub fn build(self) -> Result<RedpandaMessageBus, BusError> {
        let brokers = self
            .brokers
            .filter(|b| !b.trim().is_empty())
            .ok_or_else(|| BusError::ConnectionFailed("Brokers not configured".to_string()))?;
        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT);
        let acks = self.producer_acks.unwrap_or_else(|| "all".to_string());

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("acks", &acks)
            .create()
            .map_err(|e| BusError::ConnectionFailed(format!("Failed to create producer: {e}")))?;

        let bus = RedpandaMessageBus {
            producer,
            brokers,
            timeout,
            consumer_group: self
                .consumer_group
                .unwrap_or_else(|| DEFAULT_CONSUMER_GROUP.to_string()),
            auto_offset_reset: self
                .auto_offset_reset
                .unwrap_or_else(|| DEFAULT_OFFSET_RESET.to_string()),
            session_timeout: self.session_timeout.unwrap_or(DEFAULT_SESSION_TIMEOUT),
        };

        tracing::info!(
            brokers = %bus.brokers,
            acks = %acks,
            consumer_group = %bus.consumer_group,
            auto_offset_reset = %bus.auto_offset_reset,
            "RedpandaMessageBus created"
        );

        Ok(bus)
    }
}

/// Message key as the delivery's message id, if it is valid UTF-8.
fn message_id(message: &BorrowedMessage<'_>) -> Option<String> {
    message
        .key()
        .and_then(|key| std::str::from_utf8(key).ok())
        .filter(|key| !key.is_empty())
        .map(str::to_string)
}

impl MessageBus for RedpandaMessageBus {
    fn publish(
        &self,
        subject: &str,
        message_id: Option<&str>,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>> {
        let subject = subject.to_string();
        let key = message_id.map(str::to_string);
        let payload = payload.to_vec();
        let timeout = self.timeout;

        Box::pin(async move {
            let mut record = FutureRecord::<str, [u8]>::to(&subject).payload(&payload);
            if let Some(key) = key.as_deref() {
                record = record.key(key);
            }

            match self.producer.send(record, Timeout::After(timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        subject = %subject,
                        partition,
                        offset,
                        message_id = ?key,
                        "Message published"
                    );
                    Ok(())
                }
                Err((kafka_error, _)) => {
                    tracing::error!(subject = %subject, error = %kafka_error, "Failed to publish message");
                    Err(BusError::PublishFailed {
                        subject,
                        reason: kafka_error.to_string(),
                    })
                }
            }
        })
    }

    fn subscribe(
        &self,
        subject: &str,
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryStream, BusError>> + Send + '_>> {
        let subject = subject.to_string();
        let config = self.consumer_config();
        let consumer_group = self.consumer_group.clone();

        Box::pin(async move {
            let consumer: StreamConsumer =
                config.create().map_err(|e| BusError::SubscriptionFailed {
                    subject: subject.clone(),
                    reason: format!("Failed to create consumer: {e}"),
                })?;

            consumer
                .subscribe(&[subject.as_str()])
                .map_err(|e| BusError::SubscriptionFailed {
                    subject: subject.clone(),
                    reason: format!("Failed to subscribe: {e}"),
                })?;

            tracing::info!(
                subject = %subject,
                consumer_group = %consumer_group,
                manual_commit = true,
                "Subscribed to topic"
            );

            // Capacity 1: the next message is only fetched once the previous
            // delivery has been acknowledged.
            let (tx, mut rx) = mpsc::channel(1);
            tokio::spawn(forward_deliveries(consumer, subject, tx));

            let stream = async_stream::stream! {
                while let Some(item) = rx.recv().await {
                    yield item;
                }
            };
            Ok(Box::pin(stream) as DeliveryStream)
        })
    }
}

/// Owns the consumer: forwards each message as a [`Delivery`] and commits
/// its offset once the delivery is acknowledged.
async fn forward_deliveries(
    consumer: StreamConsumer,
    subject: String,
    tx: mpsc::Sender<Result<Delivery, BusError>>,
) {
    use futures::StreamExt;

    let mut stream = consumer.stream();

    loop {
        let next = tokio::select! {
            () = tx.closed() => break,
            next = stream.next() => next,
        };
        let Some(result) = next else { break };

        let message = match result {
            Ok(message) => message,
            Err(e) => {
                let err = BusError::TransportError(format!("Failed to receive message: {e}"));
                if tx.send(Err(err)).await.is_err() {
                    break;
                }
                continue;
            }
        };

        let (delivery, acked) = Delivery::with_ack(
            subject.clone(),
            message_id(&message),
            message.payload().unwrap_or_default().to_vec(),
        );

        tracing::trace!(
            subject = %subject,
            partition = message.partition(),
            offset = message.offset(),
            "Received message"
        );

        if tx.send(Ok(delivery)).await.is_err() {
            break;
        }

        if acked.await.is_err() {
            // Dropped unacknowledged. Stop without committing; offsets after
            // this one must not be committed either.
            tracing::debug!(
                subject = %subject,
                partition = message.partition(),
                offset = message.offset(),
                "Delivery dropped without acknowledgement, closing subscription"
            );
            break;
        }

        if let Err(e) = consumer.commit_message(&message, CommitMode::Async) {
            tracing::warn!(
                subject = %subject,
                partition = message.partition(),
                offset = message.offset(),
                error = %e,
                "Failed to commit offset (message may be redelivered)"
            );
        }
    }

    tracing::debug!(subject = %subject, "Consumer task exiting");
}
