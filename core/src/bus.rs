//! Message bus abstraction for place-order commands.
//!
//! The bus delivers raw messages with **at-least-once** semantics. Each
//! [`Delivery`] carries an acknowledgement handle; implementations only
//! advance their committed position after the consumer acknowledges, so a
//! crash between receipt and acknowledgement leads to redelivery.
//!
//! ```text
//! ┌──────────────┐   Delivery    ┌──────────────┐   ack()   ┌──────────────┐
//! │  Bus (topic) │ ────────────► │   Consumer   │ ────────► │ commit offset│
//! └──────────────┘               └──────┬───────┘           └──────────────┘
//!                                       │ place_order
//!                                       ▼
//!                                ┌──────────────┐
//!                                │ Orchestrator │
//!                                └──────────────┘
//! ```
//!
//! # Implementations
//!
//! - `InMemoryMessageBus` (testing crate) - for tests
//! - `RedpandaMessageBus` (redpanda crate) - for production (Kafka-compatible)

use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use tokio::sync::oneshot;

/// Errors that can occur during message bus operations.
#[derive(Error, Debug, Clone)]
pub enum BusError {
    /// Failed to connect to the bus
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish a message
    #[error("Publish failed for subject '{subject}': {reason}")]
    PublishFailed {
        /// The subject that failed
        subject: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe
    #[error("Subscription failed for subject '{subject}': {reason}")]
    SubscriptionFailed {
        /// The subject that failed to subscribe
        subject: String,
        /// The reason for failure
        reason: String,
    },

    /// Network or transport error while receiving
    #[error("Transport error: {0}")]
    TransportError(String),
}

/// One message received from a subscription.
#[derive(Debug)]
pub struct Delivery {
    /// Subject (topic) the message arrived on
    pub subject: String,
    /// Bus-assigned or producer-supplied message id (Kafka message key)
    pub message_id: Option<String>,
    /// Raw payload bytes
    pub payload: Vec<u8>,
    acker: Option<oneshot::Sender<()>>,
}

impl Delivery {
    /// A delivery that needs no acknowledgement.
    #[must_use]
    pub fn new(subject: impl Into<String>, message_id: Option<String>, payload: Vec<u8>) -> Self {
        Self {
            subject: subject.into(),
            message_id,
            payload,
            acker: None,
        }
    }

    /// A delivery whose acknowledgement is observed through the returned receiver.
    ///
    /// The receiver resolves with `Ok(())` on [`Delivery::ack`] and with an error
    /// if the delivery is dropped unacknowledged.
    #[must_use]
    pub fn with_ack(
        subject: impl Into<String>,
        message_id: Option<String>,
        payload: Vec<u8>,
    ) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        let delivery = Self {
            subject: subject.into(),
            message_id,
            payload,
            acker: Some(tx),
        };
        (delivery, rx)
    }

    /// Acknowledge the message; it will not be redelivered.
    pub fn ack(mut self) {
        if let Some(acker) = self.acker.take() {
            // Receiver gone means the subscription already ended.
            let _ = acker.send(());
        }
    }
}

/// Stream of deliveries from a subscription.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery, BusError>> + Send>>;

/// Trait for message bus implementations.
///
/// Uses explicit `Pin<Box<dyn Future>>` returns so the bus can be held as
/// `Arc<dyn MessageBus>`.
pub trait MessageBus: Send + Sync {
    /// Publish a message to a subject.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::PublishFailed`] if the publish operation fails.
    fn publish(
        &self,
        subject: &str,
        message_id: Option<&str>,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>>;

    /// Subscribe to a subject and receive a stream of deliveries.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::SubscriptionFailed`] if subscription fails.
    fn subscribe(
        &self,
        subject: &str,
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryStream, BusError>> + Send + '_>>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ack_resolves_receiver() {
        let (delivery, rx) = Delivery::with_ack("order.place", None, b"{}".to_vec());
        delivery.ack();
        assert!(rx.await.is_ok());
    }

    #[tokio::test]
    async fn dropped_delivery_is_not_acknowledged() {
        let (delivery, rx) = Delivery::with_ack("order.place", None, b"{}".to_vec());
        drop(delivery);
        assert!(rx.await.is_err());
    }

    #[test]
    fn plain_delivery_ack_is_noop() {
        Delivery::new("order.place", Some("m1".into()), vec![]).ack();
    }
}
