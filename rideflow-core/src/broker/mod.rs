//! Broker adapter.
//!
//! Both services talk to each other only through a topic-routed broker. The
//! [`MessageBus`] trait is the whole contract the dispatch core relies on:
//! persistent JSON publishes with optional priority and publisher confirm, and
//! consumption from durable queues with explicit acknowledgement.
//!
//! [`AmqpBus`] implements it over RabbitMQ.

mod amqp;
#[cfg(test)]
pub mod memory;
pub mod topology;

pub use amqp::{AmqpBus, AmqpSettings};

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Upper bound of a single publish, confirm included.
pub const PUBLISH_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
pub enum BrokerError {
    /// The connection is down; a reconnect is in progress.
    #[error("broker unavailable")]
    Unavailable,
    #[error("publish timed out")]
    Timeout,
    #[error("publish was rejected by the broker")]
    Nacked,
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("amqp error: {0}")]
    Amqp(#[from] lapin::Error),
}

impl BrokerError {
    /// Errors that should be reported to HTTP callers as `503`.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            BrokerError::Unavailable | BrokerError::Timeout | BrokerError::Amqp(_)
        )
    }
}

/// A message ready to publish.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub payload: Bytes,
    pub priority: Option<u8>,
    pub correlation_id: Option<String>,
    /// Wait for the publisher confirm before reporting success.
    pub confirm: bool,
}

impl OutgoingMessage {
    pub fn json<T: Serialize>(body: &T) -> Result<Self, BrokerError> {
        Ok(Self {
            payload: Bytes::from(serde_json::to_vec(body)?),
            priority: None,
            correlation_id: None,
            confirm: true,
        })
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Do not wait for the publisher confirm.
    pub fn fire_and_forget(mut self) -> Self {
        self.confirm = false;
        self
    }
}

/// Queue declaration and binding for a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumeSpec {
    pub exchange: &'static str,
    pub queue: String,
    pub binding_keys: Vec<String>,
    pub prefetch: u16,
    pub durable: bool,
    pub auto_ack: bool,
}

/// Settles a delivery with the broker.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> Result<(), BrokerError>;
    async fn nack(&self, requeue: bool) -> Result<(), BrokerError>;
}

/// A consumed message. Must be settled with [`Delivery::ack`] or
/// [`Delivery::nack`]; dropping it leaves it un-acked until the channel closes.
pub struct Delivery {
    pub body: Bytes,
    pub routing_key: String,
    pub correlation_id: Option<String>,
    pub redelivered: bool,
    acker: Box<dyn Acknowledger>,
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("routing_key", &self.routing_key)
            .field("correlation_id", &self.correlation_id)
            .field("redelivered", &self.redelivered)
            .field("len", &self.body.len())
            .finish()
    }
}

impl Delivery {
    pub fn new(
        body: Bytes,
        routing_key: String,
        correlation_id: Option<String>,
        redelivered: bool,
        acker: Box<dyn Acknowledger>,
    ) -> Self {
        Self {
            body,
            routing_key,
            correlation_id,
            redelivered,
            acker,
        }
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    pub async fn ack(self) -> Result<(), BrokerError> {
        self.acker.ack().await
    }

    pub async fn nack(self, requeue: bool) -> Result<(), BrokerError> {
        self.acker.nack(requeue).await
    }
}

/// Deliveries of one subscription. Ends when the subscription's cancellation
/// token fires.
pub type DeliveryStream = mpsc::Receiver<Delivery>;

#[async_trait]
pub trait MessageBus: Send + Sync + 'static {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: OutgoingMessage,
    ) -> Result<(), BrokerError>;

    async fn consume(
        &self,
        spec: ConsumeSpec,
        cancel: CancellationToken,
    ) -> Result<DeliveryStream, BrokerError>;

    /// Best-effort teardown.
    async fn close(&self);
}

pub type SharedBus = Arc<dyn MessageBus>;

/// Acks a handled delivery, logging instead of failing when the channel is gone.
pub async fn settle(delivery: Delivery, outcome: Settlement) {
    let routing_key = delivery.routing_key.clone();
    let result = match outcome {
        Settlement::Ack => delivery.ack().await,
        Settlement::Requeue => delivery.nack(true).await,
        Settlement::Reject => delivery.nack(false).await,
    };
    if let Err(e) = result {
        tracing::warn!(routing_key = %routing_key, ?outcome, error = %e, "Failed to settle delivery");
    }
}

/// How a consumer finished with a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Ack,
    /// Negative ack, redeliver later.
    Requeue,
    /// Negative ack, drop.
    Reject,
}
