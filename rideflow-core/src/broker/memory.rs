//! In-process [`MessageBus`] used by tests.
//!
//! Routes with AMQP topic semantics, spreads a queue's messages round-robin
//! over its consumers, and counts how every delivery was settled.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::topology::topic_matches;
use super::{
    Acknowledger, BrokerError, ConsumeSpec, Delivery, DeliveryStream, MessageBus, OutgoingMessage,
};

const CONSUMER_BUFFER: usize = 1024;

#[derive(Debug, Clone)]
pub struct Published {
    pub exchange: String,
    pub routing_key: String,
    pub payload: Bytes,
    pub priority: Option<u8>,
    pub correlation_id: Option<String>,
    pub confirm: bool,
}

impl Published {
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> T {
        serde_json::from_slice(&self.payload).unwrap()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub acked: usize,
    pub requeued: usize,
    pub rejected: usize,
    pub backlog: usize,
}

#[derive(Clone)]
struct Message {
    routing_key: String,
    payload: Bytes,
    correlation_id: Option<String>,
}

struct QueueState {
    exchange: &'static str,
    bindings: Vec<String>,
    consumers: Vec<(u64, mpsc::Sender<Delivery>)>,
    next: usize,
    backlog: VecDeque<(Message, bool)>,
    stats: QueueStats,
}

#[derive(Default)]
struct State {
    queues: HashMap<String, QueueState>,
    published: Vec<Published>,
    next_consumer: u64,
}

struct Inner {
    state: Mutex<State>,
    available: AtomicBool,
}

#[derive(Clone)]
pub struct MemoryBus {
    inner: Arc<Inner>,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                available: AtomicBool::new(true),
            }),
        }
    }

    /// Simulates a broker outage: publishes fail with `Unavailable`.
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<Published> {
        self.inner.state.lock().published.clone()
    }

    pub fn published_with_key(&self, routing_key: &str) -> Vec<Published> {
        self.published()
            .into_iter()
            .filter(|p| p.routing_key == routing_key)
            .collect()
    }

    pub fn stats(&self, queue: &str) -> QueueStats {
        let state = self.inner.state.lock();
        state
            .queues
            .get(queue)
            .map(|q| QueueStats {
                backlog: q.backlog.len(),
                ..q.stats
            })
            .unwrap_or_default()
    }

    /// Polls until a message with `routing_key` has been published.
    pub async fn wait_for(&self, routing_key: &str, within: Duration) -> Option<Published> {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            if let Some(p) = self.published_with_key(routing_key).pop() {
                return Some(p);
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Polls until `queue` has seen `count` settlements of any kind.
    pub async fn wait_settled(&self, queue: &str, count: usize, within: Duration) -> QueueStats {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            let stats = self.stats(queue);
            if stats.acked + stats.requeued + stats.rejected >= count
                || tokio::time::Instant::now() >= deadline
            {
                return stats;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

impl Inner {
    fn route(self: &Arc<Self>, exchange: &str, message: Message) {
        let mut state = self.state.lock();
        let targets: Vec<String> = state
            .queues
            .iter()
            .filter(|(_, q)| {
                q.exchange == exchange
                    && q.bindings
                        .iter()
                        .any(|b| topic_matches(b, &message.routing_key))
            })
            .map(|(name, _)| name.clone())
            .collect();
        for name in targets {
            if let Some(queue) = state.queues.get_mut(&name) {
                self.enqueue(&name, queue, message.clone(), false);
            }
        }
    }

    fn enqueue(self: &Arc<Self>, name: &str, queue: &mut QueueState, message: Message, redelivered: bool) {
        queue.consumers.retain(|(_, tx)| !tx.is_closed());
        if queue.consumers.is_empty() {
            queue.backlog.push_back((message, redelivered));
            return;
        }
        let slot = queue.next % queue.consumers.len();
        queue.next = queue.next.wrapping_add(1);
        let delivery = Delivery::new(
            message.payload.clone(),
            message.routing_key.clone(),
            message.correlation_id.clone(),
            redelivered,
            Box::new(MemoryAcker {
                bus: Arc::clone(self),
                queue: name.to_owned(),
                message: message.clone(),
            }),
        );
        if queue.consumers[slot].1.try_send(delivery).is_err() {
            queue.backlog.push_back((message, redelivered));
        }
    }

    fn settle(self: &Arc<Self>, queue_name: &str, message: Message, outcome: Outcome) {
        let mut state = self.state.lock();
        let Some(queue) = state.queues.get_mut(queue_name) else {
            return;
        };
        match outcome {
            Outcome::Ack => queue.stats.acked += 1,
            Outcome::Reject => queue.stats.rejected += 1,
            Outcome::Requeue => {
                queue.stats.requeued += 1;
                self.enqueue(queue_name, queue, message, true);
            }
        }
    }
}

enum Outcome {
    Ack,
    Requeue,
    Reject,
}

struct MemoryAcker {
    bus: Arc<Inner>,
    queue: String,
    message: Message,
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&self) -> Result<(), BrokerError> {
        self.bus.settle(&self.queue, self.message.clone(), Outcome::Ack);
        Ok(())
    }

    async fn nack(&self, requeue: bool) -> Result<(), BrokerError> {
        let outcome = if requeue {
            Outcome::Requeue
        } else {
            Outcome::Reject
        };
        self.bus.settle(&self.queue, self.message.clone(), outcome);
        Ok(())
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: OutgoingMessage,
    ) -> Result<(), BrokerError> {
        if !self.inner.available.load(Ordering::SeqCst) {
            return Err(BrokerError::Unavailable);
        }
        self.inner.state.lock().published.push(Published {
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
            payload: message.payload.clone(),
            priority: message.priority,
            correlation_id: message.correlation_id.clone(),
            confirm: message.confirm,
        });
        self.inner.route(
            exchange,
            Message {
                routing_key: routing_key.to_owned(),
                payload: message.payload,
                correlation_id: message.correlation_id,
            },
        );
        Ok(())
    }

    async fn consume(
        &self,
        spec: ConsumeSpec,
        cancel: CancellationToken,
    ) -> Result<DeliveryStream, BrokerError> {
        if !self.inner.available.load(Ordering::SeqCst) {
            return Err(BrokerError::Unavailable);
        }
        let (tx, rx) = mpsc::channel(CONSUMER_BUFFER);
        let consumer_id = {
            let mut state = self.inner.state.lock();
            state.next_consumer += 1;
            let consumer_id = state.next_consumer;
            let queue = state
                .queues
                .entry(spec.queue.clone())
                .or_insert_with(|| QueueState {
                    exchange: spec.exchange,
                    bindings: Vec::new(),
                    consumers: Vec::new(),
                    next: 0,
                    backlog: VecDeque::new(),
                    stats: QueueStats::default(),
                });
            for key in &spec.binding_keys {
                if !queue.bindings.contains(key) {
                    queue.bindings.push(key.clone());
                }
            }
            queue.consumers.push((consumer_id, tx));
            let backlog: Vec<_> = queue.backlog.drain(..).collect();
            for (message, redelivered) in backlog {
                self.inner
                    .enqueue(&spec.queue, queue, message, redelivered);
            }
            consumer_id
        };

        let inner = Arc::clone(&self.inner);
        let queue_name = spec.queue;
        tokio::spawn(async move {
            cancel.cancelled().await;
            let mut state = inner.state.lock();
            if let Some(queue) = state.queues.get_mut(&queue_name) {
                queue.consumers.retain(|(id, _)| *id != consumer_id);
            }
        });
        Ok(rx)
    }

    async fn close(&self) {
        self.set_available(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::topology::{self, RIDE_TOPIC};

    #[tokio::test]
    async fn test_topic_routing_and_settlement() {
        let bus = MemoryBus::new();
        let cancel = CancellationToken::new();
        let mut rx = bus
            .consume(topology::driver_matching(), cancel.clone())
            .await
            .unwrap();

        let msg = OutgoingMessage::json(&serde_json::json!({"n": 1})).unwrap();
        bus.publish(RIDE_TOPIC, "ride.request.ECONOMY", msg.clone())
            .await
            .unwrap();
        bus.publish(RIDE_TOPIC, "driver.status.ARRIVED", msg)
            .await
            .unwrap();

        let delivery = rx.recv().await.unwrap();
        assert_eq!(delivery.routing_key, "ride.request.ECONOMY");
        assert!(!delivery.redelivered);
        delivery.nack(true).await.unwrap();

        let again = rx.recv().await.unwrap();
        assert!(again.redelivered);
        again.ack().await.unwrap();

        let stats = bus.stats("driver_matching");
        assert_eq!((stats.acked, stats.requeued, stats.rejected), (1, 1, 0));
        assert!(rx.try_recv().is_err());
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_competing_consumers_share_a_queue() {
        let bus = MemoryBus::new();
        let cancel = CancellationToken::new();
        let mut a = bus
            .consume(topology::driver_matching(), cancel.clone())
            .await
            .unwrap();
        let mut b = bus
            .consume(topology::driver_matching(), cancel.clone())
            .await
            .unwrap();
        for _ in 0..2 {
            let msg = OutgoingMessage::json(&1).unwrap();
            bus.publish(RIDE_TOPIC, "ride.request.XL", msg).await.unwrap();
        }
        assert!(a.recv().await.is_some());
        assert!(b.recv().await.is_some());
        assert!(a.try_recv().is_err());
        assert!(b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_outage_fails_fast() {
        let bus = MemoryBus::new();
        bus.set_available(false);
        let msg = OutgoingMessage::json(&1).unwrap();
        let err = bus
            .publish(RIDE_TOPIC, "ride.request.XL", msg)
            .await
            .unwrap_err();
        assert!(err.is_unavailable());
        assert!(bus.published().is_empty());
    }
}
