use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use super::outbound::{OUTBOUND_CAPACITY, Outbound, OutboundQueue, PushOutcome};

struct Registered<M> {
    connection_id: Uuid,
    queue: Arc<OutboundQueue<M>>,
    cancel: CancellationToken,
}

/// What a socket task needs after registering.
pub struct ConnectionHandle<M> {
    pub user_id: Uuid,
    pub connection_id: Uuid,
    pub queue: Arc<OutboundQueue<M>>,
    /// Fires when the connection is replaced or the service shuts down.
    pub cancel: CancellationToken,
}

/// Authenticated connections keyed by user id. At most one per user.
pub struct ConnectionHub<M> {
    connections: RwLock<HashMap<Uuid, Registered<M>>>,
    capacity: usize,
}

impl<M> Default for ConnectionHub<M> {
    fn default() -> Self {
        Self::new(OUTBOUND_CAPACITY)
    }
}

impl<M> ConnectionHub<M> {
    pub fn new(capacity: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// Registers a new connection for `user_id`, closing any previous one.
    pub fn register(&self, user_id: Uuid, parent: &CancellationToken) -> ConnectionHandle<M> {
        let connection_id = Uuid::new_v4();
        let queue = Arc::new(OutboundQueue::new(self.capacity));
        let cancel = parent.child_token();

        let previous = self.connections.write().insert(
            user_id,
            Registered {
                connection_id,
                queue: Arc::clone(&queue),
                cancel: cancel.clone(),
            },
        );
        if let Some(previous) = previous {
            info!(user_id = %user_id, replaced = %previous.connection_id, "Replacing realtime connection");
            previous.queue.close();
            previous.cancel.cancel();
        }

        ConnectionHandle {
            user_id,
            connection_id,
            queue,
            cancel,
        }
    }

    /// Removes the registration if it still belongs to `connection_id`.
    pub fn unregister(&self, user_id: Uuid, connection_id: Uuid) -> bool {
        let mut connections = self.connections.write();
        match connections.get(&user_id) {
            Some(current) if current.connection_id == connection_id => {
                if let Some(removed) = connections.remove(&user_id) {
                    removed.queue.close();
                }
                debug!(user_id = %user_id, connection_id = %connection_id, "Realtime connection unregistered");
                true
            }
            _ => false,
        }
    }

    pub fn is_connected(&self, user_id: Uuid) -> bool {
        self.connections.read().contains_key(&user_id)
    }

    pub fn connected(&self) -> usize {
        self.connections.read().len()
    }

    /// Closes every connection.
    pub fn close_all(&self) {
        let drained: Vec<_> = self.connections.write().drain().collect();
        for (_, registered) in drained {
            registered.queue.close();
            registered.cancel.cancel();
        }
    }
}

impl<M: Outbound> ConnectionHub<M> {
    /// Queues `event` for `user_id`. `None` when the user is not connected.
    pub fn send(&self, user_id: Uuid, event: M) -> Option<PushOutcome> {
        let queue = self
            .connections
            .read()
            .get(&user_id)
            .map(|r| Arc::clone(&r.queue))?;
        let outcome = queue.send(event);
        if outcome == PushOutcome::DroppedOldest || outcome == PushOutcome::Discarded {
            debug!(user_id = %user_id, ?outcome, "Outbound queue full");
        }
        Some(outcome)
    }

    /// Like [`send`](Self::send) but reports whether the event was accepted.
    pub fn deliver(&self, user_id: Uuid, event: M) -> bool {
        matches!(
            self.send(user_id, event),
            Some(PushOutcome::Queued | PushOutcome::DroppedOldest)
        )
    }
}
