//! Bounded per-connection outbound queue.
//!
//! Producers never block. When the queue is full the oldest droppable event
//! makes room; critical events are always kept.

use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Notify;

/// Default capacity of a connection's outbound queue.
pub const OUTBOUND_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Urgency {
    /// State changes and protocol replies.
    Critical,
    /// Stale-tolerant deltas such as location updates.
    Droppable,
}

/// Implemented by frame types so the queue knows what it may drop.
pub trait Outbound {
    fn urgency(&self) -> Urgency;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Queued after evicting the oldest droppable event.
    DroppedOldest,
    /// The queue was full of critical events; the new droppable event was discarded.
    Discarded,
    Closed,
}

struct State<M> {
    events: VecDeque<(Urgency, M)>,
    closed: bool,
    dropped: u64,
}

pub struct OutboundQueue<M> {
    state: Mutex<State<M>>,
    ready: Notify,
    capacity: usize,
}

impl<M> OutboundQueue<M> {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(State {
                events: VecDeque::with_capacity(capacity),
                closed: false,
                dropped: 0,
            }),
            ready: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, event: M, urgency: Urgency) -> PushOutcome {
        let outcome = {
            let mut state = self.state.lock();
            if state.closed {
                return PushOutcome::Closed;
            }
            if state.events.len() < self.capacity {
                state.events.push_back((urgency, event));
                PushOutcome::Queued
            } else if let Some(pos) = state
                .events
                .iter()
                .position(|(u, _)| *u == Urgency::Droppable)
            {
                state.events.remove(pos);
                state.events.push_back((urgency, event));
                state.dropped += 1;
                PushOutcome::DroppedOldest
            } else if urgency == Urgency::Critical {
                state.events.push_back((urgency, event));
                PushOutcome::Queued
            } else {
                state.dropped += 1;
                PushOutcome::Discarded
            }
        };
        if matches!(outcome, PushOutcome::Queued | PushOutcome::DroppedOldest) {
            self.ready.notify_one();
        }
        outcome
    }

    /// Next event in enqueue order; `None` once closed and drained.
    pub async fn next(&self) -> Option<M> {
        loop {
            {
                let mut state = self.state.lock();
                if let Some((_, event)) = state.events.pop_front() {
                    return Some(event);
                }
                if state.closed {
                    return None;
                }
            }
            self.ready.notified().await;
        }
    }

    pub fn close(&self) {
        self.state.lock().closed = true;
        self.ready.notify_one();
    }

    pub fn len(&self) -> usize {
        self.state.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped(&self) -> u64 {
        self.state.lock().dropped
    }
}

impl<M: Outbound> OutboundQueue<M> {
    pub fn send(&self, event: M) -> PushOutcome {
        let urgency = event.urgency();
        self.push(event, urgency)
    }
}
