//! Driver selection and offer bookkeeping for the Driver-Location Service.

mod offers;
mod selection;

pub use offers::{Offer, OfferConflict, OfferReply, OfferTable, Resolution};
pub use selection::{Candidate, select_candidate};

use crate::broker::BrokerError;
use crate::stores::StoreError;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum MatchError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),
    #[error("shutting down")]
    ShuttingDown,
}

/// Cancelled rides remembered so a late ride request is not matched.
const RECENTLY_CANCELLED: usize = 4096;

#[derive(Default)]
struct InFlightState {
    running: HashMap<Uuid, CancellationToken>,
    cancelled: HashSet<Uuid>,
    cancelled_order: VecDeque<Uuid>,
}

/// Rides this replica is currently matching.
#[derive(Default)]
pub struct InFlightRides {
    state: Mutex<InFlightState>,
}

#[derive(Debug)]
pub enum Begin {
    Started(InFlightGuard),
    /// A cancellation for this ride was already seen.
    Cancelled,
    /// Another task on this replica is matching the ride.
    Duplicate,
}

/// Removes the ride from [`InFlightRides`] when dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    rides: Arc<InFlightRides>,
    ride_id: Uuid,
    token: CancellationToken,
}

impl InFlightGuard {
    /// Fires when the ride is cancelled or the service shuts down.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.rides.state.lock().running.remove(&self.ride_id);
    }
}

impl std::fmt::Debug for InFlightRides {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("InFlightRides")
            .field("running", &state.running.len())
            .field("cancelled", &state.cancelled.len())
            .finish()
    }
}

impl InFlightRides {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn begin(self: &Arc<Self>, ride_id: Uuid, parent: &CancellationToken) -> Begin {
        let mut state = self.state.lock();
        if state.cancelled.contains(&ride_id) {
            return Begin::Cancelled;
        }
        if state.running.contains_key(&ride_id) {
            return Begin::Duplicate;
        }
        let token = parent.child_token();
        state.running.insert(ride_id, token.clone());
        Begin::Started(InFlightGuard {
            rides: Arc::clone(self),
            ride_id,
            token,
        })
    }

    /// Stops matching `ride_id`. Returns `true` if a match was running.
    pub fn cancel(&self, ride_id: Uuid) -> bool {
        let mut state = self.state.lock();
        if state.cancelled.insert(ride_id) {
            state.cancelled_order.push_back(ride_id);
            if state.cancelled_order.len() > RECENTLY_CANCELLED {
                if let Some(oldest) = state.cancelled_order.pop_front() {
                    state.cancelled.remove(&oldest);
                }
            }
        }
        match state.running.get(&ride_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, ride_id: Uuid) -> bool {
        self.state.lock().running.contains_key(&ride_id)
    }
}
