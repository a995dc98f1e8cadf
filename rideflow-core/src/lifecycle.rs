//! Ride state machine.
//!
//! ```text
//! REQUESTED ─► MATCHED ─► DRIVER_ARRIVED ─► IN_PROGRESS ─► COMPLETED
//!     │           │              │                │
//!     ├─► NO_DRIVER              │                │
//!     └─► CANCELLED ◄────────────┴────────────────┘
//! ```
//!
//! Passengers may cancel only while the ride is `REQUESTED` or `MATCHED`.
//! Later cancellations come from the driver or the system.

use rideflow_sdk::objects::RideStatus;
use std::fmt;
use thiserror::Error;

/// Who is driving a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Actor {
    Passenger,
    Driver,
    /// Broker-driven outcomes and compensations.
    System,
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Actor::Passenger => "passenger",
            Actor::Driver => "driver",
            Actor::System => "system",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: RideStatus, to: RideStatus },
    #[error("{actor} may not move a ride from {from} to {to}")]
    NotPermitted {
        actor: Actor,
        from: RideStatus,
        to: RideStatus,
    },
}

impl TransitionError {
    pub fn from_status(&self) -> RideStatus {
        match self {
            TransitionError::InvalidStateTransition { from, .. }
            | TransitionError::NotPermitted { from, .. } => *from,
        }
    }
}

/// Actors allowed to drive `from -> to`, or `None` if the edge does not exist.
fn allowed_actors(from: RideStatus, to: RideStatus) -> Option<&'static [Actor]> {
    use Actor::*;
    use RideStatus::*;
    let actors: &'static [Actor] = match (from, to) {
        (Requested, Matched) => &[System, Driver],
        (Requested, NoDriver) => &[System],
        (Requested, Cancelled) => &[Passenger, System],
        (Matched, DriverArrived) => &[Driver, System],
        (Matched, Cancelled) => &[Passenger, Driver, System],
        (DriverArrived, InProgress) => &[Driver],
        (DriverArrived, Cancelled) => &[Driver, System],
        (InProgress, Completed) => &[Driver],
        (InProgress, Cancelled) => &[Driver, System],
        _ => return None,
    };
    Some(actors)
}

/// Validates a transition against the table and the cancellation policy.
pub fn check_transition(from: RideStatus, to: RideStatus, actor: Actor) -> Result<(), TransitionError> {
    match allowed_actors(from, to) {
        None => Err(TransitionError::InvalidStateTransition { from, to }),
        Some(actors) if actors.contains(&actor) => Ok(()),
        Some(_) => Err(TransitionError::NotPermitted { actor, from, to }),
    }
}

fn progress(status: RideStatus) -> Option<u8> {
    match status {
        RideStatus::Requested => Some(0),
        RideStatus::Matched => Some(1),
        RideStatus::DriverArrived => Some(2),
        RideStatus::InProgress => Some(3),
        RideStatus::Completed => Some(4),
        RideStatus::Cancelled | RideStatus::NoDriver => None,
    }
}

/// `true` when an event asking for `target` is a replay of something the ride
/// has already been through: the ride is already there, further along the
/// happy path, or finished.
pub fn is_replay(current: RideStatus, target: RideStatus) -> bool {
    if current == target || current.is_terminal() {
        return true;
    }
    match (progress(current), progress(target)) {
        (Some(c), Some(t)) => c > t,
        _ => false,
    }
}
