//! Per-user realtime channel bookkeeping shared by both services.
//!
//! The socket itself lives in the server crate; this module owns the parts the
//! dispatch core pushes into: the [`ConnectionHub`] of authenticated users and
//! their bounded [`OutboundQueue`]s.

mod hub;
mod outbound;

pub use hub::{ConnectionHandle, ConnectionHub};
pub use outbound::{OUTBOUND_CAPACITY, Outbound, OutboundQueue, PushOutcome, Urgency};

use rideflow_sdk::objects::ws::{DriverServerMessage, PassengerServerMessage};

pub type DriverHub = ConnectionHub<DriverServerMessage>;
pub type PassengerHub = ConnectionHub<PassengerServerMessage>;

impl Outbound for DriverServerMessage {
    fn urgency(&self) -> Urgency {
        Urgency::Critical
    }
}

impl Outbound for PassengerServerMessage {
    fn urgency(&self) -> Urgency {
        match self {
            PassengerServerMessage::DriverLocationUpdate(_) => Urgency::Droppable,
            _ => Urgency::Critical,
        }
    }
}
