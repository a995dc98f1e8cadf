//! Request-driven operations of both services, called by the HTTP layer and the
//! realtime sockets.

pub mod fleet;
pub mod ride_requests;
pub mod route_cache;

pub use fleet::{Fleet, FleetError};
pub use ride_requests::{RideRequestError, RideRequests};
pub use route_cache::{RideRoute, RideRouteCache};

use crate::entities::rides::Ride;
use rideflow_sdk::objects::ws::RideStatusUpdate;

/// The passenger-facing view of the ride's current status.
pub fn status_update(ride: &Ride) -> RideStatusUpdate {
    RideStatusUpdate {
        ride_id: ride.id,
        ride_number: ride.ride_number.clone(),
        status: ride.status,
        driver_info: None,
        correlation_id: None,
        reason: ride.cancellation_reason.clone(),
        final_fare: ride.final_fare.filter(|_| ride.status == rideflow_sdk::objects::RideStatus::Completed),
        message: None,
    }
}
