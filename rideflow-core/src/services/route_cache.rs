use crate::entities::rides::Ride;
use parking_lot::RwLock;
use rideflow_sdk::objects::{Location, RideStatus};
use std::collections::HashMap;
use uuid::Uuid;

/// What the location relay needs to know about a tracked ride.
#[derive(Debug, Clone, PartialEq)]
pub struct RideRoute {
    pub ride_id: Uuid,
    pub ride_number: String,
    pub passenger_id: Uuid,
    pub driver_id: Option<Uuid>,
    pub status: RideStatus,
    pub pickup: Location,
    pub destination: Location,
}

impl RideRoute {
    /// Rides whose driver position is forwarded to the passenger.
    pub fn is_tracked(&self) -> bool {
        matches!(
            self.status,
            RideStatus::Matched | RideStatus::DriverArrived | RideStatus::InProgress
        )
    }

    /// The pickup until the ride starts, then the destination.
    pub fn target(&self) -> &Location {
        match self.status {
            RideStatus::InProgress => &self.destination,
            _ => &self.pickup,
        }
    }
}

impl From<&Ride> for RideRoute {
    fn from(ride: &Ride) -> Self {
        Self {
            ride_id: ride.id,
            ride_number: ride.ride_number.clone(),
            passenger_id: ride.passenger_id,
            driver_id: ride.driver_id,
            status: ride.status,
            pickup: ride.pickup.clone(),
            destination: ride.destination.clone(),
        }
    }
}

/// Ride id to passenger lookup for location forwarding.
///
/// Filled when a ride is matched and dropped when it ends.
#[derive(Debug, Default)]
pub struct RideRouteCache {
    routes: RwLock<HashMap<Uuid, RideRoute>>,
}

impl RideRouteCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, ride_id: Uuid) -> Option<RideRoute> {
        self.routes.read().get(&ride_id).cloned()
    }

    /// Caches `ride` while it is tracked and evicts it otherwise.
    pub fn refresh(&self, ride: &Ride) {
        let route = RideRoute::from(ride);
        let mut routes = self.routes.write();
        if route.is_tracked() {
            routes.insert(ride.id, route);
        } else {
            routes.remove(&ride.id);
        }
    }

    pub fn remove(&self, ride_id: Uuid) {
        self.routes.write().remove(&ride_id);
    }

    pub fn len(&self) -> usize {
        self.routes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.read().is_empty()
    }
}
