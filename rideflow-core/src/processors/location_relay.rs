//! LocationRelay.
//!
//! Consumes the location fanout on the Ride Service side and forwards each
//! driver position to the passenger of the ride, with the distance and ETA to
//! the pickup (or to the destination once the trip is underway).
//!
//! Positions are best effort. Anything that cannot be routed is acked and
//! dropped.

use crate::broker::topology;
use crate::broker::{BrokerError, Delivery, DeliveryStream, Settlement, SharedBus, settle};
use crate::realtime::PassengerHub;
use crate::services::{RideRoute, RideRouteCache};
use crate::stores::SharedRideStore;
use crate::utils::geo::{ETA_SPEED_FLOOR_KMH, eta_minutes, haversine_km};
use rideflow_sdk::objects::LocationMessage;
use rideflow_sdk::objects::ws::{DriverLocationUpdate, PassengerServerMessage};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

pub struct LocationRelay {
    bus: SharedBus,
    rides: SharedRideStore,
    passengers: Arc<PassengerHub>,
    routes: Arc<RideRouteCache>,
    shutdown: CancellationToken,
}

impl LocationRelay {
    pub fn new(
        bus: SharedBus,
        rides: SharedRideStore,
        passengers: Arc<PassengerHub>,
        routes: Arc<RideRouteCache>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            bus,
            rides,
            passengers,
            routes,
            shutdown,
        }
    }

    pub async fn start(self) -> Result<JoinHandle<()>, BrokerError> {
        let deliveries = self
            .bus
            .consume(topology::location_updates(), self.shutdown.child_token())
            .await?;
        Ok(tokio::spawn(self.run(deliveries)))
    }

    /// Run the LocationRelay.
    pub async fn run(self, mut deliveries: DeliveryStream) {
        info!("LocationRelay started");

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => {
                    info!("LocationRelay received shutdown signal");
                    break;
                }

                Some(delivery) = deliveries.recv() => {
                    self.handle(&delivery).await;
                    settle(delivery, Settlement::Ack).await;
                }

                else => {
                    info!("Location stream closed");
                    break;
                }
            }
        }

        info!("LocationRelay shutdown complete");
    }

    async fn handle(&self, delivery: &Delivery) {
        let message: LocationMessage = match delivery.json() {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Undecodable location message");
                return;
            }
        };
        let Some(route) = self.route(&message).await else {
            return;
        };
        if route.driver_id != Some(message.driver_id) {
            debug!(ride_id = %route.ride_id, driver_id = %message.driver_id, "Location from a driver not on the ride");
            return;
        }

        let update = location_update(&route, &message);
        if self
            .passengers
            .send(
                route.passenger_id,
                PassengerServerMessage::DriverLocationUpdate(update),
            )
            .is_none()
        {
            trace!(ride_id = %route.ride_id, "Passenger not connected, location dropped");
        }
    }

    /// The cached route, or the stored ride when the cache has not seen it.
    async fn route(&self, message: &LocationMessage) -> Option<RideRoute> {
        if let Some(route) = self.routes.get(message.ride_id) {
            return Some(route);
        }
        match self.rides.ride(message.ride_id).await {
            Ok(Some(ride)) => {
                self.routes.refresh(&ride);
                let route = RideRoute::from(&ride);
                route.is_tracked().then_some(route)
            }
            Ok(None) => {
                debug!(ride_id = %message.ride_id, "Location for unknown ride");
                None
            }
            Err(e) => {
                warn!(ride_id = %message.ride_id, error = %e, "Failed to look up ride for location");
                None
            }
        }
    }
}

/// The passenger-facing position update for `message` on `route`.
pub fn location_update(route: &RideRoute, message: &LocationMessage) -> DriverLocationUpdate {
    let distance_km = haversine_km(&message.location, route.target());
    let minutes = eta_minutes(distance_km, message.speed_kmh, ETA_SPEED_FLOOR_KMH);
    DriverLocationUpdate {
        ride_id: route.ride_id,
        driver_id: message.driver_id,
        driver_location: (&message.location).into(),
        estimated_arrival: message.timestamp + time::Duration::seconds_f64(minutes * 60.0),
        distance_to_pickup_km: (distance_km * 100.0).round() / 100.0,
        speed_kmh: message.speed_kmh,
        heading_degrees: message.heading_degrees,
    }
}
