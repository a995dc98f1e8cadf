//! RideStatusWatcher.
//!
//! Consumes `ride.status.CANCELLED` on the Driver-Location side. A
//! cancellation naming a driver frees that driver; one without a driver stops
//! any in-flight matching of the ride on this replica.

use crate::broker::topology;
use crate::broker::{BrokerError, Delivery, DeliveryStream, Settlement, SharedBus, settle};
use crate::matching::{InFlightRides, OfferTable};
use crate::realtime::DriverHub;
use crate::stores::SharedDriverStore;
use rideflow_sdk::objects::ws::{DriverServerMessage, RideDetails};
use rideflow_sdk::objects::{RideStatus, RideStatusMessage};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct RideStatusWatcher {
    bus: SharedBus,
    drivers: SharedDriverStore,
    hub: Arc<DriverHub>,
    offers: Arc<OfferTable>,
    in_flight: Arc<InFlightRides>,
    shutdown: CancellationToken,
}

impl RideStatusWatcher {
    pub fn new(
        bus: SharedBus,
        drivers: SharedDriverStore,
        hub: Arc<DriverHub>,
        offers: Arc<OfferTable>,
        in_flight: Arc<InFlightRides>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            bus,
            drivers,
            hub,
            offers,
            in_flight,
            shutdown,
        }
    }

    pub async fn start(self) -> Result<JoinHandle<()>, BrokerError> {
        let deliveries = self
            .bus
            .consume(topology::ride_status(), self.shutdown.child_token())
            .await?;
        Ok(tokio::spawn(self.run(deliveries)))
    }

    /// Run the RideStatusWatcher.
    pub async fn run(self, mut deliveries: DeliveryStream) {
        info!("RideStatusWatcher started");

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => {
                    info!("RideStatusWatcher received shutdown signal");
                    break;
                }

                Some(delivery) = deliveries.recv() => {
                    let outcome = self.handle(&delivery).await;
                    settle(delivery, outcome).await;
                }

                else => {
                    info!("Ride status stream closed");
                    break;
                }
            }
        }

        info!("RideStatusWatcher shutdown complete");
    }

    async fn handle(&self, delivery: &Delivery) -> Settlement {
        let notice: RideStatusMessage = match delivery.json() {
            Ok(notice) => notice,
            Err(e) => {
                warn!(routing_key = %delivery.routing_key, error = %e, "Undecodable ride status");
                return Settlement::Reject;
            }
        };
        if notice.status != RideStatus::Cancelled {
            return Settlement::Ack;
        }
        let ride_id = notice.ride_id;

        let mut notified = notice.driver_id;
        match notice.driver_id {
            Some(driver_id) => {
                if let Some(offer) = self
                    .offers
                    .offer_for_driver(driver_id)
                    .filter(|o| o.ride_id == ride_id)
                {
                    self.offers.withdraw(driver_id, offer.offer_id);
                }
            }
            None => {
                if self.in_flight.cancel(ride_id) {
                    debug!(ride_id = %ride_id, "Stopped matching cancelled ride");
                }
                if let Some(offer) = self.offers.withdraw_ride(ride_id) {
                    notified = Some(offer.driver_id);
                }
            }
        }

        let released = match self
            .drivers
            .release_ride(ride_id, notice.driver_id, notice.reason.clone(), notice.timestamp)
            .await
        {
            Ok(released) => released,
            Err(e) => {
                error!(ride_id = %ride_id, error = %e, "Failed to release driver");
                return Settlement::Requeue;
            }
        };

        let ride_number = released
            .as_ref()
            .map(|a| a.ride_number.clone())
            .unwrap_or_default();
        if let Some(assignment) = &released {
            info!(ride_id = %ride_id, driver_id = %assignment.driver_id, "Driver released from cancelled ride");
            notified = Some(assignment.driver_id);
        }
        if let Some(driver_id) = notified {
            self.hub.send(
                driver_id,
                DriverServerMessage::RideDetails(RideDetails {
                    ride_id,
                    ride_number,
                    status: RideStatus::Cancelled,
                    passenger_id: None,
                    pickup_location: None,
                    destination_location: None,
                    estimated_fare: None,
                    message: Some(
                        notice
                            .reason
                            .clone()
                            .unwrap_or_else(|| "The ride was cancelled".into()),
                    ),
                }),
            );
        }
        Settlement::Ack
    }
}
