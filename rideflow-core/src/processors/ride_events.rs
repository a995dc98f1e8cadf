//! RideEventProcessor.
//!
//! Applies what the Driver-Location Service reports to the authoritative ride
//! record and pushes the result to the passenger:
//! - `driver.response.*` moves a ride to `MATCHED`
//! - `driver.status.*` moves it along the trip
//! - `ride.status.NO_DRIVER` ends an unmatched ride
//!
//! Redelivered events that the ride has already been through are acked
//! without a second transition or push.

use crate::broker::topology;
use crate::broker::{BrokerError, Delivery, DeliveryStream, Settlement, SharedBus, settle};
use crate::entities::rides::{Ride, RideTransition};
use crate::lifecycle::{Actor, is_replay};
use crate::realtime::PassengerHub;
use crate::services::ride_requests::publish_ride_status;
use crate::services::{RideRouteCache, status_update};
use crate::stores::{SharedRideStore, StoreError};
use rideflow_sdk::objects::ws::{PassengerServerMessage, RideStatusUpdate};
use rideflow_sdk::objects::{
    DriverResponseMessage, DriverRideEvent, DriverStatusMessage, RideStatus, RideStatusMessage,
};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Reason attached when an acceptance arrives for a ride that can no longer
/// take a driver.
pub const RIDE_UNAVAILABLE_REASON: &str = "ride_unavailable";

pub struct RideEventProcessor {
    bus: SharedBus,
    rides: SharedRideStore,
    passengers: Arc<PassengerHub>,
    routes: Arc<RideRouteCache>,
    shutdown: CancellationToken,
}

/// Consumed queues of the processor.
pub struct RideEventStreams {
    pub responses: DeliveryStream,
    pub statuses: DeliveryStream,
    pub outcomes: DeliveryStream,
}

impl RideEventProcessor {
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

    /// Subscribes to the three inbound queues and spawns the consume loop.
    pub async fn start(self) -> Result<JoinHandle<()>, BrokerError> {
        let streams = RideEventStreams {
            responses: self
                .bus
                .consume(topology::driver_responses(), self.shutdown.child_token())
                .await?,
            statuses: self
                .bus
                .consume(topology::driver_status(), self.shutdown.child_token())
                .await?,
            outcomes: self
                .bus
                .consume(topology::ride_outcomes(), self.shutdown.child_token())
                .await?,
        };
        Ok(tokio::spawn(self.run(streams)))
    }

    /// Run the RideEventProcessor.
    pub async fn run(self, mut streams: RideEventStreams) {
        info!("RideEventProcessor started");

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => {
                    info!("RideEventProcessor received shutdown signal");
                    break;
                }

                Some(delivery) = streams.statuses.recv() => {
                    let outcome = self.handle_driver_status(&delivery).await;
                    settle(delivery, outcome).await;
                }

                Some(delivery) = streams.responses.recv() => {
                    let outcome = self.handle_driver_response(&delivery).await;
                    settle(delivery, outcome).await;
                }

                Some(delivery) = streams.outcomes.recv() => {
                    let outcome = self.handle_no_driver(&delivery).await;
                    settle(delivery, outcome).await;
                }

                else => {
                    info!("Ride event streams closed");
                    break;
                }
            }
        }

        info!("RideEventProcessor shutdown complete");
    }

    fn push(&self, ride: &Ride, update: RideStatusUpdate) {
        self.routes.refresh(ride);
        if self
            .passengers
            .send(ride.passenger_id, PassengerServerMessage::RideStatusUpdate(update))
            .is_none()
        {
            debug!(ride_id = %ride.id, passenger_id = %ride.passenger_id, "Passenger not connected");
        }
    }

    // ------------------------------------------------------------------------
    // driver.response.*
    // ------------------------------------------------------------------------

    async fn handle_driver_response(&self, delivery: &Delivery) -> Settlement {
        let response: DriverResponseMessage = match delivery.json() {
            Ok(response) => response,
            Err(e) => {
                warn!(routing_key = %delivery.routing_key, error = %e, "Undecodable driver response");
                return Settlement::Reject;
            }
        };
        if !response.accepted {
            debug!(ride_id = %response.ride_id, driver_id = %response.driver_id, "Ignoring declined response");
            return Settlement::Ack;
        }

        let transition = RideTransition::matched(response.ride_id, response.driver_id);
        match self.rides.transition(transition).await {
            Ok(ride) => {
                info!(ride_id = %ride.id, driver_id = %response.driver_id, "Ride matched");
                let mut update = status_update(&ride);
                update.driver_info = Some(response.driver_info);
                update.correlation_id = response.correlation_id;
                update.message = Some("A driver is on the way".into());
                self.push(&ride, update);
                Settlement::Ack
            }
            Err(StoreError::Transition(_) | StoreError::RideNotFound(_) | StoreError::DriverBusy) => {
                self.refuse_driver(&response).await
            }
            Err(e) => {
                error!(ride_id = %response.ride_id, error = %e, "Failed to apply driver response");
                Settlement::Requeue
            }
        }
    }

    /// Frees a driver whose acceptance cannot be applied, unless it is a
    /// redelivery of the acceptance that already matched the ride.
    async fn refuse_driver(&self, response: &DriverResponseMessage) -> Settlement {
        match self.rides.ride(response.ride_id).await {
            Ok(Some(ride))
                if ride.driver_id == Some(response.driver_id)
                    && is_replay(ride.status, RideStatus::Matched) =>
            {
                debug!(ride_id = %ride.id, driver_id = %response.driver_id, "Duplicate driver response");
                return Settlement::Ack;
            }
            Ok(_) => {}
            Err(e) => {
                error!(ride_id = %response.ride_id, error = %e, "Failed to load ride");
                return Settlement::Requeue;
            }
        }

        warn!(ride_id = %response.ride_id, driver_id = %response.driver_id, "Ride cannot take this driver, releasing");
        let notice = RideStatusMessage {
            ride_id: response.ride_id,
            status: RideStatus::Cancelled,
            driver_id: Some(response.driver_id),
            reason: Some(RIDE_UNAVAILABLE_REASON.into()),
            correlation_id: response.correlation_id.clone(),
            timestamp: OffsetDateTime::now_utc(),
        };
        match publish_ride_status(self.bus.as_ref(), &notice).await {
            Ok(()) => Settlement::Ack,
            Err(e) => {
                error!(ride_id = %response.ride_id, error = %e, "Failed to publish driver release");
                Settlement::Requeue
            }
        }
    }

    // ------------------------------------------------------------------------
    // driver.status.*
    // ------------------------------------------------------------------------

    async fn handle_driver_status(&self, delivery: &Delivery) -> Settlement {
        let event: DriverStatusMessage = match delivery.json() {
            Ok(event) => event,
            Err(e) => {
                warn!(routing_key = %delivery.routing_key, error = %e, "Undecodable driver status");
                return Settlement::Reject;
            }
        };
        let target = event.status.target_status();

        let ride = match self.rides.ride(event.ride_id).await {
            Ok(Some(ride)) => ride,
            Ok(None) => {
                warn!(ride_id = %event.ride_id, status = %event.status, "Driver status for unknown ride");
                return Settlement::Reject;
            }
            Err(e) => {
                error!(ride_id = %event.ride_id, error = %e, "Failed to load ride");
                return Settlement::Requeue;
            }
        };
        if is_replay(ride.status, target) {
            debug!(ride_id = %ride.id, current = %ride.status, status = %event.status, "Replayed driver status");
            return Settlement::Ack;
        }
        if ride.driver_id != Some(event.driver_id) {
            warn!(
                ride_id = %ride.id,
                driver_id = %event.driver_id,
                assigned = ?ride.driver_id,
                "Driver status from a driver not on the ride"
            );
            return Settlement::Reject;
        }

        let mut transition = RideTransition::new(ride.id, target, Actor::Driver)
            .with_final_fare(event.final_fare);
        transition.at = event.timestamp;
        if let Some(reason) = event.reason.clone() {
            transition = transition.with_reason(reason);
        }

        match self.rides.transition(transition).await {
            Ok(ride) => {
                info!(ride_id = %ride.id, status = %ride.status, "Ride status updated by driver");
                let mut update = status_update(&ride);
                update.message = Some(status_message(event.status).into());
                self.push(&ride, update);
                Settlement::Ack
            }
            Err(StoreError::Transition(e)) => {
                warn!(ride_id = %event.ride_id, error = %e, "Driver status rejected");
                Settlement::Reject
            }
            Err(e) => {
                error!(ride_id = %event.ride_id, error = %e, "Failed to apply driver status");
                Settlement::Requeue
            }
        }
    }

    // ------------------------------------------------------------------------
    // ride.status.NO_DRIVER
    // ------------------------------------------------------------------------

    async fn handle_no_driver(&self, delivery: &Delivery) -> Settlement {
        let outcome: RideStatusMessage = match delivery.json() {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(routing_key = %delivery.routing_key, error = %e, "Undecodable ride outcome");
                return Settlement::Reject;
            }
        };
        if outcome.status != RideStatus::NoDriver {
            debug!(ride_id = %outcome.ride_id, status = %outcome.status, "Ignoring ride outcome");
            return Settlement::Ack;
        }

        let mut transition = RideTransition::new(outcome.ride_id, RideStatus::NoDriver, Actor::System);
        if let Some(reason) = outcome.reason.clone() {
            transition = transition.with_reason(reason);
        }
        match self.rides.transition(transition).await {
            Ok(ride) => {
                info!(ride_id = %ride.id, "No driver found for ride");
                let mut update = status_update(&ride);
                update.correlation_id = outcome.correlation_id;
                update.message = Some("No drivers are available right now".into());
                self.push(&ride, update);
                Settlement::Ack
            }
            Err(StoreError::Transition(e)) => {
                // Already matched or cancelled; the outcome is stale.
                debug!(ride_id = %outcome.ride_id, error = %e, "Stale no-driver outcome");
                Settlement::Ack
            }
            Err(StoreError::RideNotFound(_)) => {
                warn!(ride_id = %outcome.ride_id, "No-driver outcome for unknown ride");
                Settlement::Reject
            }
            Err(e) => {
                error!(ride_id = %outcome.ride_id, error = %e, "Failed to apply no-driver outcome");
                Settlement::Requeue
            }
        }
    }
}

fn status_message(event: DriverRideEvent) -> &'static str {
    match event {
        DriverRideEvent::Arrived => "Your driver has arrived",
        DriverRideEvent::InProgress => "Your ride has started",
        DriverRideEvent::Completed => "Your ride is complete",
        DriverRideEvent::Cancelled => "Your driver cancelled the ride",
    }
}
