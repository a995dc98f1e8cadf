//! MatchingEngine processor.
//!
//! The MatchingEngine is responsible for:
//! - Consuming `ride.request.*` from the shared `driver_matching` queue
//! - Offering the ride to one eligible driver at a time, closest first
//! - Re-selecting after a decline until the ride's matching budget runs out
//! - Publishing `driver.response.<ride_id>` on acceptance, or
//!   `ride.status.NO_DRIVER` once no driver is left
//!
//! The delivery stays un-acked for the whole match so that a crashed replica's
//! ride is redelivered to another one.

use crate::broker::topology::{self, RIDE_TOPIC, driver_response_key};
use crate::broker::{
    BrokerError, Delivery, DeliveryStream, OutgoingMessage, Settlement, SharedBus, settle,
};
use crate::config::{DispatchConfig, MAX_MATCH_TIMEOUT_SECONDS};
use crate::matching::{
    Begin, Candidate, InFlightRides, MatchError, Offer, OfferReply, OfferTable, select_candidate,
};
use crate::realtime::DriverHub;
use crate::services::ride_requests::publish_ride_status;
use crate::stores::{NewAssignment, SharedDriverStore, StoreError};
use crate::utils::geo::{ETA_SPEED_FLOOR_KMH, eta_minutes};
use rideflow_sdk::objects::ws::{DriverServerMessage, RideDetails, RideOffer};
use rideflow_sdk::objects::{
    DriverResponseMessage, Location, RideRequestMessage, RideStatus, RideStatusMessage,
};
use std::collections::HashSet;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const NO_DRIVERS_REASON: &str = "no_drivers_available";

/// How a ride request ended on this replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    Assigned { driver_id: Uuid },
    NoDriver,
    /// The passenger cancelled while matching.
    Cancelled,
    /// Another delivery of the same ride already produced an assignment.
    AlreadyHandled,
}

/// How a single offer ended.
#[derive(Debug)]
enum OfferResult {
    Accepted { current_location: Option<Location> },
    Declined,
    Expired,
    /// The offer was taken back, e.g. the driver went offline.
    Withdrawn,
    /// The offer never reached the driver.
    Undeliverable,
    RideCancelled,
}

pub struct MatchingEngine {
    bus: SharedBus,
    drivers: SharedDriverStore,
    hub: Arc<DriverHub>,
    offers: Arc<OfferTable>,
    in_flight: Arc<InFlightRides>,
    config: DispatchConfig,
    shutdown: CancellationToken,
}

impl MatchingEngine {
    pub fn new(
        bus: SharedBus,
        drivers: SharedDriverStore,
        hub: Arc<DriverHub>,
        offers: Arc<OfferTable>,
        in_flight: Arc<InFlightRides>,
        config: DispatchConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            bus,
            drivers,
            hub,
            offers,
            in_flight,
            config,
            shutdown,
        }
    }

    /// Subscribes to `driver_matching` and spawns the consume loop.
    pub async fn start(self) -> Result<JoinHandle<()>, BrokerError> {
        let deliveries = self
            .bus
            .consume(topology::driver_matching(), self.shutdown.child_token())
            .await?;
        Ok(tokio::spawn(self.run(deliveries)))
    }

    /// Run the MatchingEngine.
    pub async fn run(self, mut deliveries: DeliveryStream) {
        info!("MatchingEngine started");
        let shutdown = self.shutdown.clone();
        let engine = Arc::new(self);
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("MatchingEngine received shutdown signal");
                    break;
                }

                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Matching task failed");
                    }
                }

                Some(delivery) = deliveries.recv() => {
                    let engine = Arc::clone(&engine);
                    tasks.spawn(async move { engine.handle(delivery).await });
                }

                else => {
                    info!("Ride request stream closed");
                    break;
                }
            }
        }

        // Running matches observe the shutdown and requeue their deliveries.
        while tasks.join_next().await.is_some() {}
        info!("MatchingEngine shutdown complete");
    }

    async fn handle(&self, delivery: Delivery) {
        let request: RideRequestMessage = match delivery.json() {
            Ok(request) => request,
            Err(e) => {
                warn!(routing_key = %delivery.routing_key, error = %e, "Undecodable ride request");
                settle(delivery, Settlement::Reject).await;
                return;
            }
        };
        debug!(
            ride_id = %request.ride_id,
            ride_type = %request.ride_type,
            timeout_seconds = request.timeout_seconds,
            redelivered = delivery.redelivered,
            "Received ride request"
        );

        let settlement = match self.dispatch(&request).await {
            Ok(outcome) => {
                info!(ride_id = %request.ride_id, ?outcome, "Ride request handled");
                Settlement::Ack
            }
            Err(MatchError::ShuttingDown) => {
                debug!(ride_id = %request.ride_id, "Returning ride request to the queue");
                Settlement::Requeue
            }
            Err(e) => {
                error!(ride_id = %request.ride_id, error = %e, "Failed to match ride");
                Settlement::Requeue
            }
        };
        settle(delivery, settlement).await;
    }

    /// Matches one ride request to completion.
    pub async fn dispatch(&self, request: &RideRequestMessage) -> Result<MatchOutcome, MatchError> {
        if self
            .drivers
            .assignment_for_ride(request.ride_id)
            .await?
            .is_some_and(|a| a.is_active())
        {
            return Ok(MatchOutcome::AlreadyHandled);
        }
        let guard = match self.in_flight.begin(request.ride_id, &self.shutdown) {
            Begin::Started(guard) => guard,
            Begin::Cancelled => return Ok(MatchOutcome::Cancelled),
            Begin::Duplicate => return Ok(MatchOutcome::AlreadyHandled),
        };
        let ride_cancel = guard.token().clone();

        if request.timeout_seconds > MAX_MATCH_TIMEOUT_SECONDS {
            warn!(
                ride_id = %request.ride_id,
                timeout_seconds = request.timeout_seconds,
                max = MAX_MATCH_TIMEOUT_SECONDS,
                "Ride request asks for too long a matching budget, capping it"
            );
        }
        let budget = DispatchConfig::match_budget(request.timeout_seconds);
        let deadline = Instant::now().checked_add(budget).unwrap_or_else(Instant::now);
        let max_distance_km = request
            .max_distance_km
            .unwrap_or(self.config.max_distance_km);
        let mut excluded = HashSet::new();

        while Instant::now() < deadline {
            let drivers = self.drivers.available_drivers(request.ride_type).await?;
            let candidate = select_candidate(
                &drivers,
                request.ride_type,
                &request.pickup,
                max_distance_km,
                &excluded,
                |id| self.offers.has_offer(id),
            );

            let Some(candidate) = candidate else {
                let wake = (Instant::now() + self.config.candidate_poll_interval()).min(deadline);
                tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => return Err(MatchError::ShuttingDown),
                    _ = ride_cancel.cancelled() => return Ok(MatchOutcome::Cancelled),
                    _ = tokio::time::sleep_until(wake) => continue,
                }
            };
            let driver_id = candidate.driver.id;

            if !self.hub.is_connected(driver_id) {
                debug!(ride_id = %request.ride_id, driver_id = %driver_id, "Skipping disconnected driver");
                excluded.insert(driver_id);
                continue;
            }

            match self.offer(request, &candidate, deadline, &ride_cancel).await? {
                OfferResult::Accepted { current_location } => {
                    match self.accept(request, &candidate, current_location).await {
                        Ok(()) => return Ok(MatchOutcome::Assigned { driver_id }),
                        Err(MatchError::Store(StoreError::DriverUnavailable(_))) => {
                            warn!(ride_id = %request.ride_id, driver_id = %driver_id, "Driver became unavailable after accepting");
                            excluded.insert(driver_id);
                        }
                        Err(MatchError::Store(StoreError::RideAlreadyAssigned(_))) => {
                            return Ok(MatchOutcome::AlreadyHandled);
                        }
                        Err(e) => return Err(e),
                    }
                }
                OfferResult::RideCancelled => return Ok(MatchOutcome::Cancelled),
                result => {
                    debug!(ride_id = %request.ride_id, driver_id = %driver_id, ?result, "Offer not accepted");
                    excluded.insert(driver_id);
                }
            }
        }

        if ride_cancel.is_cancelled() {
            if self.shutdown.is_cancelled() {
                return Err(MatchError::ShuttingDown);
            }
            return Ok(MatchOutcome::Cancelled);
        }
        self.publish_no_driver(request).await?;
        Ok(MatchOutcome::NoDriver)
    }

    async fn offer(
        &self,
        request: &RideRequestMessage,
        candidate: &Candidate,
        deadline: Instant,
        ride_cancel: &CancellationToken,
    ) -> Result<OfferResult, MatchError> {
        let driver_id = candidate.driver.id;
        let now = OffsetDateTime::now_utc();
        let remaining = deadline.saturating_duration_since(Instant::now());
        let offer = Offer {
            offer_id: Uuid::new_v4(),
            ride_id: request.ride_id,
            driver_id,
            created_at: now,
            expires_at: now + remaining,
        };
        let offer_id = offer.offer_id;
        let expires_at = offer.expires_at;
        let reply = match self.offers.open(offer) {
            Ok(reply) => reply,
            Err(conflict) => {
                debug!(ride_id = %request.ride_id, driver_id = %driver_id, %conflict, "Offer not opened");
                return Ok(OfferResult::Undeliverable);
            }
        };

        let frame = DriverServerMessage::RideOffer(RideOffer {
            offer_id,
            ride_id: request.ride_id,
            ride_number: request.ride_number.clone(),
            pickup_location: request.pickup.clone(),
            destination_location: request.destination.clone(),
            estimated_fare: request.estimated_fare,
            driver_earnings: self.config.driver_earnings(request.estimated_fare),
            distance_to_pickup_km: (candidate.distance_km * 100.0).round() / 100.0,
            estimated_ride_duration_minutes: request.estimated_duration_minutes,
            expires_at,
        });
        if !self.hub.deliver(driver_id, frame) {
            self.offers.withdraw(driver_id, offer_id);
            return Ok(OfferResult::Undeliverable);
        }
        debug!(ride_id = %request.ride_id, driver_id = %driver_id, offer_id = %offer_id, "Offer sent");

        let result = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => {
                self.offers.withdraw(driver_id, offer_id);
                return Err(MatchError::ShuttingDown);
            }
            _ = ride_cancel.cancelled() => {
                self.offers.withdraw(driver_id, offer_id);
                OfferResult::RideCancelled
            }
            reply = reply => match reply {
                Ok(OfferReply::Accepted { current_location }) => OfferResult::Accepted { current_location },
                Ok(OfferReply::Declined) => OfferResult::Declined,
                Err(_) => OfferResult::Withdrawn,
            },
            _ = tokio::time::sleep_until(deadline) => {
                self.offers.withdraw(driver_id, offer_id);
                OfferResult::Expired
            }
        };
        Ok(result)
    }

    /// Binds the ride to the driver and tells the Ride Service.
    ///
    /// The assignment is rolled back if the acceptance cannot be published.
    async fn accept(
        &self,
        request: &RideRequestMessage,
        candidate: &Candidate,
        current_location: Option<Location>,
    ) -> Result<(), MatchError> {
        let driver = &candidate.driver;
        let now = OffsetDateTime::now_utc();
        self.drivers
            .assign_ride(NewAssignment {
                ride_id: request.ride_id,
                driver_id: driver.id,
                passenger_id: request.passenger_id,
                ride_number: request.ride_number.clone(),
                ride_type: request.ride_type,
                pickup: request.pickup.clone(),
                destination: request.destination.clone(),
                estimated_fare: request.estimated_fare,
                at: now,
            })
            .await?;

        let response = DriverResponseMessage {
            ride_id: request.ride_id,
            offer_id: Uuid::new_v4(),
            driver_id: driver.id,
            accepted: true,
            driver_info: driver.info(),
            driver_location: current_location.or_else(|| driver.location.clone()),
            estimated_arrival_minutes: Some(eta_minutes(
                candidate.distance_km,
                None,
                ETA_SPEED_FLOOR_KMH,
            )),
            correlation_id: Some(request.correlation_id.clone()),
            timestamp: now,
        };
        let published = match OutgoingMessage::json(&response) {
            Ok(outgoing) => {
                let outgoing = outgoing.with_correlation_id(request.correlation_id.clone());
                self.bus
                    .publish(RIDE_TOPIC, &driver_response_key(request.ride_id), outgoing)
                    .await
            }
            Err(e) => Err(e),
        };
        if let Err(e) = published {
            warn!(ride_id = %request.ride_id, driver_id = %driver.id, error = %e, "Failed to publish acceptance, releasing driver");
            if let Err(release) = self
                .drivers
                .release_ride(request.ride_id, Some(driver.id), Some("broker_unavailable".into()), now)
                .await
            {
                error!(ride_id = %request.ride_id, driver_id = %driver.id, error = %release, "Failed to release driver");
            }
            self.hub.send(
                driver.id,
                DriverServerMessage::RideDetails(RideDetails {
                    ride_id: request.ride_id,
                    ride_number: request.ride_number.clone(),
                    status: RideStatus::Cancelled,
                    passenger_id: None,
                    pickup_location: None,
                    destination_location: None,
                    estimated_fare: None,
                    message: Some("The ride could not be confirmed".into()),
                }),
            );
            return Err(e.into());
        }

        self.hub.send(
            driver.id,
            DriverServerMessage::RideDetails(RideDetails {
                ride_id: request.ride_id,
                ride_number: request.ride_number.clone(),
                status: RideStatus::Matched,
                passenger_id: Some(request.passenger_id),
                pickup_location: Some(request.pickup.clone()),
                destination_location: Some(request.destination.clone()),
                estimated_fare: Some(request.estimated_fare),
                message: Some("Head to the pickup location".into()),
            }),
        );
        info!(ride_id = %request.ride_id, driver_id = %driver.id, "Driver assigned");
        Ok(())
    }

    async fn publish_no_driver(&self, request: &RideRequestMessage) -> Result<(), BrokerError> {
        let message = RideStatusMessage {
            ride_id: request.ride_id,
            status: RideStatus::NoDriver,
            driver_id: None,
            reason: Some(NO_DRIVERS_REASON.into()),
            correlation_id: Some(request.correlation_id.clone()),
            timestamp: OffsetDateTime::now_utc(),
        };
        publish_ride_status(self.bus.as_ref(), &message).await?;
        info!(ride_id = %request.ride_id, "No driver found");
        Ok(())
    }
}
