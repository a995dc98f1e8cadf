//! Passenger-facing ride operations of the Ride Service.

use crate::broker::topology::{RIDE_TOPIC, priority_for, ride_request_key, ride_status_key};
use crate::broker::{BrokerError, OutgoingMessage, SharedBus};
use crate::config::{DispatchConfig, PricingTable};
use crate::entities::rides::{NewRide, Ride, RideTransition};
use crate::lifecycle::{Actor, TransitionError};
use crate::realtime::PassengerHub;
use crate::services::route_cache::RideRouteCache;
use crate::services::status_update;
use crate::stores::{SharedRideStore, StoreError};
use crate::utils::geo::haversine_km;
use rideflow_sdk::objects::ws::PassengerServerMessage;
use rideflow_sdk::objects::{
    CancelRideResponse, CreateRideRequest, CreateRideResponse, RideRequestMessage, RideStatus,
    RideStatusMessage,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const BROKER_UNAVAILABLE_REASON: &str = "broker_unavailable";
pub const PASSENGER_CANCELLED_REASON: &str = "passenger_cancelled";

/// First wait before a status notice that failed to publish is sent again.
const NOTICE_RETRY_INITIAL: Duration = Duration::from_millis(250);
/// Upper bound of the doubling wait between notice retries.
const NOTICE_RETRY_MAX: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum RideRequestError {
    #[error("{0}")]
    Validation(String),
    #[error("passenger already has an active ride")]
    ActiveRideExists,
    #[error("ride not found")]
    RideNotFound,
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("ride is {status}, feedback is accepted once it is COMPLETED")]
    RideNotCompleted { status: RideStatus },
    #[error("ride dispatch is temporarily unavailable")]
    BrokerUnavailable(#[source] BrokerError),
    #[error("storage error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for RideRequestError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::ActiveRideExists => RideRequestError::ActiveRideExists,
            StoreError::RideNotFound(_) => RideRequestError::RideNotFound,
            StoreError::Transition(t) => RideRequestError::Transition(t),
            StoreError::RideNotCompleted { status } => RideRequestError::RideNotCompleted { status },
            other => RideRequestError::Store(other),
        }
    }
}

/// Creation, cancellation and feedback of rides.
pub struct RideRequests {
    rides: SharedRideStore,
    bus: SharedBus,
    passengers: Arc<PassengerHub>,
    routes: Arc<RideRouteCache>,
    pricing: PricingTable,
    config: DispatchConfig,
    /// Stops retries of unpublished status notices.
    shutdown: CancellationToken,
}

impl RideRequests {
    pub fn new(
        rides: SharedRideStore,
        bus: SharedBus,
        passengers: Arc<PassengerHub>,
        routes: Arc<RideRouteCache>,
        pricing: PricingTable,
        config: DispatchConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            rides,
            bus,
            passengers,
            routes,
            pricing,
            config,
            shutdown,
        }
    }

    /// Persists a `REQUESTED` ride and publishes it for matching.
    ///
    /// If the publish fails the ride is cancelled with reason
    /// `broker_unavailable` and the caller gets [`RideRequestError::BrokerUnavailable`].
    #[tracing::instrument(skip_all, fields(passenger_id = %passenger_id, ride_type = %request.ride_type))]
    pub async fn create(
        &self,
        passenger_id: Uuid,
        request: CreateRideRequest,
    ) -> Result<CreateRideResponse, RideRequestError> {
        let pickup = request.pickup();
        let destination = request.destination();
        if !pickup.is_valid() {
            return Err(RideRequestError::Validation(
                "pickup coordinates are out of range".into(),
            ));
        }
        if !destination.is_valid() {
            return Err(RideRequestError::Validation(
                "destination coordinates are out of range".into(),
            ));
        }
        if self
            .rides
            .active_ride_for_passenger(passenger_id)
            .await?
            .is_some()
        {
            return Err(RideRequestError::ActiveRideExists);
        }

        let estimate = self
            .pricing
            .for_type(request.ride_type)
            .estimate(haversine_km(&pickup, &destination));
        let priority = priority_for(request.ride_type);
        let ride = self
            .rides
            .create_ride(NewRide {
                passenger_id,
                ride_type: request.ride_type,
                priority,
                pickup,
                destination,
                estimated_fare: estimate.fare,
                estimated_distance_km: estimate.distance_km,
                estimated_duration_minutes: estimate.duration_minutes,
                requested_at: OffsetDateTime::now_utc(),
            })
            .await?;

        if let Err(e) = self.publish_request(&ride).await {
            warn!(ride_id = %ride.id, error = %e, "Failed to publish ride request, cancelling ride");
            let rollback = RideTransition::new(ride.id, RideStatus::Cancelled, Actor::System)
                .with_reason(BROKER_UNAVAILABLE_REASON);
            if let Err(rollback_err) = self.rides.transition(rollback).await {
                error!(ride_id = %ride.id, error = %rollback_err, "Failed to cancel unpublished ride");
            }
            return Err(RideRequestError::BrokerUnavailable(e));
        }

        info!(ride_id = %ride.id, ride_number = %ride.ride_number, "Ride requested");
        Ok(CreateRideResponse {
            ride_id: ride.id,
            ride_number: ride.ride_number,
            status: ride.status,
            estimated_fare: ride.estimated_fare,
            estimated_duration_minutes: ride.estimated_duration_minutes,
            estimated_distance_km: ride.estimated_distance_km,
        })
    }

    async fn publish_request(&self, ride: &Ride) -> Result<(), BrokerError> {
        let correlation_id = Uuid::new_v4().to_string();
        let message = RideRequestMessage {
            ride_id: ride.id,
            ride_number: ride.ride_number.clone(),
            passenger_id: ride.passenger_id,
            ride_type: ride.ride_type,
            pickup: ride.pickup.clone(),
            destination: ride.destination.clone(),
            estimated_fare: ride.estimated_fare,
            estimated_distance_km: ride.estimated_distance_km,
            estimated_duration_minutes: ride.estimated_duration_minutes,
            max_distance_km: Some(self.config.max_distance_km),
            timeout_seconds: self.config.match_timeout_seconds,
            priority: ride.priority,
            correlation_id: correlation_id.clone(),
            requested_at: ride.requested_at,
        };
        let outgoing = OutgoingMessage::json(&message)?
            .with_priority(ride.priority)
            .with_correlation_id(correlation_id);
        self.bus
            .publish(RIDE_TOPIC, &ride_request_key(ride.ride_type), outgoing)
            .await
    }

    /// Cancels a ride on behalf of its passenger.
    ///
    /// Allowed while the ride is `REQUESTED` or `MATCHED`. The Driver-Location
    /// Service is told through `ride.status.CANCELLED` so it can stop matching
    /// or free the driver. The cancellation is already committed when that
    /// publish runs, so a failed notice is retried in the background until the
    /// broker takes it.
    #[tracing::instrument(skip_all, fields(passenger_id = %passenger_id, ride_id = %ride_id))]
    pub async fn cancel(
        &self,
        passenger_id: Uuid,
        ride_id: Uuid,
        reason: Option<String>,
    ) -> Result<CancelRideResponse, RideRequestError> {
        let ride = self
            .rides
            .ride(ride_id)
            .await?
            .filter(|r| r.passenger_id == passenger_id)
            .ok_or(RideRequestError::RideNotFound)?;
        let previous_driver = ride.driver_id;
        let reason = reason
            .map(|r| r.trim().to_owned())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| PASSENGER_CANCELLED_REASON.to_owned());

        let cancelled = self
            .rides
            .transition(
                RideTransition::new(ride_id, RideStatus::Cancelled, Actor::Passenger)
                    .with_reason(reason.clone()),
            )
            .await?;
        self.routes.remove(ride_id);

        let notice = RideStatusMessage {
            ride_id,
            status: RideStatus::Cancelled,
            driver_id: previous_driver,
            reason: Some(reason),
            correlation_id: None,
            timestamp: OffsetDateTime::now_utc(),
        };
        if let Err(e) = self.publish_status(&notice).await {
            warn!(ride_id = %ride_id, error = %e, "Failed to publish ride cancellation, retrying in background");
            self.republish_later(notice);
        }
        self.passengers.send(
            passenger_id,
            PassengerServerMessage::RideStatusUpdate(status_update(&cancelled)),
        );

        info!(ride_id = %ride_id, "Ride cancelled by passenger");
        Ok(CancelRideResponse {
            ride_id,
            status: cancelled.status,
            cancelled_at: cancelled.cancelled_at.unwrap_or_else(OffsetDateTime::now_utc),
            message: "Ride cancelled".into(),
        })
    }

    pub(crate) async fn publish_status(&self, message: &RideStatusMessage) -> Result<(), BrokerError> {
        publish_ride_status(self.bus.as_ref(), message).await
    }

    /// Keeps publishing `notice` with a doubling wait until it goes through or
    /// the service shuts down.
    fn republish_later(&self, notice: RideStatusMessage) {
        let bus = self.bus.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let mut delay = NOTICE_RETRY_INITIAL;
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => {
                        warn!(ride_id = %notice.ride_id, status = %notice.status, "Dropping unpublished ride status on shutdown");
                        return;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
                match publish_ride_status(bus.as_ref(), &notice).await {
                    Ok(()) => {
                        info!(ride_id = %notice.ride_id, status = %notice.status, "Ride status published after retry");
                        return;
                    }
                    Err(e) => {
                        warn!(ride_id = %notice.ride_id, error = %e, "Ride status still unpublished");
                        delay = (delay * 2).min(NOTICE_RETRY_MAX);
                    }
                }
            }
        });
    }

    /// Stores the passenger's rating and tip on a completed ride.
    #[tracing::instrument(skip_all, fields(passenger_id = %passenger_id, ride_id = %ride_id))]
    pub async fn feedback(
        &self,
        passenger_id: Uuid,
        ride_id: Uuid,
        rating: u8,
        tip: Decimal,
    ) -> Result<Ride, RideRequestError> {
        if !(1..=5).contains(&rating) {
            return Err(RideRequestError::Validation(
                "rating must be between 1 and 5".into(),
            ));
        }
        if tip.is_sign_negative() && !tip.is_zero() {
            return Err(RideRequestError::Validation("tip must not be negative".into()));
        }
        let ride = self
            .rides
            .record_feedback(ride_id, passenger_id, rating, tip)
            .await?;
        info!(ride_id = %ride_id, rating, "Passenger feedback recorded");
        Ok(ride)
    }
}

/// Publishes a `ride.status.<status>` message and waits for the confirm.
pub async fn publish_ride_status(
    bus: &dyn crate::broker::MessageBus,
    message: &RideStatusMessage,
) -> Result<(), BrokerError> {
    let mut outgoing = OutgoingMessage::json(message)?;
    if let Some(correlation_id) = &message.correlation_id {
        outgoing = outgoing.with_correlation_id(correlation_id.clone());
    }
    bus.publish(RIDE_TOPIC, &ride_status_key(message.status), outgoing)
        .await
}
