//! Driver-facing operations of the Driver-Location Service.

use crate::broker::topology::{
    LOCATION_EXCHANGE, LOCATION_ROUTING_KEY, RIDE_TOPIC, driver_status_key,
};
use crate::broker::{BrokerError, OutgoingMessage, SharedBus};
use crate::config::{DispatchConfig, PricingTable};
use crate::entities::AssignmentStatus;
use crate::entities::assignments::Assignment;
use crate::matching::{OfferReply, OfferTable, Resolution};
use crate::stores::{FinishRide, LocationFix, SharedDriverStore, StoreError};
use crate::utils::geo::haversine_km;
use rideflow_sdk::objects::ws::ValidRideResponse;
use rideflow_sdk::objects::{
    CompleteRideRequest, CompleteRideResponse, DriverCancelRequest, DriverCancelResponse,
    DriverRideEvent, DriverStatus, DriverStatusMessage, GoOfflineResponse, GoOnlineRequest,
    GoOnlineResponse, Location, LocationMessage, LocationUpdateResponse, RideStatus,
    SessionSummary, StartRideRequest, StartRideResponse,
};
use std::sync::Arc;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const DRIVER_CANCELLED_REASON: &str = "driver_cancelled";

#[derive(Debug, Error)]
pub enum FleetError {
    #[error("{0}")]
    Validation(String),
    #[error("driver not found")]
    DriverNotFound,
    #[error("driver is already online")]
    AlreadyOnline,
    #[error("driver is not online")]
    NotOnline,
    #[error("driver has an active ride")]
    DriverBusy,
    #[error("ride not found for this driver")]
    RideNotFound,
    #[error("ride is {status:?} for this driver")]
    InvalidState { status: AssignmentStatus },
    #[error("ride events cannot be delivered right now")]
    BrokerUnavailable(#[source] BrokerError),
    #[error("storage error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for FleetError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DriverNotFound(_) => FleetError::DriverNotFound,
            StoreError::AlreadyOnline => FleetError::AlreadyOnline,
            StoreError::NotOnline => FleetError::NotOnline,
            StoreError::DriverBusy => FleetError::DriverBusy,
            StoreError::InvalidAssignment { .. } => FleetError::RideNotFound,
            other => FleetError::Store(other),
        }
    }
}

impl From<BrokerError> for FleetError {
    fn from(e: BrokerError) -> Self {
        FleetError::BrokerUnavailable(e)
    }
}

fn validate_location(location: &Location, field: &str) -> Result<(), FleetError> {
    if location.is_valid() {
        Ok(())
    } else {
        Err(FleetError::Validation(format!(
            "{field}: latitude must be within [-90, 90] and longitude within [-180, 180]"
        )))
    }
}

/// Online status, position reports and in-ride actions of drivers.
pub struct Fleet {
    drivers: SharedDriverStore,
    bus: SharedBus,
    offers: Arc<OfferTable>,
    pricing: PricingTable,
    config: DispatchConfig,
}

impl Fleet {
    pub fn new(
        drivers: SharedDriverStore,
        bus: SharedBus,
        offers: Arc<OfferTable>,
        pricing: PricingTable,
        config: DispatchConfig,
    ) -> Self {
        Self {
            drivers,
            bus,
            offers,
            pricing,
            config,
        }
    }

    #[tracing::instrument(skip_all, fields(driver_id = %driver_id))]
    pub async fn go_online(
        &self,
        driver_id: Uuid,
        request: GoOnlineRequest,
    ) -> Result<GoOnlineResponse, FleetError> {
        let location = Location::new(request.latitude, request.longitude);
        validate_location(&location, "location")?;
        let session = self
            .drivers
            .open_session(driver_id, location, OffsetDateTime::now_utc())
            .await?;
        info!(driver_id = %driver_id, session_id = %session.id, "Driver online");
        Ok(GoOnlineResponse {
            status: DriverStatus::Available,
            session_id: session.id,
            message: "You are now online".into(),
        })
    }

    #[tracing::instrument(skip_all, fields(driver_id = %driver_id))]
    pub async fn go_offline(&self, driver_id: Uuid) -> Result<GoOfflineResponse, FleetError> {
        let session = self
            .drivers
            .close_session(driver_id, OffsetDateTime::now_utc())
            .await?;
        if let Some(offer) = self.offers.withdraw_driver(driver_id) {
            debug!(driver_id = %driver_id, ride_id = %offer.ride_id, "Withdrew offer of departing driver");
        }
        info!(driver_id = %driver_id, session_id = %session.id, "Driver offline");
        Ok(GoOfflineResponse {
            status: DriverStatus::Offline,
            session_id: session.id,
            session_summary: SessionSummary {
                duration_hours: session.duration_hours(),
                rides_completed: u32::try_from(session.rides_completed).unwrap_or_default(),
                earnings: session.earnings,
            },
            message: "You are now offline".into(),
        })
    }

    /// Records a position report and, during a ride, forwards it to the Ride
    /// Service. Announces `ARRIVED` once the driver reaches the pickup.
    pub async fn report_location(
        &self,
        driver_id: Uuid,
        fix: LocationFix,
    ) -> Result<LocationUpdateResponse, FleetError> {
        validate_location(&fix.location, "location")?;
        let record = self.drivers.record_location(driver_id, fix.clone()).await?;

        if let Some(assignment) = record.assignment.filter(Assignment::is_active) {
            let message = LocationMessage {
                driver_id,
                ride_id: assignment.ride_id,
                location: fix.location.clone(),
                speed_kmh: fix.speed_kmh,
                heading_degrees: fix.heading_degrees,
                timestamp: fix.at,
            };
            if let Err(e) = self.publish_location(&message).await {
                warn!(driver_id = %driver_id, ride_id = %assignment.ride_id, error = %e, "Failed to forward location");
            }

            let distance_m = haversine_km(&fix.location, &assignment.pickup) * 1000.0;
            if assignment.status == AssignmentStatus::Assigned
                && distance_m <= self.config.arrival_radius_m
            {
                if let Err(e) = self.announce_arrival(&assignment, &fix.location).await {
                    warn!(driver_id = %driver_id, ride_id = %assignment.ride_id, error = %e, "Failed to announce arrival");
                }
            }
        }

        Ok(LocationUpdateResponse {
            coordinate_id: record.coordinate_id,
            updated_at: record.recorded_at,
        })
    }

    async fn publish_location(&self, message: &LocationMessage) -> Result<(), BrokerError> {
        let outgoing = OutgoingMessage::json(message)?.fire_and_forget();
        self.bus
            .publish(LOCATION_EXCHANGE, LOCATION_ROUTING_KEY, outgoing)
            .await
    }

    /// Publishes `ARRIVED` and then records it.
    ///
    /// If recording fails the next report publishes again, which the Ride
    /// Service treats as a replay.
    async fn announce_arrival(&self, assignment: &Assignment, at: &Location) -> Result<(), FleetError> {
        let now = OffsetDateTime::now_utc();
        self.publish_driver_status(DriverStatusMessage {
            driver_location: Some(at.clone()),
            ..status_message(assignment, DriverRideEvent::Arrived, now)
        })
        .await?;
        self.drivers
            .mark_arrived(assignment.ride_id, assignment.driver_id, now)
            .await?;
        info!(driver_id = %assignment.driver_id, ride_id = %assignment.ride_id, "Driver arrived at pickup");
        Ok(())
    }

    async fn publish_driver_status(&self, message: DriverStatusMessage) -> Result<(), BrokerError> {
        let outgoing = OutgoingMessage::json(&message)?;
        self.bus
            .publish(RIDE_TOPIC, &driver_status_key(message.status), outgoing)
            .await
    }

    async fn own_assignment(&self, driver_id: Uuid, ride_id: Uuid) -> Result<Assignment, FleetError> {
        self.drivers
            .assignment_for_ride(ride_id)
            .await?
            .filter(|a| a.driver_id == driver_id)
            .ok_or(FleetError::RideNotFound)
    }

    /// Starts the ride. Repeating the call after success republishes
    /// `IN_PROGRESS` without changing anything.
    #[tracing::instrument(skip_all, fields(driver_id = %driver_id, ride_id = %request.ride_id))]
    pub async fn start_ride(
        &self,
        driver_id: Uuid,
        request: StartRideRequest,
    ) -> Result<StartRideResponse, FleetError> {
        validate_location(&request.driver_location, "driver_location")?;
        let mut assignment = self.own_assignment(driver_id, request.ride_id).await?;
        let now = OffsetDateTime::now_utc();
        self.drivers
            .record_location(driver_id, LocationFix::at(request.driver_location.clone(), now))
            .await?;

        if assignment.status == AssignmentStatus::Assigned {
            self.announce_arrival(&assignment, &request.driver_location)
                .await?;
            assignment.status = AssignmentStatus::Arrived;
        }
        let started = match assignment.status {
            AssignmentStatus::Arrived => {
                self.drivers
                    .mark_started(request.ride_id, driver_id, now)
                    .await?
            }
            AssignmentStatus::InProgress => assignment,
            status => return Err(FleetError::InvalidState { status }),
        };

        self.publish_driver_status(DriverStatusMessage {
            driver_location: Some(request.driver_location.clone()),
            ..status_message(&started, DriverRideEvent::InProgress, now)
        })
        .await?;
        info!(driver_id = %driver_id, ride_id = %request.ride_id, "Ride started");
        Ok(StartRideResponse {
            ride_id: request.ride_id,
            status: RideStatus::InProgress,
            started_at: started.started_at.unwrap_or(now),
            message: "Ride started".into(),
        })
    }

    /// Completes the ride and prices it from the actual distance and duration.
    #[tracing::instrument(skip_all, fields(driver_id = %driver_id, ride_id = %request.ride_id))]
    pub async fn complete_ride(
        &self,
        driver_id: Uuid,
        request: CompleteRideRequest,
    ) -> Result<CompleteRideResponse, FleetError> {
        validate_location(&request.final_location, "final_location")?;
        for (field, value) in [
            ("actual_distance_km", request.actual_distance_km),
            ("actual_duration_minutes", request.actual_duration_minutes),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(FleetError::Validation(format!(
                    "{field} must be a non-negative number"
                )));
            }
        }
        let assignment = self.own_assignment(driver_id, request.ride_id).await?;
        let now = OffsetDateTime::now_utc();

        let completed = match assignment.status {
            AssignmentStatus::InProgress => {
                let final_fare = self
                    .pricing
                    .for_type(assignment.ride_type)
                    .fare(request.actual_distance_km, request.actual_duration_minutes);
                self.drivers
                    .finish_ride(FinishRide {
                        ride_id: request.ride_id,
                        driver_id,
                        final_location: request.final_location.clone(),
                        final_fare,
                        driver_earnings: self.config.driver_earnings(final_fare),
                        actual_distance_km: request.actual_distance_km,
                        actual_duration_minutes: request.actual_duration_minutes,
                        at: now,
                    })
                    .await?
            }
            AssignmentStatus::Completed => assignment,
            status => return Err(FleetError::InvalidState { status }),
        };

        let final_fare = completed.final_fare.unwrap_or(completed.estimated_fare);
        self.publish_driver_status(DriverStatusMessage {
            final_fare: Some(final_fare),
            actual_distance_km: Some(request.actual_distance_km),
            actual_duration_minutes: Some(request.actual_duration_minutes),
            driver_location: Some(request.final_location.clone()),
            ..status_message(&completed, DriverRideEvent::Completed, now)
        })
        .await?;
        info!(driver_id = %driver_id, ride_id = %request.ride_id, %final_fare, "Ride completed");
        Ok(CompleteRideResponse {
            ride_id: request.ride_id,
            status: RideStatus::Completed,
            completed_at: completed.completed_at.unwrap_or(now),
            driver_earnings: completed
                .driver_earnings
                .unwrap_or_else(|| self.config.driver_earnings(final_fare)),
            message: "Ride completed".into(),
        })
    }

    /// Drops an accepted ride and frees the driver.
    #[tracing::instrument(skip_all, fields(driver_id = %driver_id, ride_id = %request.ride_id))]
    pub async fn cancel_ride(
        &self,
        driver_id: Uuid,
        request: DriverCancelRequest,
    ) -> Result<DriverCancelResponse, FleetError> {
        let assignment = self.own_assignment(driver_id, request.ride_id).await?;
        let reason = request
            .reason
            .map(|r| r.trim().to_owned())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| DRIVER_CANCELLED_REASON.to_owned());
        let now = OffsetDateTime::now_utc();

        let cancelled = match assignment.status {
            s if s.is_active() => self
                .drivers
                .release_ride(request.ride_id, Some(driver_id), Some(reason.clone()), now)
                .await?
                .ok_or(FleetError::RideNotFound)?,
            AssignmentStatus::Cancelled => assignment,
            status => return Err(FleetError::InvalidState { status }),
        };

        self.publish_driver_status(DriverStatusMessage {
            reason: Some(reason),
            ..status_message(&cancelled, DriverRideEvent::Cancelled, now)
        })
        .await?;
        info!(driver_id = %driver_id, ride_id = %request.ride_id, "Ride cancelled by driver");
        Ok(DriverCancelResponse {
            ride_id: request.ride_id,
            status: RideStatus::Cancelled,
            cancelled_at: cancelled.cancelled_at.unwrap_or(now),
            message: "Ride cancelled".into(),
        })
    }

    /// Hands a driver's `ride_response` to the matcher waiting on it.
    pub fn respond_to_offer(&self, driver_id: Uuid, response: ValidRideResponse) -> Resolution {
        let reply = if response.accepted {
            OfferReply::Accepted {
                current_location: response.current_location,
            }
        } else {
            OfferReply::Declined
        };
        let resolution = self
            .offers
            .resolve(driver_id, response.offer_id, response.ride_id, reply);
        debug!(driver_id = %driver_id, offer_id = %response.offer_id, ?resolution, "Offer response");
        resolution
    }
}

fn status_message(assignment: &Assignment, event: DriverRideEvent, at: OffsetDateTime) -> DriverStatusMessage {
    DriverStatusMessage {
        ride_id: assignment.ride_id,
        driver_id: assignment.driver_id,
        status: event,
        final_fare: None,
        actual_distance_km: None,
        actual_duration_minutes: None,
        reason: None,
        driver_location: None,
        timestamp: at,
    }
}
