//! Repository contracts between the dispatch core and the database.
//!
//! Processors and services only see these traits. The PostgreSQL
//! implementations live in [`rides`] and [`drivers`].

pub mod drivers;
pub mod rides;

pub use drivers::PgDriverStore;
pub use rides::PgRideStore;

use crate::entities::assignments::Assignment;
use crate::entities::driver_sessions::DriverSession;
use crate::entities::drivers::Driver;
use crate::entities::rides::{NewRide, Ride, RideTransition};
use crate::lifecycle::TransitionError;
use async_trait::async_trait;
use rideflow_sdk::objects::{Location, RideStatus, RideType};
use rust_decimal::Decimal;
use std::sync::Arc;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("ride not found: {0}")]
    RideNotFound(Uuid),

    #[error("driver not found: {0}")]
    DriverNotFound(Uuid),

    #[error("passenger already has an active ride")]
    ActiveRideExists,

    #[error("driver {0} is not available")]
    DriverUnavailable(Uuid),

    #[error("driver is already online")]
    AlreadyOnline,

    #[error("driver is not online")]
    NotOnline,

    #[error("driver has an active ride")]
    DriverBusy,

    #[error("ride {0} already has a driver")]
    RideAlreadyAssigned(Uuid),

    #[error("ride {ride_id} is not assigned to this driver in a compatible state")]
    InvalidAssignment { ride_id: Uuid },

    #[error("ride is {status}, not COMPLETED")]
    RideNotCompleted { status: RideStatus },
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

// ----------------------------------------------------------------------------
// Ride Service
// ----------------------------------------------------------------------------

#[async_trait]
pub trait RideStore: Send + Sync + 'static {
    async fn active_ride_for_passenger(&self, passenger_id: Uuid) -> Result<Option<Ride>, StoreError>;

    /// Persist a new `REQUESTED` ride with its coordinates in one transaction.
    ///
    /// Fails with [`StoreError::ActiveRideExists`] when the passenger already
    /// has a non-terminal ride.
    async fn create_ride(&self, ride: NewRide) -> Result<Ride, StoreError>;

    async fn ride(&self, ride_id: Uuid) -> Result<Option<Ride>, StoreError>;

    /// Apply a transition under a row lock and return the updated ride.
    async fn transition(&self, transition: RideTransition) -> Result<Ride, StoreError>;

    /// Store the passenger's rating and tip on a completed ride.
    async fn record_feedback(
        &self,
        ride_id: Uuid,
        passenger_id: Uuid,
        rating: u8,
        tip: Decimal,
    ) -> Result<Ride, StoreError>;
}

pub type SharedRideStore = Arc<dyn RideStore>;

// ----------------------------------------------------------------------------
// Driver-Location Service
// ----------------------------------------------------------------------------

/// A position report from a driver.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationFix {
    pub location: Location,
    pub accuracy_meters: Option<f64>,
    pub speed_kmh: Option<f64>,
    pub heading_degrees: Option<f64>,
    pub at: OffsetDateTime,
}

impl LocationFix {
    pub fn at(location: Location, at: OffsetDateTime) -> Self {
        Self {
            location,
            accuracy_meters: None,
            speed_kmh: None,
            heading_degrees: None,
            at,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocationRecord {
    pub coordinate_id: Uuid,
    pub recorded_at: OffsetDateTime,
    /// The driver's active assignment at the time of the report.
    pub assignment: Option<Assignment>,
}

/// Input of [`DriverStore::assign_ride`].
#[derive(Debug, Clone, PartialEq)]
pub struct NewAssignment {
    pub ride_id: Uuid,
    pub driver_id: Uuid,
    pub passenger_id: Uuid,
    pub ride_number: String,
    pub ride_type: RideType,
    pub pickup: Location,
    pub destination: Location,
    pub estimated_fare: Decimal,
    pub at: OffsetDateTime,
}

impl NewAssignment {
    pub fn into_assignment(self, id: Uuid) -> Assignment {
        Assignment {
            id,
            ride_id: self.ride_id,
            driver_id: self.driver_id,
            passenger_id: self.passenger_id,
            ride_number: self.ride_number,
            ride_type: self.ride_type,
            pickup: self.pickup,
            destination: self.destination,
            estimated_fare: self.estimated_fare,
            status: crate::entities::AssignmentStatus::Assigned,
            assigned_at: self.at,
            arrived_at: None,
            started_at: None,
            completed_at: None,
            cancelled_at: None,
            final_fare: None,
            driver_earnings: None,
        }
    }
}

/// Input of [`DriverStore::finish_ride`].
#[derive(Debug, Clone, PartialEq)]
pub struct FinishRide {
    pub ride_id: Uuid,
    pub driver_id: Uuid,
    pub final_location: Location,
    pub final_fare: Decimal,
    pub driver_earnings: Decimal,
    pub actual_distance_km: f64,
    pub actual_duration_minutes: f64,
    pub at: OffsetDateTime,
}

#[async_trait]
pub trait DriverStore: Send + Sync + 'static {
    async fn driver(&self, driver_id: Uuid) -> Result<Option<Driver>, StoreError>;

    /// `AVAILABLE` drivers of `ride_type` with a known position.
    async fn available_drivers(&self, ride_type: RideType) -> Result<Vec<Driver>, StoreError>;

    /// Open a session, move the driver to `location` and mark it `AVAILABLE`.
    async fn open_session(
        &self,
        driver_id: Uuid,
        location: Location,
        at: OffsetDateTime,
    ) -> Result<DriverSession, StoreError>;

    /// Close the open session and mark the driver `OFFLINE`.
    ///
    /// Refused with [`StoreError::DriverBusy`] while the driver has an active ride.
    async fn close_session(&self, driver_id: Uuid, at: OffsetDateTime) -> Result<DriverSession, StoreError>;

    /// Persist a position report for an online driver.
    async fn record_location(&self, driver_id: Uuid, fix: LocationFix) -> Result<LocationRecord, StoreError>;

    /// Bind an accepted ride to an `AVAILABLE` driver and mark the driver `BUSY`.
    async fn assign_ride(&self, assignment: NewAssignment) -> Result<Assignment, StoreError>;

    async fn assignment_for_driver(&self, driver_id: Uuid) -> Result<Option<Assignment>, StoreError>;

    /// The latest assignment of a ride, active or not.
    async fn assignment_for_ride(&self, ride_id: Uuid) -> Result<Option<Assignment>, StoreError>;

    /// Returns `true` when this call recorded the arrival.
    async fn mark_arrived(&self, ride_id: Uuid, driver_id: Uuid, at: OffsetDateTime) -> Result<bool, StoreError>;

    async fn mark_started(
        &self,
        ride_id: Uuid,
        driver_id: Uuid,
        at: OffsetDateTime,
    ) -> Result<Assignment, StoreError>;

    /// Complete an in-progress assignment, credit the session and free the driver.
    async fn finish_ride(&self, finish: FinishRide) -> Result<Assignment, StoreError>;

    /// Cancel the ride's active assignment and return its driver to `AVAILABLE`.
    ///
    /// With `driver_id` set, only an assignment held by that driver is released.
    async fn release_ride(
        &self,
        ride_id: Uuid,
        driver_id: Option<Uuid>,
        reason: Option<String>,
        at: OffsetDateTime,
    ) -> Result<Option<Assignment>, StoreError>;
}

pub type SharedDriverStore = Arc<dyn DriverStore>;
