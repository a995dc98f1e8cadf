use super::{
    DriverStore, FinishRide, LocationFix, LocationRecord, NewAssignment, StoreError,
    is_unique_violation,
};
use crate::entities::AssignmentStatus;
use crate::entities::assignments::{
    Assignment, GetActiveAssignmentForDriver, GetLatestAssignmentForRide,
};
use crate::entities::driver_sessions::DriverSession;
use crate::entities::drivers::{Driver, GetDriver, ListAvailableDrivers};
use crate::entities::location_history::LocationPoint;
use crate::framework::DatabaseProcessor;
use async_trait::async_trait;
use kanau::processor::Processor;
use rideflow_sdk::objects::{DriverStatus, Location, RideType};
use time::OffsetDateTime;
use uuid::Uuid;

/// [`DriverStore`] backed by PostgreSQL.
#[derive(Clone)]
pub struct PgDriverStore {
    db: DatabaseProcessor,
}

impl PgDriverStore {
    pub fn new(db: DatabaseProcessor) -> Self {
        Self { db }
    }
}

#[async_trait]
impl DriverStore for PgDriverStore {
    async fn driver(&self, driver_id: Uuid) -> Result<Option<Driver>, StoreError> {
        Ok(self.db.process(GetDriver { driver_id }).await?)
    }

    async fn available_drivers(&self, ride_type: RideType) -> Result<Vec<Driver>, StoreError> {
        Ok(self.db.process(ListAvailableDrivers { ride_type }).await?)
    }

    #[tracing::instrument(skip_all, err, fields(driver_id = %driver_id))]
    async fn open_session(
        &self,
        driver_id: Uuid,
        location: Location,
        at: OffsetDateTime,
    ) -> Result<DriverSession, StoreError> {
        let mut tx = self.db.begin().await?;
        Driver::lock_tx(&mut tx, driver_id)
            .await?
            .ok_or(StoreError::DriverNotFound(driver_id))?;
        if DriverSession::open_for_driver_tx(&mut tx, driver_id)
            .await?
            .is_some()
        {
            return Err(StoreError::AlreadyOnline);
        }
        let session = match DriverSession::open_tx(&mut tx, driver_id, at).await {
            Ok(session) => session,
            Err(e) if is_unique_violation(&e) => return Err(StoreError::AlreadyOnline),
            Err(e) => return Err(e.into()),
        };
        Driver::move_to_tx(&mut tx, driver_id, &location, at).await?;
        Driver::set_status_tx(&mut tx, driver_id, DriverStatus::Available).await?;
        tx.commit().await?;
        Ok(session)
    }

    #[tracing::instrument(skip_all, err, fields(driver_id = %driver_id))]
    async fn close_session(&self, driver_id: Uuid, at: OffsetDateTime) -> Result<DriverSession, StoreError> {
        let mut tx = self.db.begin().await?;
        Driver::lock_tx(&mut tx, driver_id)
            .await?
            .ok_or(StoreError::DriverNotFound(driver_id))?;
        if Assignment::lock_active_for_driver_tx(&mut tx, driver_id)
            .await?
            .is_some()
        {
            return Err(StoreError::DriverBusy);
        }
        let session = DriverSession::open_for_driver_tx(&mut tx, driver_id)
            .await?
            .ok_or(StoreError::NotOnline)?;
        let closed = DriverSession::close_tx(&mut tx, session.id, at).await?;
        Driver::set_status_tx(&mut tx, driver_id, DriverStatus::Offline).await?;
        tx.commit().await?;
        Ok(closed)
    }

    async fn record_location(&self, driver_id: Uuid, fix: LocationFix) -> Result<LocationRecord, StoreError> {
        let mut tx = self.db.begin().await?;
        let driver = Driver::lock_tx(&mut tx, driver_id)
            .await?
            .ok_or(StoreError::DriverNotFound(driver_id))?;
        if driver.status == DriverStatus::Offline {
            return Err(StoreError::NotOnline);
        }
        let coordinate_id = Driver::move_to_tx(&mut tx, driver_id, &fix.location, fix.at).await?;
        let assignment = Assignment::lock_active_for_driver_tx(&mut tx, driver_id).await?;
        LocationPoint::insert_tx(
            &mut tx,
            &LocationPoint {
                driver_id,
                coordinate_id,
                ride_id: assignment.as_ref().map(|a| a.ride_id),
                accuracy_meters: fix.accuracy_meters,
                speed_kmh: fix.speed_kmh,
                heading_degrees: fix.heading_degrees,
                recorded_at: fix.at,
            },
        )
        .await?;
        tx.commit().await?;
        Ok(LocationRecord {
            coordinate_id,
            recorded_at: fix.at,
            assignment,
        })
    }

    #[tracing::instrument(skip_all, err, fields(ride_id = %new.ride_id, driver_id = %new.driver_id))]
    async fn assign_ride(&self, new: NewAssignment) -> Result<Assignment, StoreError> {
        let mut tx = self.db.begin().await?;
        let driver = Driver::lock_tx(&mut tx, new.driver_id)
            .await?
            .ok_or(StoreError::DriverNotFound(new.driver_id))?;
        if driver.status != DriverStatus::Available
            || Assignment::lock_active_for_driver_tx(&mut tx, new.driver_id)
                .await?
                .is_some()
        {
            return Err(StoreError::DriverUnavailable(new.driver_id));
        }
        if Assignment::lock_active_for_ride_tx(&mut tx, new.ride_id)
            .await?
            .is_some()
        {
            return Err(StoreError::RideAlreadyAssigned(new.ride_id));
        }
        let ride_id = new.ride_id;
        let driver_id = new.driver_id;
        let assignment = new.into_assignment(Uuid::now_v7());
        match Assignment::insert_tx(&mut tx, &assignment).await {
            Ok(()) => {}
            Err(e) if is_unique_violation(&e) => return Err(StoreError::RideAlreadyAssigned(ride_id)),
            Err(e) => return Err(e.into()),
        }
        Driver::set_status_tx(&mut tx, driver_id, DriverStatus::Busy).await?;
        tx.commit().await?;
        Ok(assignment)
    }

    async fn assignment_for_driver(&self, driver_id: Uuid) -> Result<Option<Assignment>, StoreError> {
        Ok(self
            .db
            .process(GetActiveAssignmentForDriver { driver_id })
            .await?)
    }

    async fn assignment_for_ride(&self, ride_id: Uuid) -> Result<Option<Assignment>, StoreError> {
        Ok(self
            .db
            .process(GetLatestAssignmentForRide { ride_id })
            .await?)
    }

    async fn mark_arrived(&self, ride_id: Uuid, driver_id: Uuid, at: OffsetDateTime) -> Result<bool, StoreError> {
        let mut tx = self.db.begin().await?;
        let changed = Assignment::mark_arrived_tx(&mut tx, ride_id, driver_id, at).await?;
        tx.commit().await?;
        Ok(changed)
    }

    async fn mark_started(
        &self,
        ride_id: Uuid,
        driver_id: Uuid,
        at: OffsetDateTime,
    ) -> Result<Assignment, StoreError> {
        let mut tx = self.db.begin().await?;
        let assignment = Assignment::mark_started_tx(&mut tx, ride_id, driver_id, at)
            .await?
            .ok_or(StoreError::InvalidAssignment { ride_id })?;
        tx.commit().await?;
        Ok(assignment)
    }

    #[tracing::instrument(skip_all, err, fields(ride_id = %finish.ride_id, driver_id = %finish.driver_id))]
    async fn finish_ride(&self, finish: FinishRide) -> Result<Assignment, StoreError> {
        let mut tx = self.db.begin().await?;
        let mut assignment = Assignment::lock_active_for_driver_tx(&mut tx, finish.driver_id)
            .await?
            .filter(|a| a.ride_id == finish.ride_id && a.status == AssignmentStatus::InProgress)
            .ok_or(StoreError::InvalidAssignment {
                ride_id: finish.ride_id,
            })?;
        Assignment::complete_tx(
            &mut tx,
            assignment.id,
            finish.final_fare,
            finish.driver_earnings,
            finish.actual_distance_km,
            finish.actual_duration_minutes,
            finish.at,
        )
        .await?;
        DriverSession::add_completed_ride_tx(&mut tx, finish.driver_id, finish.driver_earnings).await?;
        Driver::move_to_tx(&mut tx, finish.driver_id, &finish.final_location, finish.at).await?;
        Driver::set_status_tx(&mut tx, finish.driver_id, DriverStatus::Available).await?;
        tx.commit().await?;

        assignment.status = AssignmentStatus::Completed;
        assignment.completed_at = Some(assignment.started_at.map_or(finish.at, |s| s.max(finish.at)));
        assignment.final_fare = Some(finish.final_fare);
        assignment.driver_earnings = Some(finish.driver_earnings);
        Ok(assignment)
    }

    #[tracing::instrument(skip_all, err, fields(ride_id = %ride_id))]
    async fn release_ride(
        &self,
        ride_id: Uuid,
        driver_id: Option<Uuid>,
        reason: Option<String>,
        at: OffsetDateTime,
    ) -> Result<Option<Assignment>, StoreError> {
        let mut tx = self.db.begin().await?;
        let Some(mut assignment) = Assignment::lock_active_for_ride_tx(&mut tx, ride_id)
            .await?
            .filter(|a| driver_id.is_none_or(|d| d == a.driver_id))
        else {
            return Ok(None);
        };
        Assignment::cancel_tx(&mut tx, assignment.id, reason.as_deref(), at).await?;
        let driver = Driver::lock_tx(&mut tx, assignment.driver_id).await?;
        if driver.is_some_and(|d| d.status == DriverStatus::Busy) {
            Driver::set_status_tx(&mut tx, assignment.driver_id, DriverStatus::Available).await?;
        }
        tx.commit().await?;

        assignment.status = AssignmentStatus::Cancelled;
        assignment.cancelled_at = Some(assignment.assigned_at.max(at));
        Ok(Some(assignment))
    }
}
