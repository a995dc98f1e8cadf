use super::{RideStore, StoreError, is_unique_violation};
use crate::entities::rides::{GetActiveRideForPassenger, GetRide, NewRide, Ride, RideTransition};
use crate::framework::DatabaseProcessor;
use async_trait::async_trait;
use kanau::processor::Processor;
use rideflow_sdk::objects::RideStatus;
use rust_decimal::Decimal;
use uuid::Uuid;

/// [`RideStore`] backed by PostgreSQL.
#[derive(Clone)]
pub struct PgRideStore {
    db: DatabaseProcessor,
}

impl PgRideStore {
    pub fn new(db: DatabaseProcessor) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RideStore for PgRideStore {
    async fn active_ride_for_passenger(&self, passenger_id: Uuid) -> Result<Option<Ride>, StoreError> {
        Ok(self
            .db
            .process(GetActiveRideForPassenger { passenger_id })
            .await?)
    }

    #[tracing::instrument(skip_all, err, fields(passenger_id = %new.passenger_id))]
    async fn create_ride(&self, new: NewRide) -> Result<Ride, StoreError> {
        let mut tx = self.db.begin().await?;
        let ride_number = Ride::next_ride_number_tx(&mut tx, new.requested_at.date()).await?;
        let ride = new.into_ride(Uuid::now_v7(), ride_number);
        match Ride::insert_tx(&mut tx, &ride).await {
            Ok(()) => {}
            Err(e) if is_unique_violation(&e) => return Err(StoreError::ActiveRideExists),
            Err(e) => return Err(e.into()),
        }
        tx.commit().await?;
        Ok(ride)
    }

    async fn ride(&self, ride_id: Uuid) -> Result<Option<Ride>, StoreError> {
        Ok(self.db.process(GetRide { ride_id }).await?)
    }

    #[tracing::instrument(skip_all, err, fields(ride_id = %transition.ride_id, to = %transition.to))]
    async fn transition(&self, transition: RideTransition) -> Result<Ride, StoreError> {
        let mut tx = self.db.begin().await?;
        let mut ride = Ride::lock_tx(&mut tx, transition.ride_id)
            .await?
            .ok_or(StoreError::RideNotFound(transition.ride_id))?;
        ride.apply(&transition)?;
        match Ride::update_state_tx(&mut tx, &ride).await {
            Ok(()) => {}
            // The driver already holds another active ride.
            Err(e) if is_unique_violation(&e) => return Err(StoreError::DriverBusy),
            Err(e) => return Err(e.into()),
        }
        tx.commit().await?;
        Ok(ride)
    }

    async fn record_feedback(
        &self,
        ride_id: Uuid,
        passenger_id: Uuid,
        rating: u8,
        tip: Decimal,
    ) -> Result<Ride, StoreError> {
        let mut tx = self.db.begin().await?;
        let mut ride = Ride::lock_tx(&mut tx, ride_id)
            .await?
            .filter(|r| r.passenger_id == passenger_id)
            .ok_or(StoreError::RideNotFound(ride_id))?;
        if ride.status != RideStatus::Completed {
            return Err(StoreError::RideNotCompleted {
                status: ride.status,
            });
        }
        Ride::record_feedback_tx(&mut tx, ride_id, rating, tip).await?;
        tx.commit().await?;
        ride.passenger_rating = Some(rating);
        ride.tip = Some(tip);
        Ok(ride)
    }
}
