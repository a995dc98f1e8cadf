use crate::entities::coordinates::Coordinate;
use crate::entities::{RideState, VehicleClass};
use crate::framework::DatabaseProcessor;
use crate::lifecycle::{Actor, TransitionError, check_transition};
use kanau::processor::Processor;
use rideflow_sdk::objects::{Location, RideStatus, RideType};
use rust_decimal::Decimal;
use time::OffsetDateTime;
use uuid::Uuid;

/// A ride as seen by the Ride Service.
#[derive(Debug, Clone, PartialEq)]
pub struct Ride {
    pub id: Uuid,
    pub ride_number: String,
    pub passenger_id: Uuid,
    pub driver_id: Option<Uuid>,
    pub ride_type: RideType,
    pub status: RideStatus,
    pub priority: u8,
    pub pickup: Location,
    pub destination: Location,
    pub estimated_fare: Decimal,
    pub final_fare: Option<Decimal>,
    pub estimated_distance_km: f64,
    pub estimated_duration_minutes: u32,
    pub requested_at: OffsetDateTime,
    pub matched_at: Option<OffsetDateTime>,
    pub arrived_at: Option<OffsetDateTime>,
    pub started_at: Option<OffsetDateTime>,
    pub completed_at: Option<OffsetDateTime>,
    pub cancelled_at: Option<OffsetDateTime>,
    pub cancellation_reason: Option<String>,
    pub passenger_rating: Option<u8>,
    pub tip: Option<Decimal>,
}

/// Input of ride creation. The ride number is assigned by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRide {
    pub passenger_id: Uuid,
    pub ride_type: RideType,
    pub priority: u8,
    pub pickup: Location,
    pub destination: Location,
    pub estimated_fare: Decimal,
    pub estimated_distance_km: f64,
    pub estimated_duration_minutes: u32,
    pub requested_at: OffsetDateTime,
}

impl NewRide {
    pub fn into_ride(self, id: Uuid, ride_number: String) -> Ride {
        Ride {
            id,
            ride_number,
            passenger_id: self.passenger_id,
            driver_id: None,
            ride_type: self.ride_type,
            status: RideStatus::Requested,
            priority: self.priority,
            pickup: self.pickup,
            destination: self.destination,
            estimated_fare: self.estimated_fare,
            final_fare: None,
            estimated_distance_km: self.estimated_distance_km,
            estimated_duration_minutes: self.estimated_duration_minutes,
            requested_at: self.requested_at,
            matched_at: None,
            arrived_at: None,
            started_at: None,
            completed_at: None,
            cancelled_at: None,
            cancellation_reason: None,
            passenger_rating: None,
            tip: None,
        }
    }
}

/// A requested status change.
#[derive(Debug, Clone, PartialEq)]
pub struct RideTransition {
    pub ride_id: Uuid,
    pub to: RideStatus,
    pub actor: Actor,
    /// Required when moving to `MATCHED`.
    pub driver_id: Option<Uuid>,
    pub reason: Option<String>,
    pub final_fare: Option<Decimal>,
    pub at: OffsetDateTime,
}

impl RideTransition {
    pub fn new(ride_id: Uuid, to: RideStatus, actor: Actor) -> Self {
        Self {
            ride_id,
            to,
            actor,
            driver_id: None,
            reason: None,
            final_fare: None,
            at: OffsetDateTime::now_utc(),
        }
    }

    pub fn matched(ride_id: Uuid, driver_id: Uuid) -> Self {
        Self {
            driver_id: Some(driver_id),
            ..Self::new(ride_id, RideStatus::Matched, Actor::System)
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_final_fare(mut self, fare: Option<Decimal>) -> Self {
        self.final_fare = fare;
        self
    }
}

impl Ride {
    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    fn latest_timestamp(&self) -> OffsetDateTime {
        [
            self.matched_at,
            self.arrived_at,
            self.started_at,
            self.completed_at,
            self.cancelled_at,
        ]
        .into_iter()
        .flatten()
        .fold(self.requested_at, OffsetDateTime::max)
    }

    /// Applies `transition` in memory after checking it against the state machine.
    ///
    /// Lifecycle timestamps never go backwards, and `driver_id` is set exactly
    /// while a driver is attached.
    pub fn apply(&mut self, transition: &RideTransition) -> Result<(), TransitionError> {
        check_transition(self.status, transition.to, transition.actor)?;
        let at = transition.at.max(self.latest_timestamp());

        match transition.to {
            RideStatus::Matched => {
                let Some(driver_id) = transition.driver_id else {
                    return Err(TransitionError::InvalidStateTransition {
                        from: self.status,
                        to: transition.to,
                    });
                };
                self.driver_id = Some(driver_id);
                self.matched_at = Some(at);
            }
            RideStatus::DriverArrived => self.arrived_at = Some(at),
            RideStatus::InProgress => self.started_at = Some(at),
            RideStatus::Completed => {
                self.completed_at = Some(at);
                self.final_fare = transition.final_fare.or(Some(self.estimated_fare));
            }
            RideStatus::Cancelled | RideStatus::NoDriver => {
                self.driver_id = None;
                self.cancelled_at = Some(at);
                self.cancellation_reason = transition.reason.clone();
            }
            RideStatus::Requested => {}
        }
        self.status = transition.to;
        Ok(())
    }
}

/// Date-scoped human-readable ride number: `RIDE_<YYYYMMDD>_<6-digit sequence>`.
pub fn ride_number(date: time::Date, sequence: i64) -> String {
    format!(
        "RIDE_{:04}{:02}{:02}_{:06}",
        date.year(),
        u8::from(date.month()),
        date.day(),
        sequence.rem_euclid(1_000_000)
    )
}

// ----------------------------------------------------------------------------
// Rows
// ----------------------------------------------------------------------------

macro_rules! select_rides {
    () => {
        r#"
        SELECT
            r.id,
            r.ride_number,
            r.passenger_id,
            r.driver_id,
            r.ride_type,
            r.status,
            r.priority,
            p.latitude AS pickup_latitude,
            p.longitude AS pickup_longitude,
            p.address AS pickup_address,
            d.latitude AS destination_latitude,
            d.longitude AS destination_longitude,
            d.address AS destination_address,
            r.estimated_fare,
            r.final_fare,
            r.estimated_distance_km,
            r.estimated_duration_minutes,
            r.requested_at,
            r.matched_at,
            r.arrived_at,
            r.started_at,
            r.completed_at,
            r.cancelled_at,
            r.cancellation_reason,
            r.passenger_rating,
            r.tip
        FROM rides r
        JOIN coordinates p ON p.id = r.pickup_coordinate_id
        JOIN coordinates d ON d.id = r.destination_coordinate_id
        "#
    };
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RideRow {
    pub id: Uuid,
    pub ride_number: String,
    pub passenger_id: Uuid,
    pub driver_id: Option<Uuid>,
    pub ride_type: VehicleClass,
    pub status: RideState,
    pub priority: i16,
    pub pickup_latitude: f64,
    pub pickup_longitude: f64,
    pub pickup_address: Option<String>,
    pub destination_latitude: f64,
    pub destination_longitude: f64,
    pub destination_address: Option<String>,
    pub estimated_fare: Decimal,
    pub final_fare: Option<Decimal>,
    pub estimated_distance_km: f64,
    pub estimated_duration_minutes: i32,
    pub requested_at: OffsetDateTime,
    pub matched_at: Option<OffsetDateTime>,
    pub arrived_at: Option<OffsetDateTime>,
    pub started_at: Option<OffsetDateTime>,
    pub completed_at: Option<OffsetDateTime>,
    pub cancelled_at: Option<OffsetDateTime>,
    pub cancellation_reason: Option<String>,
    pub passenger_rating: Option<i16>,
    pub tip: Option<Decimal>,
}

impl From<RideRow> for Ride {
    fn from(row: RideRow) -> Self {
        Ride {
            id: row.id,
            ride_number: row.ride_number,
            passenger_id: row.passenger_id,
            driver_id: row.driver_id,
            ride_type: row.ride_type.into(),
            status: row.status.into(),
            priority: u8::try_from(row.priority).unwrap_or_default(),
            pickup: Location {
                latitude: row.pickup_latitude,
                longitude: row.pickup_longitude,
                address: row.pickup_address,
            },
            destination: Location {
                latitude: row.destination_latitude,
                longitude: row.destination_longitude,
                address: row.destination_address,
            },
            estimated_fare: row.estimated_fare,
            final_fare: row.final_fare,
            estimated_distance_km: row.estimated_distance_km,
            estimated_duration_minutes: u32::try_from(row.estimated_duration_minutes)
                .unwrap_or_default(),
            requested_at: row.requested_at,
            matched_at: row.matched_at,
            arrived_at: row.arrived_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            cancelled_at: row.cancelled_at,
            cancellation_reason: row.cancellation_reason,
            passenger_rating: row.passenger_rating.and_then(|r| u8::try_from(r).ok()),
            tip: row.tip,
        }
    }
}

// ----------------------------------------------------------------------------
// Queries
// ----------------------------------------------------------------------------

#[derive(Debug, Clone)]
/// Get a ride by id.
pub struct GetRide {
    pub ride_id: Uuid,
}

impl Processor<GetRide> for DatabaseProcessor {
    type Output = Option<Ride>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetRide")]
    async fn process(&self, query: GetRide) -> Result<Option<Ride>, sqlx::Error> {
        let row = sqlx::query_as::<_, RideRow>(concat!(select_rides!(), " WHERE r.id = $1"))
            .bind(query.ride_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Ride::from))
    }
}

#[derive(Debug, Clone)]
/// Get the passenger's ride that has not reached a terminal state, if any.
pub struct GetActiveRideForPassenger {
    pub passenger_id: Uuid,
}

impl Processor<GetActiveRideForPassenger> for DatabaseProcessor {
    type Output = Option<Ride>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetActiveRideForPassenger")]
    async fn process(&self, query: GetActiveRideForPassenger) -> Result<Option<Ride>, sqlx::Error> {
        let row = sqlx::query_as::<_, RideRow>(concat!(
            select_rides!(),
            r#" WHERE r.passenger_id = $1
                AND r.status IN ('requested', 'matched', 'driver_arrived', 'in_progress')
                LIMIT 1"#
        ))
        .bind(query.passenger_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Ride::from))
    }
}

impl Ride {
    /// Allocate the next ride number within a transaction.
    pub async fn next_ride_number_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        date: time::Date,
    ) -> Result<String, sqlx::Error> {
        let sequence: i64 = sqlx::query_scalar("SELECT nextval('ride_number_seq')")
            .fetch_one(&mut **tx)
            .await?;
        Ok(ride_number(date, sequence))
    }

    /// Insert a ride and its two coordinates within a transaction.
    pub async fn insert_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        ride: &Ride,
    ) -> Result<(), sqlx::Error> {
        let pickup_id = Coordinate::insert_tx(tx, &ride.pickup).await?;
        let destination_id = Coordinate::insert_tx(tx, &ride.destination).await?;
        sqlx::query(
            r#"
            INSERT INTO rides (
                id, ride_number, passenger_id, ride_type, status, priority,
                pickup_coordinate_id, destination_coordinate_id,
                estimated_fare, estimated_distance_km, estimated_duration_minutes,
                requested_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(ride.id)
        .bind(&ride.ride_number)
        .bind(ride.passenger_id)
        .bind(VehicleClass::from(ride.ride_type))
        .bind(RideState::from(ride.status))
        .bind(i16::from(ride.priority))
        .bind(pickup_id)
        .bind(destination_id)
        .bind(ride.estimated_fare)
        .bind(ride.estimated_distance_km)
        .bind(i32::try_from(ride.estimated_duration_minutes).unwrap_or(i32::MAX))
        .bind(ride.requested_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Load a ride and lock its row until the transaction ends.
    pub async fn lock_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        ride_id: Uuid,
    ) -> Result<Option<Ride>, sqlx::Error> {
        let row = sqlx::query_as::<_, RideRow>(concat!(
            select_rides!(),
            " WHERE r.id = $1 FOR UPDATE OF r"
        ))
        .bind(ride_id)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(row.map(Ride::from))
    }

    /// Persist the lifecycle columns of `ride` within a transaction.
    pub async fn update_state_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        ride: &Ride,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE rides
            SET status = $2,
                driver_id = $3,
                final_fare = $4,
                matched_at = $5,
                arrived_at = $6,
                started_at = $7,
                completed_at = $8,
                cancelled_at = $9,
                cancellation_reason = $10
            WHERE id = $1
            "#,
        )
        .bind(ride.id)
        .bind(RideState::from(ride.status))
        .bind(ride.driver_id)
        .bind(ride.final_fare)
        .bind(ride.matched_at)
        .bind(ride.arrived_at)
        .bind(ride.started_at)
        .bind(ride.completed_at)
        .bind(ride.cancelled_at)
        .bind(ride.cancellation_reason.as_deref())
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Store the passenger's rating and tip within a transaction.
    pub async fn record_feedback_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        ride_id: Uuid,
        rating: u8,
        tip: Decimal,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE rides
            SET passenger_rating = $2, tip = $3
            WHERE id = $1
            "#,
        )
        .bind(ride_id)
        .bind(i16::from(rating))
        .bind(tip)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}
