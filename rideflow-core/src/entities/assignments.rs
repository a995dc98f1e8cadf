use crate::entities::{AssignmentStatus, VehicleClass};
use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;
use rideflow_sdk::objects::{Location, RideType};
use rust_decimal::Decimal;
use time::OffsetDateTime;
use uuid::Uuid;

/// A ride accepted by a driver, tracked by the Driver-Location Service.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub id: Uuid,
    pub ride_id: Uuid,
    pub driver_id: Uuid,
    pub passenger_id: Uuid,
    pub ride_number: String,
    pub ride_type: RideType,
    pub pickup: Location,
    pub destination: Location,
    pub estimated_fare: Decimal,
    pub status: AssignmentStatus,
    pub assigned_at: OffsetDateTime,
    pub arrived_at: Option<OffsetDateTime>,
    pub started_at: Option<OffsetDateTime>,
    pub completed_at: Option<OffsetDateTime>,
    pub cancelled_at: Option<OffsetDateTime>,
    pub final_fare: Option<Decimal>,
    pub driver_earnings: Option<Decimal>,
}

impl Assignment {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Where the driver is heading: the pickup until the ride starts, then the destination.
    pub fn target(&self) -> &Location {
        match self.status {
            AssignmentStatus::InProgress => &self.destination,
            _ => &self.pickup,
        }
    }
}

macro_rules! select_assignments {
    () => {
        r#"
        SELECT
            id, ride_id, driver_id, passenger_id, ride_number, ride_type,
            pickup_latitude, pickup_longitude, pickup_address,
            destination_latitude, destination_longitude, destination_address,
            estimated_fare, status, assigned_at, arrived_at, started_at,
            completed_at, cancelled_at, final_fare, driver_earnings
        FROM driver_assignments
        "#
    };
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AssignmentRow {
    pub id: Uuid,
    pub ride_id: Uuid,
    pub driver_id: Uuid,
    pub passenger_id: Uuid,
    pub ride_number: String,
    pub ride_type: VehicleClass,
    pub pickup_latitude: f64,
    pub pickup_longitude: f64,
    pub pickup_address: Option<String>,
    pub destination_latitude: f64,
    pub destination_longitude: f64,
    pub destination_address: Option<String>,
    pub estimated_fare: Decimal,
    pub status: AssignmentStatus,
    pub assigned_at: OffsetDateTime,
    pub arrived_at: Option<OffsetDateTime>,
    pub started_at: Option<OffsetDateTime>,
    pub completed_at: Option<OffsetDateTime>,
    pub cancelled_at: Option<OffsetDateTime>,
    pub final_fare: Option<Decimal>,
    pub driver_earnings: Option<Decimal>,
}

impl From<AssignmentRow> for Assignment {
    fn from(row: AssignmentRow) -> Self {
        Assignment {
            id: row.id,
            ride_id: row.ride_id,
            driver_id: row.driver_id,
            passenger_id: row.passenger_id,
            ride_number: row.ride_number,
            ride_type: row.ride_type.into(),
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
            status: row.status,
            assigned_at: row.assigned_at,
            arrived_at: row.arrived_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            cancelled_at: row.cancelled_at,
            final_fare: row.final_fare,
            driver_earnings: row.driver_earnings,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GetActiveAssignmentForDriver {
    pub driver_id: Uuid,
}

impl Processor<GetActiveAssignmentForDriver> for DatabaseProcessor {
    type Output = Option<Assignment>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetActiveAssignmentForDriver")]
    async fn process(
        &self,
        query: GetActiveAssignmentForDriver,
    ) -> Result<Option<Assignment>, sqlx::Error> {
        let row = sqlx::query_as::<_, AssignmentRow>(concat!(
            select_assignments!(),
            r#" WHERE driver_id = $1
                AND status IN ('assigned', 'arrived', 'in_progress')
                LIMIT 1"#
        ))
        .bind(query.driver_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Assignment::from))
    }
}

#[derive(Debug, Clone)]
/// The most recent assignment of a ride, active or not.
pub struct GetLatestAssignmentForRide {
    pub ride_id: Uuid,
}

impl Processor<GetLatestAssignmentForRide> for DatabaseProcessor {
    type Output = Option<Assignment>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetLatestAssignmentForRide")]
    async fn process(
        &self,
        query: GetLatestAssignmentForRide,
    ) -> Result<Option<Assignment>, sqlx::Error> {
        let row = sqlx::query_as::<_, AssignmentRow>(concat!(
            select_assignments!(),
            " WHERE ride_id = $1 ORDER BY assigned_at DESC LIMIT 1"
        ))
        .bind(query.ride_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Assignment::from))
    }
}

impl Assignment {
    pub async fn insert_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        assignment: &Assignment,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO driver_assignments (
                id, ride_id, driver_id, passenger_id, ride_number, ride_type,
                pickup_latitude, pickup_longitude, pickup_address,
                destination_latitude, destination_longitude, destination_address,
                estimated_fare, status, assigned_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(assignment.id)
        .bind(assignment.ride_id)
        .bind(assignment.driver_id)
        .bind(assignment.passenger_id)
        .bind(&assignment.ride_number)
        .bind(VehicleClass::from(assignment.ride_type))
        .bind(assignment.pickup.latitude)
        .bind(assignment.pickup.longitude)
        .bind(assignment.pickup.address.as_deref())
        .bind(assignment.destination.latitude)
        .bind(assignment.destination.longitude)
        .bind(assignment.destination.address.as_deref())
        .bind(assignment.estimated_fare)
        .bind(assignment.status)
        .bind(assignment.assigned_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn lock_active_for_driver_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        driver_id: Uuid,
    ) -> Result<Option<Assignment>, sqlx::Error> {
        let row = sqlx::query_as::<_, AssignmentRow>(concat!(
            select_assignments!(),
            r#" WHERE driver_id = $1
                AND status IN ('assigned', 'arrived', 'in_progress')
                FOR UPDATE"#
        ))
        .bind(driver_id)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(row.map(Assignment::from))
    }

    pub async fn lock_active_for_ride_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        ride_id: Uuid,
    ) -> Result<Option<Assignment>, sqlx::Error> {
        let row = sqlx::query_as::<_, AssignmentRow>(concat!(
            select_assignments!(),
            r#" WHERE ride_id = $1
                AND status IN ('assigned', 'arrived', 'in_progress')
                FOR UPDATE"#
        ))
        .bind(ride_id)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(row.map(Assignment::from))
    }

    /// Returns `true` when this call moved the assignment to `arrived`.
    pub async fn mark_arrived_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        ride_id: Uuid,
        driver_id: Uuid,
        at: OffsetDateTime,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE driver_assignments
            SET status = 'arrived', arrived_at = GREATEST($3, assigned_at)
            WHERE ride_id = $1 AND driver_id = $2 AND status = 'assigned'
            "#,
        )
        .bind(ride_id)
        .bind(driver_id)
        .bind(at)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_started_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        ride_id: Uuid,
        driver_id: Uuid,
        at: OffsetDateTime,
    ) -> Result<Option<Assignment>, sqlx::Error> {
        let row = sqlx::query_as::<_, AssignmentRow>(
            r#"
            UPDATE driver_assignments
            SET status = 'in_progress',
                arrived_at = COALESCE(arrived_at, GREATEST($3, assigned_at)),
                started_at = GREATEST($3, assigned_at)
            WHERE ride_id = $1 AND driver_id = $2 AND status IN ('assigned', 'arrived')
            RETURNING
                id, ride_id, driver_id, passenger_id, ride_number, ride_type,
                pickup_latitude, pickup_longitude, pickup_address,
                destination_latitude, destination_longitude, destination_address,
                estimated_fare, status, assigned_at, arrived_at, started_at,
                completed_at, cancelled_at, final_fare, driver_earnings
            "#,
        )
        .bind(ride_id)
        .bind(driver_id)
        .bind(at)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(row.map(Assignment::from))
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn complete_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        assignment_id: Uuid,
        final_fare: Decimal,
        driver_earnings: Decimal,
        actual_distance_km: f64,
        actual_duration_minutes: f64,
        at: OffsetDateTime,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE driver_assignments
            SET status = 'completed',
                completed_at = GREATEST($6, started_at),
                final_fare = $2,
                driver_earnings = $3,
                actual_distance_km = $4,
                actual_duration_minutes = $5
            WHERE id = $1
            "#,
        )
        .bind(assignment_id)
        .bind(final_fare)
        .bind(driver_earnings)
        .bind(actual_distance_km)
        .bind(actual_duration_minutes)
        .bind(at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn cancel_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        assignment_id: Uuid,
        reason: Option<&str>,
        at: OffsetDateTime,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE driver_assignments
            SET status = 'cancelled',
                cancelled_at = GREATEST($3, assigned_at),
                cancellation_reason = $2
            WHERE id = $1
            "#,
        )
        .bind(assignment_id)
        .bind(reason)
        .bind(at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}
