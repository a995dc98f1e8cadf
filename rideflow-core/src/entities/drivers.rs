use crate::entities::coordinates::Coordinate;
use crate::entities::{DriverState, VehicleClass};
use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;
use rideflow_sdk::objects::{DriverInfo, DriverStatus, Location, RideType, VehicleInfo};
use rust_decimal::Decimal;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct Driver {
    pub id: Uuid,
    pub name: String,
    pub status: DriverStatus,
    pub vehicle: VehicleInfo,
    pub rating: Option<Decimal>,
    pub location: Option<Location>,
    pub location_updated_at: Option<OffsetDateTime>,
}

impl Driver {
    pub fn ride_type(&self) -> RideType {
        self.vehicle.class
    }

    pub fn info(&self) -> DriverInfo {
        DriverInfo {
            driver_id: self.id,
            name: self.name.clone(),
            rating: self.rating,
            vehicle: self.vehicle.clone(),
        }
    }
}

macro_rules! select_drivers {
    () => {
        r#"
        SELECT
            d.id,
            d.name,
            d.vehicle_class,
            d.vehicle_make,
            d.vehicle_model,
            d.vehicle_plate,
            d.rating,
            d.status,
            c.latitude,
            c.longitude,
            c.address,
            d.location_updated_at
        FROM drivers d
        LEFT JOIN coordinates c ON c.id = d.current_coordinate_id
        "#
    };
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DriverRow {
    pub id: Uuid,
    pub name: String,
    pub vehicle_class: VehicleClass,
    pub vehicle_make: Option<String>,
    pub vehicle_model: Option<String>,
    pub vehicle_plate: Option<String>,
    pub rating: Option<Decimal>,
    pub status: DriverState,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub address: Option<String>,
    pub location_updated_at: Option<OffsetDateTime>,
}

impl From<DriverRow> for Driver {
    fn from(row: DriverRow) -> Self {
        let location = match (row.latitude, row.longitude) {
            (Some(latitude), Some(longitude)) => Some(Location {
                latitude,
                longitude,
                address: row.address,
            }),
            _ => None,
        };
        Driver {
            id: row.id,
            name: row.name,
            status: row.status.into(),
            vehicle: VehicleInfo {
                class: row.vehicle_class.into(),
                make: row.vehicle_make,
                model: row.vehicle_model,
                plate: row.vehicle_plate,
            },
            rating: row.rating,
            location,
            location_updated_at: row.location_updated_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GetDriver {
    pub driver_id: Uuid,
}

impl Processor<GetDriver> for DatabaseProcessor {
    type Output = Option<Driver>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetDriver")]
    async fn process(&self, query: GetDriver) -> Result<Option<Driver>, sqlx::Error> {
        let row = sqlx::query_as::<_, DriverRow>(concat!(select_drivers!(), " WHERE d.id = $1"))
            .bind(query.driver_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Driver::from))
    }
}

#[derive(Debug, Clone)]
/// Available drivers of one vehicle class with a known position.
pub struct ListAvailableDrivers {
    pub ride_type: RideType,
}

impl Processor<ListAvailableDrivers> for DatabaseProcessor {
    type Output = Vec<Driver>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ListAvailableDrivers")]
    async fn process(&self, query: ListAvailableDrivers) -> Result<Vec<Driver>, sqlx::Error> {
        let rows = sqlx::query_as::<_, DriverRow>(concat!(
            select_drivers!(),
            r#" WHERE d.status = 'available'
                AND d.vehicle_class = $1
                AND d.current_coordinate_id IS NOT NULL"#
        ))
        .bind(VehicleClass::from(query.ride_type))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Driver::from).collect())
    }
}

impl Driver {
    pub async fn lock_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        driver_id: Uuid,
    ) -> Result<Option<Driver>, sqlx::Error> {
        let row = sqlx::query_as::<_, DriverRow>(concat!(
            select_drivers!(),
            " WHERE d.id = $1 FOR UPDATE OF d"
        ))
        .bind(driver_id)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(row.map(Driver::from))
    }

    pub async fn set_status_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        driver_id: Uuid,
        status: DriverStatus,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE drivers SET status = $2, updated_at = now() WHERE id = $1")
            .bind(driver_id)
            .bind(DriverState::from(status))
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Point the driver at a freshly inserted coordinate.
    pub async fn update_position_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        driver_id: Uuid,
        coordinate_id: Uuid,
        at: OffsetDateTime,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE drivers
            SET current_coordinate_id = $2, location_updated_at = $3, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(driver_id)
        .bind(coordinate_id)
        .bind(at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Insert a coordinate and make it the driver's current position.
    pub async fn move_to_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        driver_id: Uuid,
        location: &Location,
        at: OffsetDateTime,
    ) -> Result<Uuid, sqlx::Error> {
        let coordinate_id = Coordinate::insert_tx(tx, location).await?;
        Self::update_position_tx(tx, driver_id, coordinate_id, at).await?;
        Ok(coordinate_id)
    }
}
