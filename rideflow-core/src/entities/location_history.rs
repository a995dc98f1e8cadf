use time::OffsetDateTime;
use uuid::Uuid;

/// One reported driver position.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationPoint {
    pub driver_id: Uuid,
    pub coordinate_id: Uuid,
    pub ride_id: Option<Uuid>,
    pub accuracy_meters: Option<f64>,
    pub speed_kmh: Option<f64>,
    pub heading_degrees: Option<f64>,
    pub recorded_at: OffsetDateTime,
}

impl LocationPoint {
    pub async fn insert_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        point: &LocationPoint,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO location_history (
                driver_id, coordinate_id, ride_id,
                accuracy_meters, speed_kmh, heading_degrees, recorded_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(point.driver_id)
        .bind(point.coordinate_id)
        .bind(point.ride_id)
        .bind(point.accuracy_meters)
        .bind(point.speed_kmh)
        .bind(point.heading_degrees)
        .bind(point.recorded_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}
