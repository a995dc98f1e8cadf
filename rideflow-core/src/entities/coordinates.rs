use rideflow_sdk::objects::Location;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Coordinate {
    pub id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    pub address: Option<String>,
    pub created_at: time::OffsetDateTime,
}

impl From<Coordinate> for Location {
    fn from(value: Coordinate) -> Self {
        Location {
            latitude: value.latitude,
            longitude: value.longitude,
            address: value.address,
        }
    }
}

impl Coordinate {
    /// Insert a coordinate row within a transaction and return its id.
    pub async fn insert_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        location: &Location,
    ) -> Result<Uuid, sqlx::Error> {
        let id = Uuid::now_v7();
        sqlx::query(
            r#"
            INSERT INTO coordinates (id, latitude, longitude, address)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(id)
        .bind(location.latitude)
        .bind(location.longitude)
        .bind(location.address.as_deref())
        .execute(&mut **tx)
        .await?;
        Ok(id)
    }
}
