use rust_decimal::Decimal;
use time::OffsetDateTime;
use uuid::Uuid;

/// An online period of a driver.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct DriverSession {
    pub id: Uuid,
    pub driver_id: Uuid,
    pub started_at: OffsetDateTime,
    pub ended_at: Option<OffsetDateTime>,
    pub rides_completed: i32,
    pub earnings: Decimal,
}

impl DriverSession {
    pub fn duration_hours(&self) -> f64 {
        let end = self.ended_at.unwrap_or_else(OffsetDateTime::now_utc);
        let hours = (end - self.started_at).as_seconds_f64() / 3600.0;
        (hours.max(0.0) * 100.0).round() / 100.0
    }

    /// Open a session. Fails with a unique violation when one is already open.
    pub async fn open_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        driver_id: Uuid,
        at: OffsetDateTime,
    ) -> Result<DriverSession, sqlx::Error> {
        sqlx::query_as::<_, DriverSession>(
            r#"
            INSERT INTO driver_sessions (id, driver_id, started_at)
            VALUES ($1, $2, $3)
            RETURNING id, driver_id, started_at, ended_at, rides_completed, earnings
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(driver_id)
        .bind(at)
        .fetch_one(&mut **tx)
        .await
    }

    pub async fn open_for_driver_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        driver_id: Uuid,
    ) -> Result<Option<DriverSession>, sqlx::Error> {
        sqlx::query_as::<_, DriverSession>(
            r#"
            SELECT id, driver_id, started_at, ended_at, rides_completed, earnings
            FROM driver_sessions
            WHERE driver_id = $1 AND ended_at IS NULL
            FOR UPDATE
            "#,
        )
        .bind(driver_id)
        .fetch_optional(&mut **tx)
        .await
    }

    pub async fn close_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        session_id: Uuid,
        at: OffsetDateTime,
    ) -> Result<DriverSession, sqlx::Error> {
        sqlx::query_as::<_, DriverSession>(
            r#"
            UPDATE driver_sessions
            SET ended_at = GREATEST($2, started_at)
            WHERE id = $1
            RETURNING id, driver_id, started_at, ended_at, rides_completed, earnings
            "#,
        )
        .bind(session_id)
        .bind(at)
        .fetch_one(&mut **tx)
        .await
    }

    /// Credit a completed ride to the driver's open session, if any.
    pub async fn add_completed_ride_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        driver_id: Uuid,
        earnings: Decimal,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE driver_sessions
            SET rides_completed = rides_completed + 1, earnings = earnings + $2
            WHERE driver_id = $1 AND ended_at IS NULL
            "#,
        )
        .bind(driver_id)
        .bind(earnings)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}
