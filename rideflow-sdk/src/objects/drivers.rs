//! Driver-Location Service HTTP bodies.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{DriverStatus, Location, RideStatus};

/// Body of `POST /drivers/{driver_id}/online`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoOnlineRequest {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoOnlineResponse {
    pub status: DriverStatus,
    pub session_id: Uuid,
    pub message: String,
}

/// Totals of a closed driver session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub duration_hours: f64,
    pub rides_completed: u32,
    pub earnings: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoOfflineResponse {
    pub status: DriverStatus,
    pub session_id: Uuid,
    pub session_summary: SessionSummary,
    pub message: String,
}

/// Body of `POST /drivers/{driver_id}/location`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationUpdateRequest {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub accuracy_meters: Option<f64>,
    #[serde(default)]
    pub speed_kmh: Option<f64>,
    #[serde(default)]
    pub heading_degrees: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationUpdateResponse {
    pub coordinate_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Body of `POST /drivers/{driver_id}/start`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartRideRequest {
    pub ride_id: Uuid,
    pub driver_location: Location,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartRideResponse {
    pub ride_id: Uuid,
    pub status: RideStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    pub message: String,
}

/// Body of `POST /drivers/{driver_id}/complete`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompleteRideRequest {
    pub ride_id: Uuid,
    pub final_location: Location,
    pub actual_distance_km: f64,
    pub actual_duration_minutes: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteRideResponse {
    pub ride_id: Uuid,
    pub status: RideStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub completed_at: OffsetDateTime,
    pub driver_earnings: Decimal,
    pub message: String,
}

/// Body of `POST /drivers/{driver_id}/cancel`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverCancelRequest {
    pub ride_id: Uuid,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverCancelResponse {
    pub ride_id: Uuid,
    pub status: RideStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub cancelled_at: OffsetDateTime,
    pub message: String,
}
