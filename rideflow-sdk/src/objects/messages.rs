//! Broker message bodies.
//!
//! Every message travels as a JSON body on a topic exchange. The routing key
//! carries the discriminator (`ride.request.<type>`, `driver.response.<ride_id>`,
//! `driver.status.<event>`, `ride.status.<status>`, `location`); the body
//! repeats the identifiers so consumers never parse routing keys for data.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{DriverInfo, Location, RideStatus, RideType};

/// Published by the Ride Service on `ride.request.<ride_type>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideRequestMessage {
    pub ride_id: Uuid,
    pub ride_number: String,
    pub passenger_id: Uuid,
    pub ride_type: RideType,
    pub pickup: Location,
    pub destination: Location,
    pub estimated_fare: Decimal,
    pub estimated_distance_km: f64,
    pub estimated_duration_minutes: u32,
    /// Search radius around the pickup; the matcher's own default applies when absent.
    #[serde(default)]
    pub max_distance_km: Option<f64>,
    /// Matching budget. Zero means "give up immediately".
    pub timeout_seconds: u64,
    pub priority: u8,
    pub correlation_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub requested_at: OffsetDateTime,
}

/// Published on `ride.status.<status>`.
///
/// The Ride Service uses it to tell the Driver-Location Service that a ride was
/// cancelled; the matcher uses it to announce `NO_DRIVER`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideStatusMessage {
    pub ride_id: Uuid,
    pub status: RideStatus,
    /// The driver affected by the change, when one is known.
    #[serde(default)]
    pub driver_id: Option<Uuid>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Published by the matcher on `driver.response.<ride_id>` once a driver accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverResponseMessage {
    pub ride_id: Uuid,
    pub offer_id: Uuid,
    pub driver_id: Uuid,
    pub accepted: bool,
    pub driver_info: DriverInfo,
    #[serde(default)]
    pub driver_location: Option<Location>,
    #[serde(default)]
    pub estimated_arrival_minutes: Option<f64>,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// In-ride events reported by the driver side, routed as `driver.status.<event>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriverRideEvent {
    Arrived,
    InProgress,
    Completed,
    Cancelled,
}

impl DriverRideEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            DriverRideEvent::Arrived => "ARRIVED",
            DriverRideEvent::InProgress => "IN_PROGRESS",
            DriverRideEvent::Completed => "COMPLETED",
            DriverRideEvent::Cancelled => "CANCELLED",
        }
    }

    /// The ride status this event drives the ride into.
    pub fn target_status(self) -> RideStatus {
        match self {
            DriverRideEvent::Arrived => RideStatus::DriverArrived,
            DriverRideEvent::InProgress => RideStatus::InProgress,
            DriverRideEvent::Completed => RideStatus::Completed,
            DriverRideEvent::Cancelled => RideStatus::Cancelled,
        }
    }
}

impl fmt::Display for DriverRideEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Published by the Driver-Location Service on `driver.status.<event>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverStatusMessage {
    pub ride_id: Uuid,
    pub driver_id: Uuid,
    pub status: DriverRideEvent,
    #[serde(default)]
    pub final_fare: Option<Decimal>,
    #[serde(default)]
    pub actual_distance_km: Option<f64>,
    #[serde(default)]
    pub actual_duration_minutes: Option<f64>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub driver_location: Option<Location>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Published on the location exchange under routing key `location`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationMessage {
    pub driver_id: Uuid,
    pub ride_id: Uuid,
    pub location: Location,
    #[serde(default)]
    pub speed_kmh: Option<f64>,
    #[serde(default)]
    pub heading_degrees: Option<f64>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}
