//! DTOs shared across the HTTP, realtime and broker surfaces.

pub mod drivers;
pub mod messages;
pub mod rides;
pub mod ws;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use drivers::{
    CompleteRideRequest, CompleteRideResponse, DriverCancelRequest, DriverCancelResponse,
    GoOfflineResponse, GoOnlineRequest, GoOnlineResponse, LocationUpdateRequest,
    LocationUpdateResponse, SessionSummary, StartRideRequest, StartRideResponse,
};
pub use messages::{
    DriverResponseMessage, DriverRideEvent, DriverStatusMessage, LocationMessage,
    RideRequestMessage, RideStatusMessage,
};
pub use rides::{CancelRideRequest, CancelRideResponse, CreateRideRequest, CreateRideResponse};

/// Vehicle class requested by a passenger and offered by a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RideType {
    Economy,
    Premium,
    Xl,
}

impl RideType {
    pub const ALL: [RideType; 3] = [RideType::Economy, RideType::Premium, RideType::Xl];

    pub fn as_str(self) -> &'static str {
        match self {
            RideType::Economy => "ECONOMY",
            RideType::Premium => "PREMIUM",
            RideType::Xl => "XL",
        }
    }
}

impl fmt::Display for RideType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string does not name a known enum variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl FromStr for RideType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RideType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownVariant {
                kind: "ride type",
                value: s.to_owned(),
            })
    }
}

/// Lifecycle status of a ride.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RideStatus {
    Requested,
    Matched,
    DriverArrived,
    InProgress,
    Completed,
    Cancelled,
    NoDriver,
}

impl RideStatus {
    pub const ALL: [RideStatus; 7] = [
        RideStatus::Requested,
        RideStatus::Matched,
        RideStatus::DriverArrived,
        RideStatus::InProgress,
        RideStatus::Completed,
        RideStatus::Cancelled,
        RideStatus::NoDriver,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RideStatus::Requested => "REQUESTED",
            RideStatus::Matched => "MATCHED",
            RideStatus::DriverArrived => "DRIVER_ARRIVED",
            RideStatus::InProgress => "IN_PROGRESS",
            RideStatus::Completed => "COMPLETED",
            RideStatus::Cancelled => "CANCELLED",
            RideStatus::NoDriver => "NO_DRIVER",
        }
    }

    /// `true` once the ride can no longer change.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RideStatus::Completed | RideStatus::Cancelled | RideStatus::NoDriver
        )
    }

    /// `true` for the states in which a driver is attached to the ride.
    pub fn has_driver(self) -> bool {
        matches!(
            self,
            RideStatus::Matched
                | RideStatus::DriverArrived
                | RideStatus::InProgress
                | RideStatus::Completed
        )
    }
}

impl fmt::Display for RideStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RideStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RideStatus::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownVariant {
                kind: "ride status",
                value: s.to_owned(),
            })
    }
}

/// Availability of a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriverStatus {
    Offline,
    Available,
    Busy,
}

/// Role claim carried by bearer tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Passenger,
    Driver,
    Admin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Passenger => "PASSENGER",
            Role::Driver => "DRIVER",
            Role::Admin => "ADMIN",
        };
        f.write_str(s)
    }
}

/// A point on the map with an optional human-readable address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            address: None,
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Latitude within `[-90, 90]` and longitude within `[-180, 180]`, bounds inclusive.
    pub fn is_valid(&self) -> bool {
        is_valid_coordinate(self.latitude, self.longitude)
    }
}

/// Compact coordinate used by the passenger tracking frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl From<&Location> for LatLng {
    fn from(value: &Location) -> Self {
        Self {
            lat: value.latitude,
            lng: value.longitude,
        }
    }
}

pub fn is_valid_coordinate(latitude: f64, longitude: f64) -> bool {
    latitude.is_finite()
        && longitude.is_finite()
        && (-90.0..=90.0).contains(&latitude)
        && (-180.0..=180.0).contains(&longitude)
}

/// Public description of the driver attached to a ride.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverInfo {
    pub driver_id: uuid::Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<rust_decimal::Decimal>,
    pub vehicle: VehicleInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleInfo {
    pub class: RideType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub make: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plate: Option<String>,
}
