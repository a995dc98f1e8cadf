//! Realtime frames exchanged over `/ws/drivers/{id}` and `/ws/passengers/{id}`.
//!
//! # Protocol
//!
//! 1. After the upgrade the client has five seconds to send an [`AuthFrame`].
//! 2. The server answers `auth_success` or an `error` frame with code
//!    [`WsErrorCode::AUTH_FAILED`] followed by a close.
//! 3. Afterwards frames flow in both directions. Every frame is a JSON text
//!    message with a `"type"` discriminator:
//!
//! ```json
//! {"type":"ride_offer","offer_id":"...","ride_id":"...", ... }
//! {"type":"ride_response","offer_id":"...","ride_id":"...","accepted":true}
//! {"type":"error","error_code":"invalid_message","error_message":"..."}
//! ```

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{DriverInfo, LatLng, Location, RideStatus, is_valid_coordinate};

/// First frame a client must send on either plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthFrame {
    Auth { token: String },
}

impl AuthFrame {
    pub fn token(&self) -> &str {
        match self {
            AuthFrame::Auth { token } => token,
        }
    }
}

// ----------------------------------------------------------------------------
// Driver plane
// ----------------------------------------------------------------------------

/// Frames sent by a driver client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DriverClientMessage {
    Auth { token: String },
    RideResponse(RideResponse),
    LocationUpdate(DriverLocationFrame),
    Ping,
    Pong,
}

/// A driver's answer to a [`RideOffer`].
///
/// Identifiers are kept as strings so an empty or malformed id surfaces as an
/// `invalid_message` error instead of an undecodable frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideResponse {
    #[serde(default)]
    pub offer_id: String,
    #[serde(default)]
    pub ride_id: String,
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_location: Option<Location>,
}

/// A [`RideResponse`] whose identifiers have been checked.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidRideResponse {
    pub offer_id: Uuid,
    pub ride_id: Uuid,
    pub accepted: bool,
    pub current_location: Option<Location>,
}

impl RideResponse {
    pub fn validate(self) -> Result<ValidRideResponse, FrameError> {
        let offer_id = parse_id("offer_id", &self.offer_id)?;
        let ride_id = parse_id("ride_id", &self.ride_id)?;
        if let Some(loc) = &self.current_location
            && !loc.is_valid()
        {
            return Err(FrameError::CoordinatesOutOfRange);
        }
        Ok(ValidRideResponse {
            offer_id,
            ride_id,
            accepted: self.accepted,
            current_location: self.current_location,
        })
    }
}

/// Periodic position report from a driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverLocationFrame {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy_meters: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_kmh: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading_degrees: Option<f64>,
}

impl DriverLocationFrame {
    pub fn validate(&self) -> Result<(), FrameError> {
        if is_valid_coordinate(self.latitude, self.longitude) {
            Ok(())
        } else {
            Err(FrameError::CoordinatesOutOfRange)
        }
    }

    pub fn location(&self) -> Location {
        Location::new(self.latitude, self.longitude)
    }
}

/// Frames sent to a driver client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DriverServerMessage {
    AuthSuccess { user_id: Uuid, message: String },
    RideOffer(RideOffer),
    RideDetails(RideDetails),
    Ping,
    Pong,
    Error {
        error_code: String,
        error_message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideOffer {
    pub offer_id: Uuid,
    pub ride_id: Uuid,
    pub ride_number: String,
    pub pickup_location: Location,
    pub destination_location: Location,
    pub estimated_fare: Decimal,
    pub driver_earnings: Decimal,
    pub distance_to_pickup_km: f64,
    pub estimated_ride_duration_minutes: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

/// Ride information pushed to the driver after acceptance, and again if the
/// ride is cancelled underneath them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideDetails {
    pub ride_id: Uuid,
    pub ride_number: String,
    pub status: RideStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passenger_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pickup_location: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_location: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_fare: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

// ----------------------------------------------------------------------------
// Passenger plane
// ----------------------------------------------------------------------------

/// Frames sent by a passenger client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PassengerClientMessage {
    Auth {
        token: String,
    },
    /// Feedback left once the ride is over.
    RideComplete {
        ride_id: Uuid,
        rating: u8,
        #[serde(default)]
        tip: Decimal,
    },
}

/// Frames sent to a passenger client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PassengerServerMessage {
    AuthSuccess { user_id: Uuid, message: String },
    RideStatusUpdate(RideStatusUpdate),
    DriverLocationUpdate(DriverLocationUpdate),
    Error {
        error_code: String,
        error_message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideStatusUpdate {
    pub ride_id: Uuid,
    pub ride_number: String,
    pub status: RideStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_info: Option<DriverInfo>,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_fare: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverLocationUpdate {
    pub ride_id: Uuid,
    pub driver_id: Uuid,
    pub driver_location: LatLng,
    #[serde(with = "time::serde::rfc3339")]
    pub estimated_arrival: OffsetDateTime,
    pub distance_to_pickup_km: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_kmh: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading_degrees: Option<f64>,
}

// ----------------------------------------------------------------------------
// Errors
// ----------------------------------------------------------------------------

/// Well-known `error_code` values of the `error` frame.
pub struct WsErrorCode;

impl WsErrorCode {
    pub const AUTH_FAILED: &'static str = "auth_failed";
    pub const INVALID_MESSAGE: &'static str = "invalid_message";
    pub const OFFER_NOT_FOUND: &'static str = "offer_not_found";
    pub const RIDE_NOT_FOUND: &'static str = "ride_not_found";
    pub const INVALID_STATE: &'static str = "invalid_state";
    pub const INTERNAL_ERROR: &'static str = "internal_error";
}

/// Reasons an inbound frame is rejected as `invalid_message`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("`{0}` is not a valid identifier")]
    InvalidId(&'static str),
    #[error("latitude must be within [-90, 90] and longitude within [-180, 180]")]
    CoordinatesOutOfRange,
}

fn parse_id(field: &'static str, value: &str) -> Result<Uuid, FrameError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(FrameError::MissingField(field));
    }
    Uuid::parse_str(value).map_err(|_| FrameError::InvalidId(field))
}

/// Reads only the `"type"` discriminator of a text frame.
pub fn frame_type(text: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct Tagged {
        #[serde(rename = "type")]
        kind: String,
    }
    serde_json::from_str::<Tagged>(text).ok().map(|t| t.kind)
}
