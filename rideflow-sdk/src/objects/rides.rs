//! Ride Service HTTP bodies.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{Location, RideStatus, RideType};

/// Body of `POST /rides`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateRideRequest {
    pub pickup_latitude: f64,
    pub pickup_longitude: f64,
    #[serde(default)]
    pub pickup_address: Option<String>,
    pub destination_latitude: f64,
    pub destination_longitude: f64,
    #[serde(default)]
    pub destination_address: Option<String>,
    pub ride_type: RideType,
}

impl CreateRideRequest {
    pub fn pickup(&self) -> Location {
        Location {
            latitude: self.pickup_latitude,
            longitude: self.pickup_longitude,
            address: self.pickup_address.clone(),
        }
    }

    pub fn destination(&self) -> Location {
        Location {
            latitude: self.destination_latitude,
            longitude: self.destination_longitude,
            address: self.destination_address.clone(),
        }
    }
}

/// `202 Accepted` body of `POST /rides`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateRideResponse {
    pub ride_id: Uuid,
    pub ride_number: String,
    pub status: RideStatus,
    pub estimated_fare: rust_decimal::Decimal,
    pub estimated_duration_minutes: u32,
    pub estimated_distance_km: f64,
}

/// Body of `POST /rides/{ride_id}/cancel`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelRideRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelRideResponse {
    pub ride_id: Uuid,
    pub status: RideStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub cancelled_at: OffsetDateTime,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_ride_request_shape() {
        let body = r#"{
            "pickup_latitude": 43.24,
            "pickup_longitude": 76.89,
            "pickup_address": "Abay Ave 10",
            "destination_latitude": 43.26,
            "destination_longitude": 76.91,
            "ride_type": "ECONOMY"
        }"#;
        let req: CreateRideRequest = serde_json::from_str(body).unwrap();
        assert_eq!(req.ride_type, RideType::Economy);
        assert_eq!(req.pickup().address.as_deref(), Some("Abay Ave 10"));
        assert_eq!(req.destination().address, None);
    }

    #[test]
    fn test_unknown_ride_type_is_rejected() {
        let body = r#"{
            "pickup_latitude": 0, "pickup_longitude": 0,
            "destination_latitude": 1, "destination_longitude": 1,
            "ride_type": "TUKTUK"
        }"#;
        assert!(serde_json::from_str::<CreateRideRequest>(body).is_err());
    }
}
