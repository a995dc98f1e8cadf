use crate::stores::LocationFix;
use rideflow_sdk::objects::ws::DriverLocationFrame;
use time::OffsetDateTime;
use uuid::Uuid;

/// A validated position report from an authenticated driver.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationReport {
    pub driver_id: Uuid,
    pub fix: LocationFix,
}

impl LocationReport {
    pub fn from_frame(driver_id: Uuid, frame: &DriverLocationFrame, received_at: OffsetDateTime) -> Self {
        Self {
            driver_id,
            fix: LocationFix {
                location: frame.location(),
                accuracy_meters: frame.accuracy_meters,
                speed_kmh: frame.speed_kmh,
                heading_degrees: frame.heading_degrees,
                at: received_at,
            },
        }
    }
}
