use crate::entities::drivers::Driver;
use crate::utils::geo::haversine_km;
use rideflow_sdk::objects::{DriverStatus, Location, RideType};
use std::collections::HashSet;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub driver: Driver,
    pub distance_km: f64,
}

/// Picks the closest eligible driver to `pickup`.
///
/// A driver is eligible when it is `AVAILABLE`, drives `ride_type`, has a
/// known position within `max_distance_km`, has not been tried for this ride
/// yet, and holds no outstanding offer. Ties go to the lowest driver id.
pub fn select_candidate(
    drivers: &[Driver],
    ride_type: RideType,
    pickup: &Location,
    max_distance_km: f64,
    excluded: &HashSet<Uuid>,
    has_offer: impl Fn(Uuid) -> bool,
) -> Option<Candidate> {
    drivers
        .iter()
        .filter(|d| d.status == DriverStatus::Available && d.ride_type() == ride_type)
        .filter(|d| !excluded.contains(&d.id) && !has_offer(d.id))
        .filter_map(|d| {
            let distance_km = haversine_km(d.location.as_ref()?, pickup);
            (distance_km <= max_distance_km).then_some((d, distance_km))
        })
        .min_by(|(a, da), (b, db)| da.total_cmp(db).then_with(|| a.id.cmp(&b.id)))
        .map(|(driver, distance_km)| Candidate {
            driver: driver.clone(),
            distance_km,
        })
}
