//! Great-circle helpers.

use rideflow_sdk::objects::Location;

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Slowest speed assumed when estimating arrival times.
pub const ETA_SPEED_FLOOR_KMH: f64 = 5.0;

/// Haversine distance between two points in kilometres.
pub fn haversine_km(from: &Location, to: &Location) -> f64 {
    let lat1 = from.latitude.to_radians();
    let lat2 = to.latitude.to_radians();
    let d_lat = (to.latitude - from.latitude).to_radians();
    let d_lng = (to.longitude - from.longitude).to_radians();

    let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}

/// Travel time in minutes at `speed_kmh`, never assuming less than `floor_kmh`.
pub fn eta_minutes(distance_km: f64, speed_kmh: Option<f64>, floor_kmh: f64) -> f64 {
    let speed = speed_kmh
        .filter(|s| s.is_finite())
        .unwrap_or(0.0)
        .max(floor_kmh);
    distance_km.max(0.0) / speed * 60.0
}
