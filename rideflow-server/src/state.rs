//! Application state shared across all request handlers.

use axum::extract::FromRef;
use rideflow_core::events::LocationReportSender;
use rideflow_core::realtime::{DriverHub, PassengerHub};
use rideflow_core::services::{Fleet, RideRequests};
use rideflow_sdk::auth::JwtKeys;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// State of the Ride Service.
///
/// This is cloneable and cheap to pass around (everything is behind Arc).
#[derive(Clone)]
pub struct RideState {
    pub rides: Arc<RideRequests>,
    pub passengers: Arc<PassengerHub>,
    pub keys: Arc<JwtKeys>,
    /// Root token; realtime connections hang off it.
    pub shutdown: CancellationToken,
}

/// State of the Driver-Location Service.
#[derive(Clone)]
pub struct DriverState {
    pub fleet: Arc<Fleet>,
    pub drivers: Arc<DriverHub>,
    /// Fan-in of socket `location_update` frames.
    pub locations: LocationReportSender,
    pub keys: Arc<JwtKeys>,
    pub shutdown: CancellationToken,
}

impl FromRef<RideState> for Arc<JwtKeys> {
    fn from_ref(state: &RideState) -> Self {
        state.keys.clone()
    }
}

impl FromRef<DriverState> for Arc<JwtKeys> {
    fn from_ref(state: &DriverState) -> Self {
        state.keys.clone()
    }
}
