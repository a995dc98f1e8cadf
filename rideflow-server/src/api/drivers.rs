//! Driver-Location Service HTTP handlers.
//!
//! Every endpoint requires a `DRIVER` bearer token issued to the driver named
//! in the path.
//!
//! # Endpoints
//!
//! - `POST /drivers/{driver_id}/online`    – open a session
//! - `POST /drivers/{driver_id}/offline`   – close the session
//! - `POST /drivers/{driver_id}/location`  – report a position
//! - `POST /drivers/{driver_id}/start`     – passenger picked up
//! - `POST /drivers/{driver_id}/complete`  – ride finished
//! - `POST /drivers/{driver_id}/cancel`    – driver abandons the ride

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
};
use rideflow_core::services::FleetError;
use rideflow_core::stores::LocationFix;
use rideflow_sdk::objects::{
    CompleteRideRequest, DriverCancelRequest, GoOnlineRequest, Location, LocationUpdateRequest,
    StartRideRequest,
};
use time::OffsetDateTime;

use crate::api::extractors::AuthorizedDriver;
use crate::state::DriverState;

/// Build the Driver-Location Service API router.
pub fn router() -> Router<DriverState> {
    Router::new()
        .route("/drivers/{driver_id}/online", post(go_online))
        .route("/drivers/{driver_id}/offline", post(go_offline))
        .route("/drivers/{driver_id}/location", post(update_location))
        .route("/drivers/{driver_id}/start", post(start_ride))
        .route("/drivers/{driver_id}/complete", post(complete_ride))
        .route("/drivers/{driver_id}/cancel", post(cancel_ride))
}

async fn go_online(
    State(state): State<DriverState>,
    driver: AuthorizedDriver,
    payload: Result<Json<GoOnlineRequest>, JsonRejection>,
) -> Result<impl IntoResponse, DriverApiError> {
    let Json(request) = payload.map_err(DriverApiError::Body)?;
    Ok(Json(state.fleet.go_online(driver.driver_id, request).await?))
}

async fn go_offline(
    State(state): State<DriverState>,
    driver: AuthorizedDriver,
) -> Result<impl IntoResponse, DriverApiError> {
    Ok(Json(state.fleet.go_offline(driver.driver_id).await?))
}

/// `POST /drivers/{driver_id}/location` — recorded synchronously so the
/// response can carry the stored coordinate id.
async fn update_location(
    State(state): State<DriverState>,
    driver: AuthorizedDriver,
    payload: Result<Json<LocationUpdateRequest>, JsonRejection>,
) -> Result<impl IntoResponse, DriverApiError> {
    let Json(request) = payload.map_err(DriverApiError::Body)?;
    let fix = LocationFix {
        location: Location::new(request.latitude, request.longitude),
        accuracy_meters: request.accuracy_meters,
        speed_kmh: request.speed_kmh,
        heading_degrees: request.heading_degrees,
        at: OffsetDateTime::now_utc(),
    };
    Ok(Json(state.fleet.report_location(driver.driver_id, fix).await?))
}

async fn start_ride(
    State(state): State<DriverState>,
    driver: AuthorizedDriver,
    payload: Result<Json<StartRideRequest>, JsonRejection>,
) -> Result<impl IntoResponse, DriverApiError> {
    let Json(request) = payload.map_err(DriverApiError::Body)?;
    Ok(Json(state.fleet.start_ride(driver.driver_id, request).await?))
}

async fn complete_ride(
    State(state): State<DriverState>,
    driver: AuthorizedDriver,
    payload: Result<Json<CompleteRideRequest>, JsonRejection>,
) -> Result<impl IntoResponse, DriverApiError> {
    let Json(request) = payload.map_err(DriverApiError::Body)?;
    Ok(Json(state.fleet.complete_ride(driver.driver_id, request).await?))
}

async fn cancel_ride(
    State(state): State<DriverState>,
    driver: AuthorizedDriver,
    payload: Result<Json<DriverCancelRequest>, JsonRejection>,
) -> Result<impl IntoResponse, DriverApiError> {
    let Json(request) = payload.map_err(DriverApiError::Body)?;
    Ok(Json(state.fleet.cancel_ride(driver.driver_id, request).await?))
}

// ---------------------------------------------------------------------------
// Error handling
// ---------------------------------------------------------------------------

/// Errors that can occur in Driver-Location Service handlers.
#[derive(Debug)]
enum DriverApiError {
    Body(JsonRejection),
    Fleet(FleetError),
}

impl From<FleetError> for DriverApiError {
    fn from(err: FleetError) -> Self {
        Self::Fleet(err)
    }
}

impl IntoResponse for DriverApiError {
    fn into_response(self) -> axum::response::Response {
        let err = match self {
            DriverApiError::Body(rejection) => {
                return (StatusCode::BAD_REQUEST, rejection.body_text()).into_response();
            }
            DriverApiError::Fleet(err) => err,
        };
        let status = match &err {
            FleetError::Validation(_) => StatusCode::BAD_REQUEST,
            FleetError::DriverNotFound | FleetError::RideNotFound => StatusCode::NOT_FOUND,
            FleetError::AlreadyOnline
            | FleetError::NotOnline
            | FleetError::DriverBusy
            | FleetError::InvalidState { .. } => StatusCode::CONFLICT,
            FleetError::BrokerUnavailable(e) => {
                tracing::warn!(error = %e, "Driver API broker unavailable");
                StatusCode::SERVICE_UNAVAILABLE
            }
            FleetError::Store(e) => {
                tracing::error!(error = %e, "Driver API storage error");
                return (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response();
            }
        };
        (status, err.to_string()).into_response()
    }
}
