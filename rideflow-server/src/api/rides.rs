//! Ride Service HTTP handlers.
//!
//! All endpoints require a `PASSENGER` bearer token.
//!
//! # Endpoints
//!
//! - `POST /rides`                   – request a ride
//! - `POST /rides/{ride_id}/cancel`  – cancel a requested or matched ride

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
};
use rideflow_core::services::RideRequestError;
use rideflow_sdk::objects::{CancelRideRequest, CreateRideRequest};
use uuid::Uuid;

use crate::api::extractors::Passenger;
use crate::state::RideState;

/// Build the Ride Service API router.
pub fn router() -> Router<RideState> {
    Router::new()
        .route("/rides", post(create_ride))
        .route("/rides/{ride_id}/cancel", post(cancel_ride))
}

/// `POST /rides` — persist a `REQUESTED` ride and hand it to matching.
async fn create_ride(
    State(state): State<RideState>,
    passenger: Passenger,
    payload: Result<Json<CreateRideRequest>, JsonRejection>,
) -> Result<impl IntoResponse, RideApiError> {
    let Json(request) = payload.map_err(RideApiError::Body)?;
    let response = state.rides.create(passenger.passenger_id, request).await?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// `POST /rides/{ride_id}/cancel` — the body and its `reason` are optional.
async fn cancel_ride(
    State(state): State<RideState>,
    passenger: Passenger,
    Path(ride_id): Path<Uuid>,
    payload: Result<Option<Json<CancelRideRequest>>, JsonRejection>,
) -> Result<impl IntoResponse, RideApiError> {
    let request = payload
        .map_err(RideApiError::Body)?
        .map(|Json(body)| body)
        .unwrap_or_default();
    let response = state
        .rides
        .cancel(passenger.passenger_id, ride_id, request.reason)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}

// ---------------------------------------------------------------------------
// Error handling
// ---------------------------------------------------------------------------

/// Errors that can occur in Ride Service handlers.
#[derive(Debug)]
enum RideApiError {
    /// The body is not valid JSON for the endpoint.
    Body(JsonRejection),
    Request(RideRequestError),
}

impl From<RideRequestError> for RideApiError {
    fn from(err: RideRequestError) -> Self {
        Self::Request(err)
    }
}

impl IntoResponse for RideApiError {
    fn into_response(self) -> axum::response::Response {
        let err = match self {
            RideApiError::Body(rejection) => {
                return (StatusCode::BAD_REQUEST, rejection.body_text()).into_response();
            }
            RideApiError::Request(err) => err,
        };
        let status = match &err {
            RideRequestError::Validation(_) => StatusCode::BAD_REQUEST,
            RideRequestError::RideNotFound => StatusCode::NOT_FOUND,
            RideRequestError::ActiveRideExists
            | RideRequestError::Transition(_)
            | RideRequestError::RideNotCompleted { .. } => StatusCode::CONFLICT,
            RideRequestError::BrokerUnavailable(e) => {
                tracing::warn!(error = %e, "Ride API broker unavailable");
                StatusCode::SERVICE_UNAVAILABLE
            }
            RideRequestError::Store(e) => {
                tracing::error!(error = %e, "Ride API storage error");
                return (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response();
            }
        };
        (status, err.to_string()).into_response()
    }
}
