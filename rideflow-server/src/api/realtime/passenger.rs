//! Passenger plane of the Ride Service.

use async_trait::async_trait;
use axum::{
    Router,
    extract::{Path, State, ws::WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use rideflow_core::realtime::{OutboundQueue, PassengerHub};
use rideflow_core::services::RideRequestError;
use rideflow_sdk::auth::JwtKeys;
use rideflow_sdk::objects::Role;
use rideflow_sdk::objects::ws::{
    FrameError, PassengerClientMessage, PassengerServerMessage, WsErrorCode, frame_type,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::{Plane, invalid_message, serve};
use crate::state::RideState;

pub fn router() -> Router<RideState> {
    Router::new().route("/ws/passengers/{passenger_id}", get(passenger_socket))
}

/// `GET /ws/passengers/{passenger_id}` — ride status and driver tracking.
async fn passenger_socket(
    State(state): State<RideState>,
    Path(passenger_id): Path<Uuid>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve(socket, state, passenger_id))
}

#[async_trait]
impl Plane for RideState {
    type Event = PassengerServerMessage;

    const ROLE: Role = Role::Passenger;

    fn keys(&self) -> &JwtKeys {
        &self.keys
    }

    fn hub(&self) -> &PassengerHub {
        &self.passengers
    }

    fn shutdown(&self) -> &CancellationToken {
        &self.shutdown
    }

    fn auth_success(user_id: Uuid) -> PassengerServerMessage {
        PassengerServerMessage::AuthSuccess {
            user_id,
            message: "Authenticated".into(),
        }
    }

    fn error(code: &str, message: String) -> PassengerServerMessage {
        PassengerServerMessage::Error {
            error_code: code.to_owned(),
            error_message: message,
        }
    }

    /// Only `ride_complete` is acted upon; other frame types are ignored.
    async fn on_text(
        &self,
        passenger_id: Uuid,
        text: &str,
        queue: &OutboundQueue<PassengerServerMessage>,
    ) {
        match frame_type(text).as_deref() {
            Some("ride_complete") => {}
            Some(other) => {
                debug!(passenger_id = %passenger_id, frame_type = other, "Ignoring passenger frame");
                return;
            }
            None => {
                queue.send(invalid_message::<Self>(FrameError::Malformed(
                    "expected a JSON object with a \"type\" field".into(),
                )));
                return;
            }
        }

        let (ride_id, rating, tip) = match serde_json::from_str::<PassengerClientMessage>(text) {
            Ok(PassengerClientMessage::RideComplete {
                ride_id,
                rating,
                tip,
            }) => (ride_id, rating, tip),
            Ok(PassengerClientMessage::Auth { .. }) => return,
            Err(e) => {
                queue.send(invalid_message::<Self>(FrameError::Malformed(e.to_string())));
                return;
            }
        };

        match self.rides.feedback(passenger_id, ride_id, rating, tip).await {
            Ok(_) => {
                info!(passenger_id = %passenger_id, ride_id = %ride_id, "Ride feedback stored");
            }
            Err(e) => {
                queue.send(feedback_error(e));
            }
        }
    }
}

fn feedback_error(err: RideRequestError) -> PassengerServerMessage {
    let code = match &err {
        RideRequestError::Validation(_) => WsErrorCode::INVALID_MESSAGE,
        RideRequestError::RideNotFound => WsErrorCode::RIDE_NOT_FOUND,
        RideRequestError::RideNotCompleted { .. }
        | RideRequestError::Transition(_)
        | RideRequestError::ActiveRideExists => WsErrorCode::INVALID_STATE,
        RideRequestError::BrokerUnavailable(_) | RideRequestError::Store(_) => {
            error!(error = %err, "Failed to store ride feedback");
            return RideState::error(WsErrorCode::INTERNAL_ERROR, "internal error".into());
        }
    };
    RideState::error(code, err.to_string())
}
