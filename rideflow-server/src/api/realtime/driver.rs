//! Driver plane of the Driver-Location Service.

use async_trait::async_trait;
use axum::{
    Router,
    extract::{Path, State, ws::WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use rideflow_core::events::LocationReport;
use rideflow_core::matching::Resolution;
use rideflow_core::realtime::{DriverHub, OutboundQueue};
use rideflow_sdk::auth::JwtKeys;
use rideflow_sdk::objects::Role;
use rideflow_sdk::objects::ws::{DriverClientMessage, DriverServerMessage, FrameError, WsErrorCode};
use time::OffsetDateTime;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{Plane, invalid_message, serve};
use crate::state::DriverState;

pub fn router() -> Router<DriverState> {
    Router::new().route("/ws/drivers/{driver_id}", get(driver_socket))
}

/// `GET /ws/drivers/{driver_id}` — offers, ride details and position reports.
async fn driver_socket(
    State(state): State<DriverState>,
    Path(driver_id): Path<Uuid>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve(socket, state, driver_id))
}

#[async_trait]
impl Plane for DriverState {
    type Event = DriverServerMessage;

    const ROLE: Role = Role::Driver;

    fn keys(&self) -> &JwtKeys {
        &self.keys
    }

    fn hub(&self) -> &DriverHub {
        &self.drivers
    }

    fn shutdown(&self) -> &CancellationToken {
        &self.shutdown
    }

    fn auth_success(user_id: Uuid) -> DriverServerMessage {
        DriverServerMessage::AuthSuccess {
            user_id,
            message: "Authenticated".into(),
        }
    }

    fn error(code: &str, message: String) -> DriverServerMessage {
        DriverServerMessage::Error {
            error_code: code.to_owned(),
            error_message: message,
        }
    }

    async fn on_text(&self, driver_id: Uuid, text: &str, queue: &OutboundQueue<DriverServerMessage>) {
        if let Some(reply) = self.handle_frame(driver_id, text) {
            queue.send(reply);
        }
    }
}

impl DriverState {
    fn handle_frame(&self, driver_id: Uuid, text: &str) -> Option<DriverServerMessage> {
        let message = match serde_json::from_str::<DriverClientMessage>(text) {
            Ok(message) => message,
            Err(e) => return Some(invalid_message::<Self>(FrameError::Malformed(e.to_string()))),
        };

        match message {
            DriverClientMessage::RideResponse(response) => {
                let response = match response.validate() {
                    Ok(response) => response,
                    Err(e) => return Some(invalid_message::<Self>(e)),
                };
                match self.fleet.respond_to_offer(driver_id, response) {
                    Resolution::Delivered => None,
                    Resolution::Mismatched | Resolution::NotFound => Some(Self::error(
                        WsErrorCode::OFFER_NOT_FOUND,
                        "no outstanding offer matches this response".into(),
                    )),
                }
            }
            DriverClientMessage::LocationUpdate(frame) => {
                if let Err(e) = frame.validate() {
                    return Some(invalid_message::<Self>(e));
                }
                let report = LocationReport::from_frame(driver_id, &frame, OffsetDateTime::now_utc());
                match self.locations.try_send(report) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        debug!(driver_id = %driver_id, "Location fan-in full, dropping report");
                    }
                    Err(TrySendError::Closed(_)) => {
                        warn!(driver_id = %driver_id, "Location fan-in closed");
                    }
                }
                None
            }
            DriverClientMessage::Ping => Some(DriverServerMessage::Pong),
            DriverClientMessage::Pong => None,
            DriverClientMessage::Auth { .. } => Some(invalid_message::<Self>(FrameError::Malformed(
                "already authenticated".into(),
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rideflow_core::broker::{
        BrokerError, ConsumeSpec, DeliveryStream, MessageBus, OutgoingMessage,
    };
    use rideflow_core::config::{DispatchConfig, PricingTable};
    use rideflow_core::events::{LocationReportReceiver, location_report_channel};
    use rideflow_core::framework::DatabaseProcessor;
    use rideflow_core::matching::OfferTable;
    use rideflow_core::services::Fleet;
    use rideflow_core::stores::PgDriverStore;
    use sqlx::postgres::PgPoolOptions;
    use std::sync::Arc;

    /// Frames handled here never reach the broker.
    struct OfflineBus;

    #[async_trait]
    impl MessageBus for OfflineBus {
        async fn publish(
            &self,
            _exchange: &str,
            _routing_key: &str,
            _message: OutgoingMessage,
        ) -> Result<(), BrokerError> {
            Err(BrokerError::Unavailable)
        }

        async fn consume(
            &self,
            _spec: ConsumeSpec,
            _cancel: CancellationToken,
        ) -> Result<DeliveryStream, BrokerError> {
            Err(BrokerError::Unavailable)
        }

        async fn close(&self) {}
    }

    fn driver_state() -> (DriverState, LocationReportReceiver) {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://rideflow@localhost/rideflow")
            .unwrap();
        let fleet = Fleet::new(
            Arc::new(PgDriverStore::new(DatabaseProcessor::new(pool))),
            Arc::new(OfflineBus),
            Arc::new(OfferTable::new()),
            PricingTable::default(),
            DispatchConfig::default(),
        );
        let (locations, rx) = location_report_channel();
        let state = DriverState {
            fleet: Arc::new(fleet),
            drivers: Arc::new(DriverHub::default()),
            locations,
            keys: Arc::new(JwtKeys::new(b"secret")),
            shutdown: CancellationToken::new(),
        };
        (state, rx)
    }

    fn error_code(reply: Option<DriverServerMessage>) -> String {
        match reply {
            Some(DriverServerMessage::Error { error_code, .. }) => error_code,
            other => panic!("expected an error frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_frame_type_is_invalid() {
        let (state, _rx) = driver_state();
        let reply = state.handle_frame(Uuid::new_v4(), r#"{"type":"teleport"}"#);
        assert_eq!(error_code(reply), WsErrorCode::INVALID_MESSAGE);
        let reply = state.handle_frame(Uuid::new_v4(), "not json");
        assert_eq!(error_code(reply), WsErrorCode::INVALID_MESSAGE);
    }

    #[tokio::test]
    async fn test_ride_response_without_ids_is_invalid() {
        let (state, _rx) = driver_state();
        let reply = state.handle_frame(
            Uuid::new_v4(),
            r#"{"type":"ride_response","offer_id":"","ride_id":"","accepted":true}"#,
        );
        assert_eq!(error_code(reply), WsErrorCode::INVALID_MESSAGE);
    }

    #[tokio::test]
    async fn test_ride_response_without_offer() {
        let (state, _rx) = driver_state();
        let frame = format!(
            r#"{{"type":"ride_response","offer_id":"{}","ride_id":"{}","accepted":true}}"#,
            Uuid::new_v4(),
            Uuid::new_v4()
        );
        let reply = state.handle_frame(Uuid::new_v4(), &frame);
        assert_eq!(error_code(reply), WsErrorCode::OFFER_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_location_update_reaches_fan_in() {
        let (state, mut rx) = driver_state();
        let driver_id = Uuid::new_v4();
        let reply = state.handle_frame(
            driver_id,
            r#"{"type":"location_update","latitude":43.236,"longitude":76.886,"speed_kmh":30.0}"#,
        );
        assert!(reply.is_none());
        let report = rx.try_recv().unwrap();
        assert_eq!(report.driver_id, driver_id);
        assert_eq!(report.fix.location.latitude, 43.236);
        assert_eq!(report.fix.speed_kmh, Some(30.0));
    }

    #[tokio::test]
    async fn test_out_of_range_location_is_invalid() {
        let (state, mut rx) = driver_state();
        let reply = state.handle_frame(
            Uuid::new_v4(),
            r#"{"type":"location_update","latitude":91.0,"longitude":76.886}"#,
        );
        assert_eq!(error_code(reply), WsErrorCode::INVALID_MESSAGE);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_ping_is_answered() {
        let (state, _rx) = driver_state();
        let reply = state.handle_frame(Uuid::new_v4(), r#"{"type":"ping"}"#);
        assert_eq!(reply, Some(DriverServerMessage::Pong));
        assert!(state.handle_frame(Uuid::new_v4(), r#"{"type":"pong"}"#).is_none());
    }
}
