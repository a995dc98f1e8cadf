//! Realtime sockets of both services.
//!
//! # Endpoints
//!
//! - `GET /ws/passengers/{passenger_id}` – Ride Service
//! - `GET /ws/drivers/{driver_id}`       – Driver-Location Service
//!
//! Both planes share one connection driver. After the upgrade the client has
//! [`AUTH_TIMEOUT`] to send its `auth` frame. Once authenticated the
//! connection is registered in the service's hub and runs three tasks:
//!
//! - the reader (this task), handing text frames to the [`Plane`];
//! - the writer, draining the outbound queue with a [`WRITE_TIMEOUT`] per frame;
//! - the keepalive, asking the writer for a ping every [`PING_INTERVAL`].
//!
//! Any frame, pong included, moves the read deadline [`READ_DEADLINE`] ahead.

mod driver;
mod passenger;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use rideflow_core::realtime::{ConnectionHandle, ConnectionHub, Outbound, OutboundQueue};
use rideflow_sdk::auth::JwtKeys;
use rideflow_sdk::objects::Role;
use rideflow_sdk::objects::ws::{AuthFrame, FrameError, WsErrorCode};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use driver::router as driver_router;
pub use passenger::router as passenger_router;

pub const AUTH_TIMEOUT: Duration = Duration::from_secs(5);
pub const READ_DEADLINE: Duration = Duration::from_secs(60);
pub const PING_INTERVAL: Duration = Duration::from_secs(30);
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// The service-specific half of a realtime connection.
#[async_trait]
pub trait Plane: Clone + Send + Sync + 'static {
    type Event: Outbound + Serialize + Send + Sync + 'static;

    /// Role a token must carry to open this plane.
    const ROLE: Role;

    fn keys(&self) -> &JwtKeys;

    fn hub(&self) -> &ConnectionHub<Self::Event>;

    fn shutdown(&self) -> &CancellationToken;

    fn auth_success(user_id: Uuid) -> Self::Event;

    fn error(code: &str, message: String) -> Self::Event;

    /// Handles one text frame of an authenticated user. Replies go to `queue`.
    async fn on_text(&self, user_id: Uuid, text: &str, queue: &OutboundQueue<Self::Event>);
}

/// `error{invalid_message}` for a frame that failed to decode or validate.
fn invalid_message<P: Plane>(err: FrameError) -> P::Event {
    P::error(WsErrorCode::INVALID_MESSAGE, err.to_string())
}

type SocketSink = SplitSink<WebSocket, Message>;
type SocketStream = SplitStream<WebSocket>;

/// Drives one upgraded socket until it closes.
pub async fn serve<P: Plane>(socket: WebSocket, plane: P, user_id: Uuid) {
    let (mut sink, mut stream) = socket.split();

    match authenticate(&plane, &mut stream, user_id).await {
        Ok(()) => {}
        Err(AuthFailure::TimedOut) => {
            debug!(user_id = %user_id, "Realtime auth timed out");
            let _ = timeout(WRITE_TIMEOUT, sink.close()).await;
            return;
        }
        Err(AuthFailure::Rejected(reason)) => {
            info!(user_id = %user_id, reason = %reason, "Realtime auth rejected");
            let _ = send_event(&mut sink, &P::error(WsErrorCode::AUTH_FAILED, reason)).await;
            let _ = timeout(WRITE_TIMEOUT, sink.send(Message::Close(None))).await;
            return;
        }
        Err(AuthFailure::Disconnected) => return,
    }

    if send_event(&mut sink, &P::auth_success(user_id)).await.is_err() {
        return;
    }

    let ConnectionHandle {
        connection_id,
        queue,
        cancel,
        ..
    } = plane.hub().register(user_id, plane.shutdown());
    info!(user_id = %user_id, connection_id = %connection_id, "Realtime connection authenticated");

    let (ping_tx, ping_rx) = mpsc::channel(1);
    let writer = tokio::spawn(write_loop(sink, queue.clone(), ping_rx, cancel.clone()));
    let keepalive = tokio::spawn(keepalive_loop(ping_tx, cancel.clone()));

    read_loop(&plane, user_id, stream, &queue, &cancel).await;

    cancel.cancel();
    queue.close();
    plane.hub().unregister(user_id, connection_id);
    let _ = writer.await;
    let _ = keepalive.await;
    info!(user_id = %user_id, connection_id = %connection_id, "Realtime connection closed");
}

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

enum AuthFailure {
    TimedOut,
    Rejected(String),
    Disconnected,
}

async fn authenticate<P: Plane>(
    plane: &P,
    stream: &mut SocketStream,
    user_id: Uuid,
) -> Result<(), AuthFailure> {
    let text = tokio::select! {
        biased;
        _ = plane.shutdown().cancelled() => return Err(AuthFailure::Disconnected),
        first = timeout(AUTH_TIMEOUT, first_text(stream)) => first
            .map_err(|_| AuthFailure::TimedOut)?
            .ok_or(AuthFailure::Disconnected)?,
    };
    check_auth_frame(plane.keys(), &text, user_id, P::ROLE).map_err(AuthFailure::Rejected)
}

/// Validates the first frame of a connection against the path's user id.
fn check_auth_frame(keys: &JwtKeys, text: &str, user_id: Uuid, role: Role) -> Result<(), String> {
    let frame: AuthFrame =
        serde_json::from_str(text).map_err(|_| "expected an auth frame".to_owned())?;
    keys.verify_for(frame.token(), user_id, role)
        .map(|_| ())
        .map_err(|e| e.to_string())
}

async fn first_text(stream: &mut SocketStream) -> Option<String> {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => return Some(text.to_string()),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => {}
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Connection tasks
// ---------------------------------------------------------------------------

async fn read_loop<P: Plane>(
    plane: &P,
    user_id: Uuid,
    mut stream: SocketStream,
    queue: &OutboundQueue<P::Event>,
    cancel: &CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            frame = timeout(READ_DEADLINE, stream.next()) => frame,
        };
        match frame {
            Err(_) => {
                info!(user_id = %user_id, "Realtime read deadline missed");
                break;
            }
            Ok(None) | Ok(Some(Ok(Message::Close(_)))) => break,
            Ok(Some(Err(e))) => {
                debug!(user_id = %user_id, error = %e, "Realtime read failed");
                break;
            }
            Ok(Some(Ok(Message::Text(text)))) => plane.on_text(user_id, text.as_str(), queue).await,
            Ok(Some(Ok(Message::Binary(_)))) => {
                queue.send(invalid_message::<P>(FrameError::Malformed(
                    "binary frames are not supported".into(),
                )));
            }
            // Ping and pong only refresh the deadline.
            Ok(Some(Ok(_))) => {}
        }
    }
}

async fn write_loop<M: Serialize>(
    mut sink: SocketSink,
    queue: Arc<OutboundQueue<M>>,
    mut pings: mpsc::Receiver<()>,
    cancel: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            Some(()) = pings.recv() => Message::Ping(Default::default()),
            event = queue.next() => match event {
                Some(event) => match serde_json::to_string(&event) {
                    Ok(json) => Message::Text(json.into()),
                    Err(e) => {
                        warn!(error = %e, "Failed to encode realtime event");
                        continue;
                    }
                },
                None => break,
            },
        };
        match timeout(WRITE_TIMEOUT, sink.send(message)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(error = %e, "Realtime write failed");
                cancel.cancel();
                return;
            }
            Err(_) => {
                warn!("Realtime write timed out");
                cancel.cancel();
                return;
            }
        }
    }
    let _ = timeout(WRITE_TIMEOUT, sink.send(Message::Close(None))).await;
}

async fn keepalive_loop(pings: mpsc::Sender<()>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval_at(Instant::now() + PING_INTERVAL, PING_INTERVAL);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                // Full means the previous ping is still waiting for the writer.
                if let Err(mpsc::error::TrySendError::Closed(_)) = pings.try_send(()) {
                    break;
                }
            }
        }
    }
}

async fn send_event<M: Serialize>(sink: &mut SocketSink, event: &M) -> Result<(), ()> {
    let json = serde_json::to_string(event).map_err(|_| ())?;
    match timeout(WRITE_TIMEOUT, sink.send(Message::Text(json.into()))).await {
        Ok(Ok(())) => Ok(()),
        _ => Err(()),
    }
}
