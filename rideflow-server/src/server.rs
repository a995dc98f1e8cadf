//! Axum server setup and router configuration.

use axum::{
    BoxError, Json, Router, error_handling::HandleErrorLayer, http::StatusCode,
    response::IntoResponse, routing::get,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower::timeout::TimeoutLayer;

/// Budget of a single HTTP request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Finish an API router: health check, request timeout and state.
pub fn build_router<S>(api: Router<S>, state: S) -> Router
where
    S: Clone + Send + Sync + 'static,
{
    api.route("/health", get(health_check))
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_timeout))
                .layer(TimeoutLayer::new(REQUEST_TIMEOUT)),
        )
        .with_state(state)
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Simple health check - returns OK if the server is running.
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn handle_timeout(err: BoxError) -> (StatusCode, String) {
    if err.is::<tower::timeout::error::Elapsed>() {
        (StatusCode::REQUEST_TIMEOUT, "request timed out".to_owned())
    } else {
        tracing::error!(error = %err, "Unhandled middleware error");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal server error".to_owned(),
        )
    }
}

/// Serve the API and realtime routers, on one port or on two when a
/// dedicated realtime port is configured.
pub async fn run_service(
    api: Router,
    realtime: Router,
    addr: SocketAddr,
    realtime_addr: Option<SocketAddr>,
    shutdown: CancellationToken,
) -> Result<(), std::io::Error> {
    match realtime_addr {
        None => run_server(api.merge(realtime), addr, shutdown).await,
        Some(realtime_addr) => {
            tokio::try_join!(
                run_server(api, addr, shutdown.clone()),
                run_server(realtime, realtime_addr, shutdown),
            )?;
            Ok(())
        }
    }
}

/// Run the server with graceful shutdown support.
pub async fn run_server(
    router: Router,
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> Result<(), std::io::Error> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
}
