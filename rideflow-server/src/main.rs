//! Rideflow Server
//!
//! Runs either the Ride Service or the Driver-Location Service of the
//! dispatch core. The two talk to each other only through the broker.

mod api;
mod config;
mod server;
mod services;
mod shutdown;
mod state;

use anyhow::bail;
use clap::{Parser, Subcommand, ValueEnum};
use config::ConfigLoader;
use config::env::{BrokerArgs, DatabaseArgs};
use rideflow_core::broker::{AmqpBus, SharedBus};
use rideflow_core::framework::DatabaseProcessor;
use rideflow_sdk::auth::JwtKeys;
use server::run_service;
use shutdown::{drain, spawn_signal_handler};
use sqlx::postgres::PgPoolOptions;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Delay between two connection attempts at startup.
const RETRY_DELAY: Duration = Duration::from_secs(2);

/// Rideflow - ride-hailing dispatch core
#[derive(Parser, Debug)]
#[command(name = "rideflow-server")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    service: ServiceKind,

    /// Path to an optional dispatch and pricing tuning file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run database migrations on startup
    #[arg(long, default_value = "false")]
    migrate: bool,

    /// Address to bind both listeners to
    #[arg(long, default_value = "0.0.0.0")]
    host: IpAddr,

    #[arg(long, env = "RIDE_SERVICE_PORT", default_value_t = 3000)]
    ride_service_port: u16,

    #[arg(long, env = "DRIVER_LOCATION_SERVICE_PORT", default_value_t = 3001)]
    driver_location_service_port: u16,

    /// Dedicated port for the WebSocket routes; shares the API port when unset
    #[arg(long, env = "WS_PORT")]
    ws_port: Option<u16>,

    /// HS256 secret shared with the token issuer
    #[arg(long, env = "PUBLIC_JWT_SECRET", hide_env_values = true)]
    jwt_secret: String,

    /// Log filter, e.g. `debug` or `info,rideflow_core=debug`
    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(flatten)]
    database: DatabaseArgs,

    #[command(flatten)]
    broker: BrokerArgs,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum ServiceKind {
    /// Ride lifecycle and passenger realtime plane
    Ride,
    /// Driver sessions, locations, matching and driver realtime plane
    DriverLocation,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_tracing(args.log_level.as_deref(), args.log_format);

    tracing::info!(
        service = ?args.service,
        "Starting rideflow-server v{}",
        env!("CARGO_PKG_VERSION")
    );

    if args.jwt_secret.is_empty() {
        bail!("PUBLIC_JWT_SECRET must not be empty");
    }
    let keys = Arc::new(JwtKeys::new(args.jwt_secret.as_bytes()));

    let tuning = ConfigLoader::new(args.config.as_deref()).load().map_err(|e| {
        tracing::error!("Failed to load configuration: {}", e);
        e
    })?;
    let attempts = tuning.dispatch.max_db_retries;

    tracing::info!("Connecting to database...");
    let connect_options = args.database.connect_options();
    let db_pool = with_retries("database", attempts, || {
        PgPoolOptions::new()
            .max_connections(10)
            .connect_with(connect_options.clone())
    })
    .await?;
    tracing::info!("Database connection established");

    if args.migrate {
        tracing::info!("Running database migrations...");
        sqlx::migrate!("../migrations")
            .run(&db_pool)
            .await
            .map_err(|e| {
                tracing::error!("Failed to run migrations: {}", e);
                e
            })?;
        tracing::info!("Migrations completed successfully");
    }

    tracing::info!("Connecting to broker...");
    let settings = args.broker.settings()?;
    let bus = with_retries("broker", attempts, || AmqpBus::connect(settings.clone())).await?;
    let bus: SharedBus = Arc::new(bus);
    tracing::info!("Broker connection established");

    let root = CancellationToken::new();
    spawn_signal_handler(root.clone())?;

    let db = DatabaseProcessor::new(db_pool.clone());
    let (service, port) = match args.service {
        ServiceKind::Ride => (
            services::ride(db, bus.clone(), &tuning, keys, &root).await?,
            args.ride_service_port,
        ),
        ServiceKind::DriverLocation => (
            services::driver_location(db, bus.clone(), &tuning, keys, &root).await?,
            args.driver_location_service_port,
        ),
    };

    let addr = SocketAddr::new(args.host, port);
    let realtime_addr = args.ws_port.map(|port| SocketAddr::new(args.host, port));
    let result = run_service(
        service.api,
        service.realtime,
        addr,
        realtime_addr,
        root.clone(),
    )
    .await;
    if let Err(e) = &result {
        tracing::error!("Server failed: {}", e);
    }

    // A listener failing on its own still has to stop the processors.
    root.cancel();
    drain(service.tasks).await;

    tracing::info!("Closing broker and database connections...");
    bus.close().await;
    db_pool.close().await;
    tracing::info!("Server shutdown complete");

    result.map_err(Into::into)
}

/// Retries `connect` up to `attempts` times, [`RETRY_DELAY`] apart.
async fn with_retries<T, E, F, Fut>(what: &str, attempts: u32, mut connect: F) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 1;
    loop {
        match connect().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                tracing::warn!(attempt, attempts, error = %e, "Failed to connect to {}, retrying", what);
                attempt += 1;
                tokio::time::sleep(RETRY_DELAY).await;
            }
            Err(e) => {
                tracing::error!(attempt, error = %e, "Failed to connect to {}", what);
                return Err(e);
            }
        }
    }
}

/// Initialize the tracing subscriber.
///
/// `LOG_LEVEL` wins over `RUST_LOG`.
fn init_tracing(level: Option<&str>, format: LogFormat) {
    let filter = level
        .and_then(|level| EnvFilter::try_new(level).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info,sqlx=warn,lapin=warn"));

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
    }
}
