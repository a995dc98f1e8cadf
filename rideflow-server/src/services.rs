//! Wiring of the two services: stores, hubs, processors and routers.

use crate::api;
use crate::config::Tuning;
use crate::server::build_router;
use crate::state::{DriverState, RideState};
use axum::Router;
use rideflow_core::broker::{BrokerError, SharedBus};
use rideflow_core::events::location_report_channel;
use rideflow_core::framework::DatabaseProcessor;
use rideflow_core::matching::{InFlightRides, OfferTable};
use rideflow_core::processors::{
    LocationPublisher, LocationRelay, MatchingEngine, RideEventProcessor, RideStatusWatcher,
};
use rideflow_core::realtime::{DriverHub, PassengerHub};
use rideflow_core::services::{Fleet, RideRequests, RideRouteCache};
use rideflow_core::stores::{PgDriverStore, PgRideStore, SharedDriverStore, SharedRideStore};
use rideflow_sdk::auth::JwtKeys;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A started service.
pub struct Service {
    pub api: Router,
    pub realtime: Router,
    /// Long-running processors; they stop when the root token is cancelled.
    pub tasks: Vec<JoinHandle<()>>,
}

/// Ride Service: ride lifecycle, passenger sockets, driver tracking.
pub async fn ride(
    db: DatabaseProcessor,
    bus: SharedBus,
    tuning: &Tuning,
    keys: Arc<JwtKeys>,
    root: &CancellationToken,
) -> Result<Service, BrokerError> {
    let rides: SharedRideStore = Arc::new(PgRideStore::new(db));
    let passengers = Arc::new(PassengerHub::default());
    let routes = Arc::new(RideRouteCache::new());

    let tasks = vec![
        RideEventProcessor::new(
            bus.clone(),
            rides.clone(),
            passengers.clone(),
            routes.clone(),
            root.child_token(),
        )
        .start()
        .await?,
        LocationRelay::new(
            bus.clone(),
            rides.clone(),
            passengers.clone(),
            routes.clone(),
            root.child_token(),
        )
        .start()
        .await?,
    ];

    let requests = RideRequests::new(
        rides,
        bus,
        passengers.clone(),
        routes,
        tuning.pricing.clone(),
        tuning.dispatch.clone(),
        root.child_token(),
    );
    let state = RideState {
        rides: Arc::new(requests),
        passengers,
        keys,
        shutdown: root.clone(),
    };

    Ok(Service {
        api: build_router(api::rides::router(), state.clone()),
        realtime: api::realtime::passenger_router().with_state(state),
        tasks,
    })
}

/// Driver-Location Service: sessions, positions, matching and driver sockets.
pub async fn driver_location(
    db: DatabaseProcessor,
    bus: SharedBus,
    tuning: &Tuning,
    keys: Arc<JwtKeys>,
    root: &CancellationToken,
) -> Result<Service, BrokerError> {
    let drivers: SharedDriverStore = Arc::new(PgDriverStore::new(db));
    let hub = Arc::new(DriverHub::default());
    let offers = Arc::new(OfferTable::new());
    let in_flight = InFlightRides::new();
    let fleet = Arc::new(Fleet::new(
        drivers.clone(),
        bus.clone(),
        offers.clone(),
        tuning.pricing.clone(),
        tuning.dispatch.clone(),
    ));
    let (locations, location_rx) = location_report_channel();

    let tasks = vec![
        MatchingEngine::new(
            bus.clone(),
            drivers.clone(),
            hub.clone(),
            offers.clone(),
            in_flight.clone(),
            tuning.dispatch.clone(),
            root.child_token(),
        )
        .start()
        .await?,
        RideStatusWatcher::new(
            bus,
            drivers,
            hub.clone(),
            offers,
            in_flight,
            root.child_token(),
        )
        .start()
        .await?,
        LocationPublisher::new(fleet.clone(), location_rx, root.child_token()).start(),
    ];

    let state = DriverState {
        fleet,
        drivers: hub,
        locations,
        keys,
        shutdown: root.clone(),
    };

    Ok(Service {
        api: build_router(api::drivers::router(), state.clone()),
        realtime: api::realtime::driver_router().with_state(state),
        tasks,
    })
}
