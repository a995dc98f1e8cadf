//! In-memory stores and a two-service harness over [`MemoryBus`].

use crate::broker::SharedBus;
use crate::broker::memory::MemoryBus;
use crate::config::{DispatchConfig, PricingTable};
use crate::entities::AssignmentStatus;
use crate::entities::assignments::Assignment;
use crate::entities::driver_sessions::DriverSession;
use crate::entities::drivers::Driver;
use crate::entities::rides::{NewRide, Ride, RideTransition, ride_number};
use crate::matching::{InFlightRides, OfferTable};
use crate::processors::{LocationRelay, MatchingEngine, RideEventProcessor, RideStatusWatcher};
use crate::realtime::{ConnectionHandle, DriverHub, PassengerHub};
use crate::services::{Fleet, RideRequests, RideRouteCache};
use crate::stores::{
    DriverStore, FinishRide, LocationFix, LocationRecord, NewAssignment, RideStore, StoreError,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use rideflow_sdk::objects::{
    CreateRideRequest, CreateRideResponse, DriverStatus, Location, RideType, VehicleInfo,
};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

// ----------------------------------------------------------------------------
// Fixtures
// ----------------------------------------------------------------------------

pub fn driver_position() -> Location {
    Location::new(43.236, 76.886)
}

pub fn pickup() -> Location {
    Location::new(43.240, 76.890).with_address("Abay Ave 10")
}

pub fn destination() -> Location {
    Location::new(43.260, 76.910).with_address("Dostyk Ave 1")
}

pub fn ride_request(ride_type: RideType) -> CreateRideRequest {
    let (from, to) = (pickup(), destination());
    CreateRideRequest {
        pickup_latitude: from.latitude,
        pickup_longitude: from.longitude,
        pickup_address: from.address,
        destination_latitude: to.latitude,
        destination_longitude: to.longitude,
        destination_address: to.address,
        ride_type,
    }
}

/// An offline driver parked near the pickup.
pub fn driver(name: &str, class: RideType) -> Driver {
    Driver {
        id: Uuid::now_v7(),
        name: name.to_owned(),
        status: DriverStatus::Offline,
        vehicle: VehicleInfo {
            class,
            make: Some("Toyota".into()),
            model: Some("Camry".into()),
            plate: Some("777ABC02".into()),
        },
        rating: Some(Decimal::new(49, 1)),
        location: Some(driver_position()),
        location_updated_at: None,
    }
}

/// Short timings so matching tests finish quickly.
pub fn fast_config() -> DispatchConfig {
    DispatchConfig {
        match_timeout_seconds: 2,
        candidate_poll_ms: 20,
        ..DispatchConfig::default()
    }
}

/// Next frame on a registered socket, or `None` after `within`.
pub async fn next_frame<M>(handle: &ConnectionHandle<M>, within: Duration) -> Option<M> {
    tokio::time::timeout(within, handle.queue.next())
        .await
        .ok()
        .flatten()
}

// ----------------------------------------------------------------------------
// MemoryRideStore
// ----------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryRideStore {
    rides: Mutex<HashMap<Uuid, Ride>>,
    sequence: Mutex<i64>,
}

impl MemoryRideStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn get(&self, ride_id: Uuid) -> Option<Ride> {
        self.rides.lock().get(&ride_id).cloned()
    }

    pub fn for_passenger(&self, passenger_id: Uuid) -> Vec<Ride> {
        self.rides
            .lock()
            .values()
            .filter(|r| r.passenger_id == passenger_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl RideStore for MemoryRideStore {
    async fn active_ride_for_passenger(&self, passenger_id: Uuid) -> Result<Option<Ride>, StoreError> {
        Ok(self
            .rides
            .lock()
            .values()
            .find(|r| r.passenger_id == passenger_id && r.is_active())
            .cloned())
    }

    async fn create_ride(&self, new: NewRide) -> Result<Ride, StoreError> {
        let mut rides = self.rides.lock();
        if rides
            .values()
            .any(|r| r.passenger_id == new.passenger_id && r.is_active())
        {
            return Err(StoreError::ActiveRideExists);
        }
        let number = {
            let mut sequence = self.sequence.lock();
            *sequence += 1;
            ride_number(new.requested_at.date(), *sequence)
        };
        let ride = new.into_ride(Uuid::now_v7(), number);
        rides.insert(ride.id, ride.clone());
        Ok(ride)
    }

    async fn ride(&self, ride_id: Uuid) -> Result<Option<Ride>, StoreError> {
        Ok(self.get(ride_id))
    }

    async fn transition(&self, transition: RideTransition) -> Result<Ride, StoreError> {
        let mut rides = self.rides.lock();
        let mut ride = rides
            .get(&transition.ride_id)
            .cloned()
            .ok_or(StoreError::RideNotFound(transition.ride_id))?;
        ride.apply(&transition)?;
        if let Some(driver_id) = ride.driver_id.filter(|_| ride.is_active()) {
            if rides
                .values()
                .any(|r| r.id != ride.id && r.driver_id == Some(driver_id) && r.is_active())
            {
                return Err(StoreError::DriverBusy);
            }
        }
        rides.insert(ride.id, ride.clone());
        Ok(ride)
    }

    async fn record_feedback(
        &self,
        ride_id: Uuid,
        passenger_id: Uuid,
        rating: u8,
        tip: Decimal,
    ) -> Result<Ride, StoreError> {
        let mut rides = self.rides.lock();
        let ride = rides
            .get_mut(&ride_id)
            .filter(|r| r.passenger_id == passenger_id)
            .ok_or(StoreError::RideNotFound(ride_id))?;
        if ride.status != rideflow_sdk::objects::RideStatus::Completed {
            return Err(StoreError::RideNotCompleted {
                status: ride.status,
            });
        }
        ride.passenger_rating = Some(rating);
        ride.tip = Some(tip);
        Ok(ride.clone())
    }
}

// ----------------------------------------------------------------------------
// MemoryDriverStore
// ----------------------------------------------------------------------------

#[derive(Default)]
struct DriverTables {
    drivers: HashMap<Uuid, Driver>,
    sessions: Vec<DriverSession>,
    assignments: Vec<Assignment>,
    history: Vec<(Uuid, Option<Uuid>)>,
}

impl DriverTables {
    fn driver_mut(&mut self, driver_id: Uuid) -> Result<&mut Driver, StoreError> {
        self.drivers
            .get_mut(&driver_id)
            .ok_or(StoreError::DriverNotFound(driver_id))
    }

    fn active_for_driver(&mut self, driver_id: Uuid) -> Option<&mut Assignment> {
        self.assignments
            .iter_mut()
            .find(|a| a.driver_id == driver_id && a.is_active())
    }

    fn open_session(&mut self, driver_id: Uuid) -> Option<&mut DriverSession> {
        self.sessions
            .iter_mut()
            .find(|s| s.driver_id == driver_id && s.ended_at.is_none())
    }
}

#[derive(Default)]
pub struct MemoryDriverStore {
    tables: Mutex<DriverTables>,
}

impl MemoryDriverStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_driver(&self, driver: Driver) {
        self.tables.lock().drivers.insert(driver.id, driver);
    }

    pub fn status(&self, driver_id: Uuid) -> Option<DriverStatus> {
        self.tables.lock().drivers.get(&driver_id).map(|d| d.status)
    }

    pub fn position(&self, driver_id: Uuid) -> Option<Location> {
        self.tables
            .lock()
            .drivers
            .get(&driver_id)
            .and_then(|d| d.location.clone())
    }

    /// Recorded history points as `(driver_id, ride_id)`.
    pub fn history(&self) -> Vec<(Uuid, Option<Uuid>)> {
        self.tables.lock().history.clone()
    }

    pub fn assignments(&self, ride_id: Uuid) -> Vec<Assignment> {
        self.tables
            .lock()
            .assignments
            .iter()
            .filter(|a| a.ride_id == ride_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl DriverStore for MemoryDriverStore {
    async fn driver(&self, driver_id: Uuid) -> Result<Option<Driver>, StoreError> {
        Ok(self.tables.lock().drivers.get(&driver_id).cloned())
    }

    async fn available_drivers(&self, ride_type: RideType) -> Result<Vec<Driver>, StoreError> {
        let mut drivers: Vec<Driver> = self
            .tables
            .lock()
            .drivers
            .values()
            .filter(|d| {
                d.status == DriverStatus::Available
                    && d.ride_type() == ride_type
                    && d.location.is_some()
            })
            .cloned()
            .collect();
        drivers.sort_by_key(|d| d.id);
        Ok(drivers)
    }

    async fn open_session(
        &self,
        driver_id: Uuid,
        location: Location,
        at: OffsetDateTime,
    ) -> Result<DriverSession, StoreError> {
        let mut tables = self.tables.lock();
        tables.driver_mut(driver_id)?;
        if tables.open_session(driver_id).is_some() {
            return Err(StoreError::AlreadyOnline);
        }
        let session = DriverSession {
            id: Uuid::now_v7(),
            driver_id,
            started_at: at,
            ended_at: None,
            rides_completed: 0,
            earnings: Decimal::ZERO,
        };
        tables.sessions.push(session.clone());
        let driver = tables.driver_mut(driver_id)?;
        driver.location = Some(location);
        driver.location_updated_at = Some(at);
        driver.status = DriverStatus::Available;
        Ok(session)
    }

    async fn close_session(&self, driver_id: Uuid, at: OffsetDateTime) -> Result<DriverSession, StoreError> {
        let mut tables = self.tables.lock();
        tables.driver_mut(driver_id)?;
        if tables.active_for_driver(driver_id).is_some() {
            return Err(StoreError::DriverBusy);
        }
        let session = tables.open_session(driver_id).ok_or(StoreError::NotOnline)?;
        session.ended_at = Some(at.max(session.started_at));
        let closed = session.clone();
        tables.driver_mut(driver_id)?.status = DriverStatus::Offline;
        Ok(closed)
    }

    async fn record_location(&self, driver_id: Uuid, fix: LocationFix) -> Result<LocationRecord, StoreError> {
        let mut tables = self.tables.lock();
        let driver = tables.driver_mut(driver_id)?;
        if driver.status == DriverStatus::Offline {
            return Err(StoreError::NotOnline);
        }
        driver.location = Some(fix.location);
        driver.location_updated_at = Some(fix.at);
        let assignment = tables.active_for_driver(driver_id).cloned();
        tables
            .history
            .push((driver_id, assignment.as_ref().map(|a| a.ride_id)));
        Ok(LocationRecord {
            coordinate_id: Uuid::now_v7(),
            recorded_at: fix.at,
            assignment,
        })
    }

    async fn assign_ride(&self, new: NewAssignment) -> Result<Assignment, StoreError> {
        let mut tables = self.tables.lock();
        let driver_id = new.driver_id;
        let status = tables.driver_mut(driver_id)?.status;
        if status != DriverStatus::Available || tables.active_for_driver(driver_id).is_some() {
            return Err(StoreError::DriverUnavailable(driver_id));
        }
        if tables
            .assignments
            .iter()
            .any(|a| a.ride_id == new.ride_id && a.is_active())
        {
            return Err(StoreError::RideAlreadyAssigned(new.ride_id));
        }
        let assignment = new.into_assignment(Uuid::now_v7());
        tables.assignments.push(assignment.clone());
        tables.driver_mut(driver_id)?.status = DriverStatus::Busy;
        Ok(assignment)
    }

    async fn assignment_for_driver(&self, driver_id: Uuid) -> Result<Option<Assignment>, StoreError> {
        Ok(self.tables.lock().active_for_driver(driver_id).cloned())
    }

    async fn assignment_for_ride(&self, ride_id: Uuid) -> Result<Option<Assignment>, StoreError> {
        Ok(self
            .tables
            .lock()
            .assignments
            .iter()
            .filter(|a| a.ride_id == ride_id)
            .max_by_key(|a| a.assigned_at)
            .cloned())
    }

    async fn mark_arrived(&self, ride_id: Uuid, driver_id: Uuid, at: OffsetDateTime) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock();
        match tables.assignments.iter_mut().find(|a| {
            a.ride_id == ride_id && a.driver_id == driver_id && a.status == AssignmentStatus::Assigned
        }) {
            Some(assignment) => {
                assignment.status = AssignmentStatus::Arrived;
                assignment.arrived_at = Some(at.max(assignment.assigned_at));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_started(
        &self,
        ride_id: Uuid,
        driver_id: Uuid,
        at: OffsetDateTime,
    ) -> Result<Assignment, StoreError> {
        let mut tables = self.tables.lock();
        let assignment = tables
            .assignments
            .iter_mut()
            .find(|a| {
                a.ride_id == ride_id
                    && a.driver_id == driver_id
                    && matches!(a.status, AssignmentStatus::Assigned | AssignmentStatus::Arrived)
            })
            .ok_or(StoreError::InvalidAssignment { ride_id })?;
        let floor = assignment.arrived_at.unwrap_or(assignment.assigned_at);
        assignment.status = AssignmentStatus::InProgress;
        assignment.started_at = Some(at.max(floor));
        Ok(assignment.clone())
    }

    async fn finish_ride(&self, finish: FinishRide) -> Result<Assignment, StoreError> {
        let mut tables = self.tables.lock();
        let assignment = tables
            .active_for_driver(finish.driver_id)
            .filter(|a| a.ride_id == finish.ride_id && a.status == AssignmentStatus::InProgress)
            .ok_or(StoreError::InvalidAssignment {
                ride_id: finish.ride_id,
            })?;
        assignment.status = AssignmentStatus::Completed;
        assignment.completed_at = Some(assignment.started_at.map_or(finish.at, |s| s.max(finish.at)));
        assignment.final_fare = Some(finish.final_fare);
        assignment.driver_earnings = Some(finish.driver_earnings);
        let completed = assignment.clone();
        if let Some(session) = tables.open_session(finish.driver_id) {
            session.rides_completed += 1;
            session.earnings += finish.driver_earnings;
        }
        let driver = tables.driver_mut(finish.driver_id)?;
        driver.location = Some(finish.final_location);
        driver.location_updated_at = Some(finish.at);
        driver.status = DriverStatus::Available;
        Ok(completed)
    }

    async fn release_ride(
        &self,
        ride_id: Uuid,
        driver_id: Option<Uuid>,
        _reason: Option<String>,
        at: OffsetDateTime,
    ) -> Result<Option<Assignment>, StoreError> {
        let mut tables = self.tables.lock();
        let Some(assignment) = tables.assignments.iter_mut().find(|a| {
            a.ride_id == ride_id && a.is_active() && driver_id.is_none_or(|d| d == a.driver_id)
        }) else {
            return Ok(None);
        };
        assignment.status = AssignmentStatus::Cancelled;
        assignment.cancelled_at = Some(assignment.assigned_at.max(at));
        let released = assignment.clone();
        if let Some(driver) = tables.drivers.get_mut(&released.driver_id) {
            if driver.status == DriverStatus::Busy {
                driver.status = DriverStatus::Available;
            }
        }
        Ok(Some(released))
    }
}

// ----------------------------------------------------------------------------
// Harness
// ----------------------------------------------------------------------------

/// Both services wired over one [`MemoryBus`].
pub struct Harness {
    pub bus: MemoryBus,
    pub rides: Arc<MemoryRideStore>,
    pub drivers: Arc<MemoryDriverStore>,
    pub driver_hub: Arc<DriverHub>,
    pub passenger_hub: Arc<PassengerHub>,
    pub offers: Arc<OfferTable>,
    pub in_flight: Arc<InFlightRides>,
    pub routes: Arc<RideRouteCache>,
    pub fleet: Arc<Fleet>,
    pub ride_requests: RideRequests,
    pub config: DispatchConfig,
    pub shutdown: CancellationToken,
}

impl Harness {
    pub fn new(config: DispatchConfig) -> Self {
        let bus = MemoryBus::new();
        let shared: SharedBus = Arc::new(bus.clone());
        let rides = MemoryRideStore::new();
        let drivers = MemoryDriverStore::new();
        let driver_hub = Arc::new(DriverHub::default());
        let passenger_hub = Arc::new(PassengerHub::default());
        let offers = Arc::new(OfferTable::new());
        let routes = Arc::new(RideRouteCache::new());
        let shutdown = CancellationToken::new();
        let fleet = Arc::new(Fleet::new(
            drivers.clone(),
            shared.clone(),
            offers.clone(),
            PricingTable::default(),
            config.clone(),
        ));
        let ride_requests = RideRequests::new(
            rides.clone(),
            shared,
            passenger_hub.clone(),
            routes.clone(),
            PricingTable::default(),
            config.clone(),
            shutdown.child_token(),
        );
        Self {
            bus,
            rides,
            drivers,
            driver_hub,
            passenger_hub,
            offers,
            in_flight: InFlightRides::new(),
            routes,
            fleet,
            ride_requests,
            config,
            shutdown,
        }
    }

    fn shared_bus(&self) -> SharedBus {
        Arc::new(self.bus.clone())
    }

    pub fn matching_engine(&self) -> MatchingEngine {
        MatchingEngine::new(
            self.shared_bus(),
            self.drivers.clone(),
            self.driver_hub.clone(),
            self.offers.clone(),
            self.in_flight.clone(),
            self.config.clone(),
            self.shutdown.child_token(),
        )
    }

    /// Starts every broker consumer of both services.
    pub async fn start(&self) -> Vec<JoinHandle<()>> {
        let mut handles = vec![self.matching_engine().start().await.unwrap()];
        handles.push(
            RideStatusWatcher::new(
                self.shared_bus(),
                self.drivers.clone(),
                self.driver_hub.clone(),
                self.offers.clone(),
                self.in_flight.clone(),
                self.shutdown.child_token(),
            )
            .start()
            .await
            .unwrap(),
        );
        handles.push(
            RideEventProcessor::new(
                self.shared_bus(),
                self.rides.clone(),
                self.passenger_hub.clone(),
                self.routes.clone(),
                self.shutdown.child_token(),
            )
            .start()
            .await
            .unwrap(),
        );
        handles.push(
            LocationRelay::new(
                self.shared_bus(),
                self.rides.clone(),
                self.passenger_hub.clone(),
                self.routes.clone(),
                self.shutdown.child_token(),
            )
            .start()
            .await
            .unwrap(),
        );
        handles
    }

    /// Adds a driver and takes it online at its fixture position.
    pub async fn online_driver(&self, name: &str, class: RideType) -> Driver {
        self.online_driver_at(name, class, driver_position()).await
    }

    pub async fn online_driver_at(&self, name: &str, class: RideType, position: Location) -> Driver {
        let mut driver = driver(name, class);
        driver.location = Some(position.clone());
        self.drivers.add_driver(driver.clone());
        self.fleet
            .go_online(
                driver.id,
                rideflow_sdk::objects::GoOnlineRequest {
                    latitude: position.latitude,
                    longitude: position.longitude,
                },
            )
            .await
            .unwrap();
        driver
    }

    pub async fn request_ride(&self, passenger_id: Uuid, ride_type: RideType) -> CreateRideResponse {
        self.ride_requests
            .create(passenger_id, ride_request(ride_type))
            .await
            .unwrap()
    }

    /// Polls until the ride reaches `status`.
    pub async fn wait_for_status(
        &self,
        ride_id: Uuid,
        status: rideflow_sdk::objects::RideStatus,
        within: Duration,
    ) -> Option<Ride> {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            if let Some(ride) = self.rides.get(ride_id).filter(|r| r.status == status) {
                return Some(ride);
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
