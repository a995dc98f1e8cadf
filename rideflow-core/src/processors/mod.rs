//! Broker-driven processors of both services.
//!
//! Driver-Location Service:
//!
//! - `MatchingEngine`: Receives `ride.request.*`, emits `driver.response.<ride_id>`
//!   or `ride.status.NO_DRIVER`
//! - `RideStatusWatcher`: Receives `ride.status.CANCELLED`, frees drivers
//! - `LocationPublisher`: Receives `LocationReport`, emits `location`
//!
//! Ride Service:
//!
//! - `RideEventProcessor`: Receives `driver.response.*`, `driver.status.*` and
//!   `ride.status.NO_DRIVER`, pushes `ride_status_update`
//! - `LocationRelay`: Receives `location`, pushes `driver_location_update`

pub mod location_publisher;
pub mod location_relay;
pub mod matching_engine;
pub mod ride_events;
pub mod ride_status_watcher;

#[cfg(test)]
mod tests;

pub use location_publisher::LocationPublisher;
pub use location_relay::LocationRelay;
pub use matching_engine::{MatchOutcome, MatchingEngine};
pub use ride_events::RideEventProcessor;
pub use ride_status_watcher::RideStatusWatcher;
