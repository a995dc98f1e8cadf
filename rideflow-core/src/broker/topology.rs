//! Exchange, queue and routing-key names.
//!
//! | Exchange          | Routing keys                                                       |
//! |-------------------|--------------------------------------------------------------------|
//! | `ride_topic`      | `ride.request.<type>`, `ride.status.<status>`, `driver.response.<ride_id>`, `driver.status.<event>` |
//! | `location_fanout` | `location`                                                         |

use rideflow_sdk::objects::{DriverRideEvent, RideStatus, RideType};
use uuid::Uuid;

use super::ConsumeSpec;

pub const RIDE_TOPIC: &str = "ride_topic";
pub const LOCATION_EXCHANGE: &str = "location_fanout";
pub const LOCATION_ROUTING_KEY: &str = "location";

/// Declared on every queue so ride-type priorities take effect.
pub const MAX_PRIORITY: u8 = 10;

pub const RIDE_REQUEST_PATTERN: &str = "ride.request.*";
pub const DRIVER_RESPONSE_PATTERN: &str = "driver.response.*";
pub const DRIVER_STATUS_PATTERN: &str = "driver.status.*";

pub fn ride_request_key(ride_type: RideType) -> String {
    format!("ride.request.{ride_type}")
}

pub fn ride_status_key(status: RideStatus) -> String {
    format!("ride.status.{status}")
}

pub fn driver_response_key(ride_id: Uuid) -> String {
    format!("driver.response.{ride_id}")
}

pub fn driver_status_key(event: DriverRideEvent) -> String {
    format!("driver.status.{event}")
}

/// Publish priority of a ride request.
pub fn priority_for(ride_type: RideType) -> u8 {
    match ride_type {
        RideType::Economy => 1,
        RideType::Premium => 5,
        RideType::Xl => 3,
    }
}

/// AMQP topic matching: `*` matches exactly one word, `#` zero or more.
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    fn go(pattern: &[&str], key: &[&str]) -> bool {
        match pattern.split_first() {
            None => key.is_empty(),
            Some((&"#", rest)) => (0..=key.len()).any(|skip| go(rest, &key[skip..])),
            Some((&"*", rest)) => !key.is_empty() && go(rest, &key[1..]),
            Some((word, rest)) => key.first() == Some(word) && go(rest, &key[1..]),
        }
    }
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    go(&pattern, &key)
}

// ----------------------------------------------------------------------------
// Subscriptions
// ----------------------------------------------------------------------------

fn durable(exchange: &'static str, queue: &str, binding: &str, prefetch: u16) -> ConsumeSpec {
    ConsumeSpec {
        exchange,
        queue: queue.to_owned(),
        binding_keys: vec![binding.to_owned()],
        prefetch,
        durable: true,
        auto_ack: false,
    }
}

/// Competing-consumer queue shared by every Driver-Location replica.
pub fn driver_matching() -> ConsumeSpec {
    durable(RIDE_TOPIC, "driver_matching", RIDE_REQUEST_PATTERN, 10)
}

/// Cancellations fanned back to the Driver-Location Service.
pub fn ride_status() -> ConsumeSpec {
    durable(
        RIDE_TOPIC,
        "ride_status",
        &ride_status_key(RideStatus::Cancelled),
        10,
    )
}

pub fn driver_responses() -> ConsumeSpec {
    durable(RIDE_TOPIC, "driver_responses", DRIVER_RESPONSE_PATTERN, 10)
}

pub fn driver_status() -> ConsumeSpec {
    durable(RIDE_TOPIC, "driver_status", DRIVER_STATUS_PATTERN, 10)
}

/// Matching outcomes reported back to the Ride Service.
pub fn ride_outcomes() -> ConsumeSpec {
    durable(
        RIDE_TOPIC,
        "ride_outcomes",
        &ride_status_key(RideStatus::NoDriver),
        10,
    )
}

pub fn location_updates() -> ConsumeSpec {
    durable(
        LOCATION_EXCHANGE,
        "location_updates",
        LOCATION_ROUTING_KEY,
        20,
    )
}
