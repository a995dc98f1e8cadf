//! Both services running against one in-memory broker.

use crate::broker::OutgoingMessage;
use crate::broker::MessageBus;
use crate::broker::topology::{LOCATION_EXCHANGE, LOCATION_ROUTING_KEY, RIDE_TOPIC, driver_response_key};
use crate::realtime::ConnectionHandle;
use crate::stores::LocationFix;
use crate::testing::{Harness, destination, fast_config, next_frame, pickup};
use rideflow_sdk::objects::ws::{
    DriverServerMessage, PassengerServerMessage, RideOffer, RideStatusUpdate, ValidRideResponse,
};
use rideflow_sdk::objects::{
    CompleteRideRequest, DriverCancelRequest, DriverStatus, Location, LocationMessage, RideStatus,
    RideStatusMessage, RideType, StartRideRequest,
};
use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

const WAIT: Duration = Duration::from_secs(3);
const QUIET: Duration = Duration::from_millis(200);

async fn expect_offer(socket: &ConnectionHandle<DriverServerMessage>) -> RideOffer {
    match next_frame(socket, WAIT).await {
        Some(DriverServerMessage::RideOffer(offer)) => offer,
        other => panic!("expected a ride offer, got {other:?}"),
    }
}

async fn expect_details(socket: &ConnectionHandle<DriverServerMessage>, status: RideStatus) {
    match next_frame(socket, WAIT).await {
        Some(DriverServerMessage::RideDetails(details)) => assert_eq!(details.status, status),
        other => panic!("expected ride details, got {other:?}"),
    }
}

/// Next ride status update, skipping position frames.
async fn next_status(socket: &ConnectionHandle<PassengerServerMessage>) -> RideStatusUpdate {
    loop {
        match next_frame(socket, WAIT).await {
            Some(PassengerServerMessage::RideStatusUpdate(update)) => return update,
            Some(PassengerServerMessage::DriverLocationUpdate(_)) => continue,
            other => panic!("expected a ride status update, got {other:?}"),
        }
    }
}

fn accept(offer: &RideOffer) -> ValidRideResponse {
    ValidRideResponse {
        offer_id: offer.offer_id,
        ride_id: offer.ride_id,
        accepted: true,
        current_location: None,
    }
}

fn decline(offer: &RideOffer) -> ValidRideResponse {
    ValidRideResponse {
        accepted: false,
        ..accept(offer)
    }
}

async fn wait_published(h: &Harness, routing_key: &str, count: usize) -> Vec<crate::broker::memory::Published> {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let published = h.bus.published_with_key(routing_key);
        if published.len() >= count || tokio::time::Instant::now() >= deadline {
            return published;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn wait_driver_status(h: &Harness, driver_id: Uuid, status: DriverStatus) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if h.drivers.status(driver_id) == Some(status) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

#[tokio::test]
async fn test_ride_runs_from_request_to_completion() {
    let h = Harness::new(fast_config());
    h.start().await;
    let driver = h.online_driver("Aidar", RideType::Economy).await;
    let driver_socket = h.driver_hub.register(driver.id, &h.shutdown);
    let passenger_id = Uuid::now_v7();
    let passenger_socket = h.passenger_hub.register(passenger_id, &h.shutdown);

    let created = h.request_ride(passenger_id, RideType::Economy).await;
    assert_eq!(created.status, RideStatus::Requested);
    assert!(created.ride_number.starts_with("RIDE_"));

    let offer = expect_offer(&driver_socket).await;
    assert_eq!(offer.ride_id, created.ride_id);
    assert_eq!(offer.distance_to_pickup_km, 0.55);
    assert_eq!(
        offer.driver_earnings,
        h.config.driver_earnings(created.estimated_fare)
    );
    assert_eq!(
        h.fleet.respond_to_offer(driver.id, accept(&offer)),
        crate::matching::Resolution::Delivered
    );

    let matched = next_status(&passenger_socket).await;
    assert_eq!(matched.status, RideStatus::Matched);
    assert_eq!(matched.driver_info.map(|d| d.driver_id), Some(driver.id));
    assert!(matched.correlation_id.is_some());
    expect_details(&driver_socket, RideStatus::Matched).await;
    assert_eq!(h.drivers.status(driver.id), Some(DriverStatus::Busy));

    h.fleet
        .start_ride(
            driver.id,
            StartRideRequest {
                ride_id: created.ride_id,
                driver_location: pickup(),
            },
        )
        .await
        .unwrap();
    assert_eq!(next_status(&passenger_socket).await.status, RideStatus::DriverArrived);
    assert_eq!(next_status(&passenger_socket).await.status, RideStatus::InProgress);

    let completed = h
        .fleet
        .complete_ride(
            driver.id,
            CompleteRideRequest {
                ride_id: created.ride_id,
                final_location: destination(),
                actual_distance_km: 3.2,
                actual_duration_minutes: 11.0,
            },
        )
        .await
        .unwrap();
    let done = next_status(&passenger_socket).await;
    assert_eq!(done.status, RideStatus::Completed);
    assert!(done.final_fare.is_some());

    let ride = h.rides.get(created.ride_id).unwrap();
    assert_eq!(ride.status, RideStatus::Completed);
    assert_eq!(ride.driver_id, Some(driver.id));
    assert!(ride.matched_at <= ride.arrived_at && ride.arrived_at <= ride.started_at);
    assert!(ride.started_at <= ride.completed_at);
    assert_eq!(h.drivers.status(driver.id), Some(DriverStatus::Available));
    assert_eq!(
        completed.driver_earnings,
        h.config.driver_earnings(ride.final_fare.unwrap())
    );

    let stats = h.bus.stats("driver_matching");
    assert_eq!((stats.acked, stats.requeued), (1, 0));
}

#[tokio::test]
async fn test_declined_offer_moves_to_next_closest_driver() {
    let h = Harness::new(fast_config());
    h.start().await;
    let near = h.online_driver("Near", RideType::Economy).await;
    let far = h
        .online_driver_at("Far", RideType::Economy, Location::new(43.250, 76.900))
        .await;
    let near_socket = h.driver_hub.register(near.id, &h.shutdown);
    let far_socket = h.driver_hub.register(far.id, &h.shutdown);
    let passenger_id = Uuid::now_v7();

    let created = h.request_ride(passenger_id, RideType::Economy).await;

    let first = expect_offer(&near_socket).await;
    h.fleet.respond_to_offer(near.id, decline(&first));

    let second = expect_offer(&far_socket).await;
    assert_ne!(second.offer_id, first.offer_id);
    h.fleet.respond_to_offer(far.id, accept(&second));

    let ride = h
        .wait_for_status(created.ride_id, RideStatus::Matched, WAIT)
        .await
        .unwrap();
    assert_eq!(ride.driver_id, Some(far.id));
    assert_eq!(h.drivers.status(near.id), Some(DriverStatus::Available));
    assert!(next_frame(&near_socket, QUIET).await.is_none());
}

#[tokio::test]
async fn test_other_ride_types_are_never_offered() {
    let h = Harness::new(DispatchConfigExt::timeout(1));
    h.start().await;
    let driver = h.online_driver("Premium", RideType::Premium).await;
    let socket = h.driver_hub.register(driver.id, &h.shutdown);

    let created = h.request_ride(Uuid::now_v7(), RideType::Economy).await;
    let ride = h
        .wait_for_status(created.ride_id, RideStatus::NoDriver, WAIT)
        .await
        .unwrap();
    assert_eq!(ride.cancellation_reason.as_deref(), Some("no_drivers_available"));
    assert!(next_frame(&socket, QUIET).await.is_none());
}

#[tokio::test]
async fn test_ignored_offer_expires_into_no_driver() {
    let h = Harness::new(DispatchConfigExt::timeout(1));
    h.start().await;
    let driver = h.online_driver("Sleepy", RideType::Economy).await;
    let socket = h.driver_hub.register(driver.id, &h.shutdown);
    let passenger_id = Uuid::now_v7();
    let passenger_socket = h.passenger_hub.register(passenger_id, &h.shutdown);

    let created = h.request_ride(passenger_id, RideType::Economy).await;
    let offer = expect_offer(&socket).await;

    let update = next_status(&passenger_socket).await;
    assert_eq!(update.status, RideStatus::NoDriver);
    assert_eq!(update.ride_id, created.ride_id);
    assert_eq!(h.offers.outstanding(), 0);

    // A reply after the deadline no longer reaches anyone.
    assert_eq!(
        h.fleet.respond_to_offer(driver.id, accept(&offer)),
        crate::matching::Resolution::NotFound
    );
    assert_eq!(h.drivers.status(driver.id), Some(DriverStatus::Available));
    let stats = h.bus.wait_settled("driver_matching", 1, WAIT).await;
    assert_eq!(stats.acked, 1);
}

#[tokio::test]
async fn test_zero_timeout_reports_no_driver_without_offering() {
    let h = Harness::new(DispatchConfigExt::timeout(0));
    h.start().await;
    let driver = h.online_driver("Ready", RideType::Economy).await;
    let socket = h.driver_hub.register(driver.id, &h.shutdown);

    let created = h.request_ride(Uuid::now_v7(), RideType::Economy).await;
    h.wait_for_status(created.ride_id, RideStatus::NoDriver, WAIT)
        .await
        .unwrap();
    assert!(next_frame(&socket, QUIET).await.is_none());
}

#[tokio::test]
async fn test_passenger_cancel_stops_matching() {
    let h = Harness::new(fast_config());
    h.start().await;
    let driver = h.online_driver("Aidar", RideType::Economy).await;
    let socket = h.driver_hub.register(driver.id, &h.shutdown);
    let passenger_id = Uuid::now_v7();

    let created = h.request_ride(passenger_id, RideType::Economy).await;
    let offer = expect_offer(&socket).await;

    let cancelled = h
        .ride_requests
        .cancel(passenger_id, created.ride_id, None)
        .await
        .unwrap();
    assert_eq!(cancelled.status, RideStatus::Cancelled);

    let stats = h.bus.wait_settled("driver_matching", 1, WAIT).await;
    assert_eq!(stats.acked, 1);
    assert_eq!(h.offers.outstanding(), 0);
    assert_ne!(
        h.fleet.respond_to_offer(driver.id, accept(&offer)),
        crate::matching::Resolution::Delivered
    );
    assert!(h.bus.published_with_key(&driver_response_key(created.ride_id)).is_empty());
    assert_eq!(h.drivers.status(driver.id), Some(DriverStatus::Available));
}

#[tokio::test]
async fn test_passenger_cancel_after_match_frees_driver() {
    let h = Harness::new(fast_config());
    h.start().await;
    let driver = h.online_driver("Aidar", RideType::Economy).await;
    let socket = h.driver_hub.register(driver.id, &h.shutdown);
    let passenger_id = Uuid::now_v7();

    let created = h.request_ride(passenger_id, RideType::Economy).await;
    let offer = expect_offer(&socket).await;
    h.fleet.respond_to_offer(driver.id, accept(&offer));
    expect_details(&socket, RideStatus::Matched).await;
    h.wait_for_status(created.ride_id, RideStatus::Matched, WAIT)
        .await
        .unwrap();

    h.ride_requests
        .cancel(passenger_id, created.ride_id, Some("changed plans".into()))
        .await
        .unwrap();

    expect_details(&socket, RideStatus::Cancelled).await;
    assert!(wait_driver_status(&h, driver.id, DriverStatus::Available).await);
    let ride = h.rides.get(created.ride_id).unwrap();
    assert_eq!(ride.driver_id, None);
    assert_eq!(ride.cancellation_reason.as_deref(), Some("changed plans"));
}

#[tokio::test]
async fn test_driver_cancel_cancels_ride() {
    let h = Harness::new(fast_config());
    h.start().await;
    let driver = h.online_driver("Aidar", RideType::Economy).await;
    let socket = h.driver_hub.register(driver.id, &h.shutdown);
    let passenger_id = Uuid::now_v7();

    let created = h.request_ride(passenger_id, RideType::Economy).await;
    let offer = expect_offer(&socket).await;
    h.fleet.respond_to_offer(driver.id, accept(&offer));
    h.wait_for_status(created.ride_id, RideStatus::Matched, WAIT)
        .await
        .unwrap();

    h.fleet
        .cancel_ride(
            driver.id,
            DriverCancelRequest {
                ride_id: created.ride_id,
                reason: None,
            },
        )
        .await
        .unwrap();

    let ride = h
        .wait_for_status(created.ride_id, RideStatus::Cancelled, WAIT)
        .await
        .unwrap();
    assert_eq!(ride.cancellation_reason.as_deref(), Some("driver_cancelled"));
    assert_eq!(h.drivers.status(driver.id), Some(DriverStatus::Available));
}

#[tokio::test]
async fn test_duplicate_driver_response_is_applied_once() {
    let h = Harness::new(fast_config());
    h.start().await;
    let driver = h.online_driver("Aidar", RideType::Economy).await;
    let socket = h.driver_hub.register(driver.id, &h.shutdown);
    let passenger_id = Uuid::now_v7();
    let passenger_socket = h.passenger_hub.register(passenger_id, &h.shutdown);

    let created = h.request_ride(passenger_id, RideType::Economy).await;
    let offer = expect_offer(&socket).await;
    h.fleet.respond_to_offer(driver.id, accept(&offer));
    assert_eq!(next_status(&passenger_socket).await.status, RideStatus::Matched);

    let response = h
        .bus
        .published_with_key(&driver_response_key(created.ride_id))
        .pop()
        .unwrap();
    h.bus
        .publish(
            RIDE_TOPIC,
            &response.routing_key,
            OutgoingMessage::json(&response.json::<serde_json::Value>()).unwrap(),
        )
        .await
        .unwrap();

    let stats = h.bus.wait_settled("driver_responses", 2, WAIT).await;
    assert_eq!((stats.acked, stats.rejected), (2, 0));
    assert!(next_frame(&passenger_socket, QUIET).await.is_none());
    assert!(h.bus.published_with_key("ride.status.CANCELLED").is_empty());
}

#[tokio::test]
async fn test_late_acceptance_of_cancelled_ride_releases_driver() {
    let h = Harness::new(fast_config());
    h.start().await;
    let passenger_id = Uuid::now_v7();
    let created = h.request_ride(passenger_id, RideType::Economy).await;
    h.ride_requests
        .cancel(passenger_id, created.ride_id, None)
        .await
        .unwrap();

    let driver = crate::testing::driver("Late", RideType::Economy);
    let late = rideflow_sdk::objects::DriverResponseMessage {
        ride_id: created.ride_id,
        offer_id: Uuid::now_v7(),
        driver_id: driver.id,
        accepted: true,
        driver_info: driver.info(),
        driver_location: None,
        estimated_arrival_minutes: None,
        correlation_id: None,
        timestamp: OffsetDateTime::now_utc(),
    };
    h.bus
        .publish(
            RIDE_TOPIC,
            &driver_response_key(created.ride_id),
            OutgoingMessage::json(&late).unwrap(),
        )
        .await
        .unwrap();

    let notices = wait_published(&h, "ride.status.CANCELLED", 2).await;
    let release: RideStatusMessage = notices.last().unwrap().json();
    assert_eq!(release.driver_id, Some(driver.id));
    assert_eq!(release.reason.as_deref(), Some("ride_unavailable"));
    assert_eq!(
        h.rides.get(created.ride_id).unwrap().status,
        RideStatus::Cancelled
    );
}

#[tokio::test]
async fn test_lost_acceptance_is_rolled_back_and_retried() {
    let h = Harness::new(fast_config());
    h.start().await;
    let driver = h.online_driver("Aidar", RideType::Economy).await;
    let socket = h.driver_hub.register(driver.id, &h.shutdown);
    let created = h.request_ride(Uuid::now_v7(), RideType::Economy).await;

    let offer = expect_offer(&socket).await;
    h.bus.set_available(false);
    h.fleet.respond_to_offer(driver.id, accept(&offer));

    expect_details(&socket, RideStatus::Cancelled).await;
    let retry = expect_offer(&socket).await;
    assert_eq!(retry.ride_id, created.ride_id);
    assert_eq!(h.drivers.status(driver.id), Some(DriverStatus::Available));
    assert!(h.bus.stats("driver_matching").requeued >= 1);

    h.bus.set_available(true);
    h.fleet.respond_to_offer(driver.id, accept(&retry));
    let ride = h
        .wait_for_status(created.ride_id, RideStatus::Matched, WAIT)
        .await
        .unwrap();
    assert_eq!(ride.driver_id, Some(driver.id));
}

#[tokio::test]
async fn test_broker_outage_cancels_new_ride() {
    let h = Harness::new(fast_config());
    h.start().await;
    h.bus.set_available(false);
    let passenger_id = Uuid::now_v7();

    let err = h
        .ride_requests
        .create(passenger_id, crate::testing::ride_request(RideType::Economy))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        crate::services::RideRequestError::BrokerUnavailable(_)
    ));
    assert!(h.bus.published_with_key("ride.request.ECONOMY").is_empty());

    let stored = h.rides.for_passenger(passenger_id);
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].status, RideStatus::Cancelled);
    assert_eq!(stored[0].cancellation_reason.as_deref(), Some("broker_unavailable"));
    assert!(stored[0].cancelled_at.is_some());

    h.bus.set_available(true);
    let created = h.request_ride(passenger_id, RideType::Economy).await;
    assert_eq!(created.status, RideStatus::Requested);
}

#[tokio::test]
async fn test_cancel_during_outage_still_frees_driver() {
    let h = Harness::new(fast_config());
    h.start().await;
    let driver = h.online_driver("Aidar", RideType::Economy).await;
    let socket = h.driver_hub.register(driver.id, &h.shutdown);
    let passenger_id = Uuid::now_v7();

    let created = h.request_ride(passenger_id, RideType::Economy).await;
    let offer = expect_offer(&socket).await;
    h.fleet.respond_to_offer(driver.id, accept(&offer));
    expect_details(&socket, RideStatus::Matched).await;
    h.wait_for_status(created.ride_id, RideStatus::Matched, WAIT)
        .await
        .unwrap();

    h.bus.set_available(false);
    let cancelled = h
        .ride_requests
        .cancel(passenger_id, created.ride_id, None)
        .await
        .unwrap();
    assert_eq!(cancelled.status, RideStatus::Cancelled);
    assert!(h.bus.published_with_key("ride.status.CANCELLED").is_empty());
    assert_eq!(h.drivers.status(driver.id), Some(DriverStatus::Busy));

    h.bus.set_available(true);
    expect_details(&socket, RideStatus::Cancelled).await;
    assert!(wait_driver_status(&h, driver.id, DriverStatus::Available).await);
    let notices = h.bus.published_with_key("ride.status.CANCELLED");
    assert_eq!(notices.len(), 1);
    let notice: RideStatusMessage = notices[0].json();
    assert_eq!(notice.driver_id, Some(driver.id));
    assert!(
        h.drivers
            .assignments(created.ride_id)
            .iter()
            .all(|a| !a.is_active())
    );
}

#[tokio::test]
async fn test_oversized_matching_budget_is_capped() {
    let h = Harness::new(DispatchConfigExt::timeout(u64::MAX));
    h.start().await;
    let driver = h.online_driver("Aidar", RideType::Economy).await;
    let socket = h.driver_hub.register(driver.id, &h.shutdown);

    let created = h.request_ride(Uuid::now_v7(), RideType::Economy).await;
    let offer = expect_offer(&socket).await;
    let latest_expiry = OffsetDateTime::now_utc()
        + Duration::from_secs(crate::config::MAX_MATCH_TIMEOUT_SECONDS);
    assert!(offer.expires_at <= latest_expiry);

    h.fleet.respond_to_offer(driver.id, accept(&offer));
    let ride = h
        .wait_for_status(created.ride_id, RideStatus::Matched, WAIT)
        .await
        .unwrap();
    assert_eq!(ride.driver_id, Some(driver.id));
    let assignments = h.drivers.assignments(created.ride_id);
    assert_eq!(assignments.len(), 1);
    assert_eq!(assignments[0].driver_id, driver.id);
}

#[tokio::test]
async fn test_driver_positions_reach_the_passenger() {
    let h = Harness::new(fast_config());
    h.start().await;
    let driver = h.online_driver("Aidar", RideType::Economy).await;
    let socket = h.driver_hub.register(driver.id, &h.shutdown);
    let passenger_id = Uuid::now_v7();
    let passenger_socket = h.passenger_hub.register(passenger_id, &h.shutdown);

    let created = h.request_ride(passenger_id, RideType::Economy).await;
    let offer = expect_offer(&socket).await;
    h.fleet.respond_to_offer(driver.id, accept(&offer));
    assert_eq!(next_status(&passenger_socket).await.status, RideStatus::Matched);

    let en_route = Location::new(43.238, 76.888);
    let fix = LocationFix {
        speed_kmh: Some(30.0),
        heading_degrees: Some(45.0),
        ..LocationFix::at(en_route, OffsetDateTime::now_utc())
    };
    h.fleet.report_location(driver.id, fix).await.unwrap();

    match next_frame(&passenger_socket, WAIT).await {
        Some(PassengerServerMessage::DriverLocationUpdate(update)) => {
            assert_eq!(update.ride_id, created.ride_id);
            assert_eq!(update.driver_id, driver.id);
            assert_eq!(update.speed_kmh, Some(30.0));
            assert!(update.distance_to_pickup_km > 0.1);
        }
        other => panic!("expected a driver location update, got {other:?}"),
    }
    assert_eq!(h.drivers.history().last(), Some(&(driver.id, Some(created.ride_id))));

    // Reaching the pickup announces the arrival.
    h.fleet
        .report_location(driver.id, LocationFix::at(pickup(), OffsetDateTime::now_utc()))
        .await
        .unwrap();
    h.wait_for_status(created.ride_id, RideStatus::DriverArrived, WAIT)
        .await
        .unwrap();
    assert_eq!(h.drivers.position(driver.id), Some(pickup()));
}

#[tokio::test]
async fn test_location_for_unknown_ride_is_dropped() {
    let h = Harness::new(fast_config());
    h.start().await;
    let message = LocationMessage {
        driver_id: Uuid::now_v7(),
        ride_id: Uuid::now_v7(),
        location: pickup(),
        speed_kmh: None,
        heading_degrees: None,
        timestamp: OffsetDateTime::now_utc(),
    };
    h.bus
        .publish(
            LOCATION_EXCHANGE,
            LOCATION_ROUTING_KEY,
            OutgoingMessage::json(&message).unwrap().fire_and_forget(),
        )
        .await
        .unwrap();

    let stats = h.bus.wait_settled("location_updates", 1, WAIT).await;
    assert_eq!((stats.acked, stats.rejected), (1, 0));
    assert!(h.routes.is_empty());
}

#[tokio::test]
async fn test_shutdown_requeues_running_match() {
    let h = Harness::new(DispatchConfigExt::timeout(30));
    let engine = h.matching_engine().start().await.unwrap();
    let created = h.request_ride(Uuid::now_v7(), RideType::Economy).await;

    // Let the engine pick the request up and start polling for drivers.
    let deadline = tokio::time::Instant::now() + WAIT;
    while !h.in_flight.is_running(created.ride_id) && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(h.in_flight.is_running(created.ride_id));

    h.shutdown.cancel();
    tokio::time::timeout(WAIT, engine).await.unwrap().unwrap();
    let stats = h.bus.stats("driver_matching");
    assert_eq!((stats.acked, stats.requeued), (0, 1));
}

/// Config shortcuts for matching deadlines.
struct DispatchConfigExt;

impl DispatchConfigExt {
    fn timeout(seconds: u64) -> crate::config::DispatchConfig {
        crate::config::DispatchConfig {
            match_timeout_seconds: seconds,
            ..fast_config()
        }
    }
}
