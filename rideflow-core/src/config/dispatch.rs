//! Matching and lifecycle tuning.

use rust_decimal::Decimal;
use std::time::Duration;

/// Longest matching budget a ride request may ask for.
pub const MAX_MATCH_TIMEOUT_SECONDS: u64 = 600;

/// Tunables of the dispatch core.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchConfig {
    /// Search radius around the pickup when the request does not carry one.
    pub max_distance_km: f64,
    /// Matching budget stamped on every published ride request.
    pub match_timeout_seconds: u64,
    /// How often the matcher re-reads the fleet while no driver is eligible.
    pub candidate_poll_ms: u64,
    /// Distance to the pickup under which a driver counts as arrived.
    pub arrival_radius_m: f64,
    /// Share of the fare paid out to the driver.
    pub driver_share: Decimal,
    /// Connection attempts before startup gives up on the database.
    pub max_db_retries: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_distance_km: 5.0,
            match_timeout_seconds: 30,
            candidate_poll_ms: 1000,
            arrival_radius_m: 100.0,
            driver_share: Decimal::new(8, 1),
            max_db_retries: 5,
        }
    }
}

impl DispatchConfig {
    /// Matching budget for a request asking for `timeout_seconds`, capped at
    /// [`MAX_MATCH_TIMEOUT_SECONDS`].
    pub fn match_budget(timeout_seconds: u64) -> Duration {
        Duration::from_secs(timeout_seconds.min(MAX_MATCH_TIMEOUT_SECONDS))
    }

    pub fn candidate_poll_interval(&self) -> Duration {
        Duration::from_millis(self.candidate_poll_ms.max(1))
    }

    /// Driver payout for `fare`, rounded to cents.
    pub fn driver_earnings(&self, fare: Decimal) -> Decimal {
        (fare * self.driver_share).round_dp(2)
    }
}
