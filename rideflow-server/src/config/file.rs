//! TOML tuning file structures.
//!
//! Every key is optional. A missing section or key keeps the built-in default.
//!
//! ```toml
//! [dispatch]
//! max_distance_km = 5.0
//! match_timeout_seconds = 30
//! driver_share = "0.8"
//!
//! [pricing.premium]
//! base = "800"
//! per_km = "150"
//! ```

use rideflow_core::config::{DispatchConfig, RideTypePricing};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Root of the tuning file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub dispatch: DispatchSection,
    #[serde(default)]
    pub pricing: PricingSection,
}

/// `[dispatch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSection {
    pub max_distance_km: f64,
    pub match_timeout_seconds: u64,
    pub candidate_poll_ms: u64,
    pub arrival_radius_m: f64,
    pub driver_share: Decimal,
    pub max_db_retries: u32,
}

impl Default for DispatchSection {
    fn default() -> Self {
        let defaults = DispatchConfig::default();
        Self {
            max_distance_km: defaults.max_distance_km,
            match_timeout_seconds: defaults.match_timeout_seconds,
            candidate_poll_ms: defaults.candidate_poll_ms,
            arrival_radius_m: defaults.arrival_radius_m,
            driver_share: defaults.driver_share,
            max_db_retries: defaults.max_db_retries,
        }
    }
}

impl From<DispatchSection> for DispatchConfig {
    fn from(section: DispatchSection) -> Self {
        DispatchConfig {
            max_distance_km: section.max_distance_km,
            match_timeout_seconds: section.match_timeout_seconds,
            candidate_poll_ms: section.candidate_poll_ms,
            arrival_radius_m: section.arrival_radius_m,
            driver_share: section.driver_share,
            max_db_retries: section.max_db_retries,
        }
    }
}

/// `[pricing.<ride_type>]` sections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PricingSection {
    #[serde(default)]
    pub economy: Option<PricingEntry>,
    #[serde(default)]
    pub premium: Option<PricingEntry>,
    #[serde(default)]
    pub xl: Option<PricingEntry>,
}

/// Overrides for one ride type. Absent keys keep that type's default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PricingEntry {
    #[serde(default)]
    pub base: Option<Decimal>,
    #[serde(default)]
    pub per_km: Option<Decimal>,
    #[serde(default)]
    pub per_minute: Option<Decimal>,
    #[serde(default)]
    pub average_speed_kmh: Option<f64>,
}

impl PricingEntry {
    pub fn apply(&self, mut pricing: RideTypePricing) -> RideTypePricing {
        if let Some(base) = self.base {
            pricing.base = base;
        }
        if let Some(per_km) = self.per_km {
            pricing.per_km = per_km;
        }
        if let Some(per_minute) = self.per_minute {
            pricing.per_minute = per_minute;
        }
        if let Some(speed) = self.average_speed_kmh {
            pricing.average_speed_kmh = speed;
        }
        pricing
    }
}
