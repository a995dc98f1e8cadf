//! Fare coefficients per vehicle class.

use rideflow_sdk::objects::RideType;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;

/// Coefficients of `base + per_km * km + per_minute * minutes`.
#[derive(Debug, Clone, PartialEq)]
pub struct RideTypePricing {
    pub base: Decimal,
    pub per_km: Decimal,
    pub per_minute: Decimal,
    pub average_speed_kmh: f64,
}

impl RideTypePricing {
    pub fn new(base: i64, per_km: i64, per_minute: i64) -> Self {
        Self {
            base: Decimal::from(base),
            per_km: Decimal::from(per_km),
            per_minute: Decimal::from(per_minute),
            average_speed_kmh: 40.0,
        }
    }

    /// Fare for a trip of `distance_km` lasting `duration_minutes`, rounded to cents.
    pub fn fare(&self, distance_km: f64, duration_minutes: f64) -> Decimal {
        let km = Decimal::from_f64(distance_km.max(0.0)).unwrap_or_default();
        let minutes = Decimal::from_f64(duration_minutes.max(0.0)).unwrap_or_default();
        (self.base + self.per_km * km + self.per_minute * minutes).round_dp(2)
    }

    /// Driving time at the class' average speed, in minutes.
    pub fn duration_minutes(&self, distance_km: f64) -> f64 {
        if self.average_speed_kmh <= 0.0 {
            return 0.0;
        }
        distance_km.max(0.0) / self.average_speed_kmh * 60.0
    }

    pub fn estimate(&self, distance_km: f64) -> TripEstimate {
        let minutes = self.duration_minutes(distance_km);
        let rounded_minutes = minutes.ceil().clamp(0.0, u32::MAX as f64) as u32;
        TripEstimate {
            distance_km: (distance_km * 100.0).round() / 100.0,
            duration_minutes: rounded_minutes,
            fare: self.fare(distance_km, minutes),
        }
    }
}

/// Up-front estimate quoted to the passenger.
#[derive(Debug, Clone, PartialEq)]
pub struct TripEstimate {
    pub distance_km: f64,
    pub duration_minutes: u32,
    pub fare: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PricingTable {
    pub economy: RideTypePricing,
    pub premium: RideTypePricing,
    pub xl: RideTypePricing,
}

impl Default for PricingTable {
    fn default() -> Self {
        Self {
            economy: RideTypePricing::new(500, 100, 50),
            premium: RideTypePricing::new(800, 150, 75),
            xl: RideTypePricing::new(1000, 200, 100),
        }
    }
}

impl PricingTable {
    pub fn for_type(&self, ride_type: RideType) -> &RideTypePricing {
        match ride_type {
            RideType::Economy => &self.economy,
            RideType::Premium => &self.premium,
            RideType::Xl => &self.xl,
        }
    }
}
