//! Runtime configuration shared by both services.
//!
//! These are validated values. Parsing the optional TOML tuning file and the
//! environment is handled by the server crate.

mod dispatch;
mod pricing;

pub use dispatch::{DispatchConfig, MAX_MATCH_TIMEOUT_SECONDS};
pub use pricing::{PricingTable, RideTypePricing, TripEstimate};
