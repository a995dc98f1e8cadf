//! Configuration module for rideflow-server.
//!
//! Connection settings come from the environment (see [`env`]). Dispatch and
//! pricing tuning comes from an optional TOML file (see [`file`]).

pub mod env;
pub mod file;

use crate::config::file::FileConfig;
use rideflow_core::config::{
    DispatchConfig, MAX_MATCH_TIMEOUT_SECONDS, PricingTable, RideTypePricing,
};
use rust_decimal::Decimal;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("invalid RabbitMQ settings: {0}")]
    BrokerUrl(String),

    #[error("validation error: {0}")]
    ValidationError(String),
}

/// Validated tuning of a service.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tuning {
    pub dispatch: DispatchConfig,
    pub pricing: PricingTable,
}

/// Reads the optional tuning file.
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new(config_path: Option<&Path>) -> Self {
        Self {
            config_path: config_path.map(Path::to_path_buf),
        }
    }

    /// Load and validate the tuning. Without a file every default applies.
    pub fn load(&self) -> Result<Tuning, ConfigError> {
        let file_config = match &self.config_path {
            Some(path) => {
                let content = std::fs::read_to_string(path)?;
                toml::from_str(&content)?
            }
            None => FileConfig::default(),
        };
        build_tuning(file_config)
    }
}

fn build_tuning(file_config: FileConfig) -> Result<Tuning, ConfigError> {
    let dispatch = DispatchConfig::from(file_config.dispatch);
    validate_dispatch(&dispatch)?;

    let defaults = PricingTable::default();
    let pricing = PricingTable {
        economy: apply_pricing(file_config.pricing.economy.as_ref(), defaults.economy),
        premium: apply_pricing(file_config.pricing.premium.as_ref(), defaults.premium),
        xl: apply_pricing(file_config.pricing.xl.as_ref(), defaults.xl),
    };
    for (name, entry) in [
        ("economy", &pricing.economy),
        ("premium", &pricing.premium),
        ("xl", &pricing.xl),
    ] {
        validate_pricing(name, entry)?;
    }

    Ok(Tuning { dispatch, pricing })
}

fn apply_pricing(
    entry: Option<&file::PricingEntry>,
    defaults: RideTypePricing,
) -> RideTypePricing {
    match entry {
        Some(entry) => entry.apply(defaults),
        None => defaults,
    }
}

fn validate_dispatch(dispatch: &DispatchConfig) -> Result<(), ConfigError> {
    if !(dispatch.max_distance_km.is_finite() && dispatch.max_distance_km > 0.0) {
        return Err(ConfigError::ValidationError(
            "dispatch.max_distance_km must be positive".into(),
        ));
    }
    if !(dispatch.arrival_radius_m.is_finite() && dispatch.arrival_radius_m >= 0.0) {
        return Err(ConfigError::ValidationError(
            "dispatch.arrival_radius_m must not be negative".into(),
        ));
    }
    if dispatch.driver_share <= Decimal::ZERO || dispatch.driver_share > Decimal::ONE {
        return Err(ConfigError::ValidationError(
            "dispatch.driver_share must be within (0, 1]".into(),
        ));
    }
    if dispatch.match_timeout_seconds > MAX_MATCH_TIMEOUT_SECONDS {
        return Err(ConfigError::ValidationError(format!(
            "dispatch.match_timeout_seconds must not exceed {MAX_MATCH_TIMEOUT_SECONDS}"
        )));
    }
    if dispatch.candidate_poll_ms == 0 {
        return Err(ConfigError::ValidationError(
            "dispatch.candidate_poll_ms must be positive".into(),
        ));
    }
    if dispatch.max_db_retries == 0 {
        return Err(ConfigError::ValidationError(
            "dispatch.max_db_retries must be at least 1".into(),
        ));
    }
    Ok(())
}

fn validate_pricing(name: &str, pricing: &RideTypePricing) -> Result<(), ConfigError> {
    if pricing.base.is_sign_negative()
        || pricing.per_km.is_sign_negative()
        || pricing.per_minute.is_sign_negative()
    {
        return Err(ConfigError::ValidationError(format!(
            "pricing.{name}: coefficients must not be negative"
        )));
    }
    if !(pricing.average_speed_kmh.is_finite() && pricing.average_speed_kmh > 0.0) {
        return Err(ConfigError::ValidationError(format!(
            "pricing.{name}.average_speed_kmh must be positive"
        )));
    }
    Ok(())
}
