//! Connection settings read from the environment.

use super::ConfigError;
use clap::Args;
use rideflow_core::broker::AmqpSettings;
use sqlx::postgres::PgConnectOptions;

/// `DB_*` variables.
#[derive(Args, Debug, Clone)]
pub struct DatabaseArgs {
    #[arg(id = "db-host", long = "db-host", env = "DB_HOST", default_value = "localhost")]
    pub host: String,

    #[arg(id = "db-port", long = "db-port", env = "DB_PORT", default_value_t = 5432)]
    pub port: u16,

    #[arg(id = "db-user", long = "db-user", env = "DB_USER", default_value = "postgres")]
    pub user: String,

    #[arg(id = "db-password", long = "db-password", env = "DB_PASSWORD", hide_env_values = true, default_value = "")]
    pub password: String,

    #[arg(id = "db-name", long = "db-name", env = "DB_NAME", default_value = "rideflow")]
    pub name: String,
}

impl DatabaseArgs {
    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.name)
    }
}

/// `RABBITMQ_*` variables.
#[derive(Args, Debug, Clone)]
pub struct BrokerArgs {
    #[arg(id = "rabbitmq-host", long = "rabbitmq-host", env = "RABBITMQ_HOST", default_value = "localhost")]
    pub host: String,

    #[arg(id = "rabbitmq-port", long = "rabbitmq-port", env = "RABBITMQ_PORT", default_value_t = 5672)]
    pub port: u16,

    #[arg(id = "rabbitmq-user", long = "rabbitmq-user", env = "RABBITMQ_USER", default_value = "guest")]
    pub user: String,

    #[arg(
        id = "rabbitmq-password", long = "rabbitmq-password",
        env = "RABBITMQ_PASSWORD",
        hide_env_values = true,
        default_value = "guest"
    )]
    pub password: String,

    #[arg(id = "rabbitmq-vhost", long = "rabbitmq-vhost", env = "RABBITMQ_VHOST", default_value = "/")]
    pub vhost: String,
}

impl BrokerArgs {
    pub fn settings(&self) -> Result<AmqpSettings, ConfigError> {
        AmqpSettings::new(&self.host, self.port, &self.user, &self.password, &self.vhost)
            .map_err(|e| ConfigError::BrokerUrl(e.to_string()))
    }
}
