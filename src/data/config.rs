use std::env;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub const ENV_DELIVERY: &str = "DOCNOTIFY_DELIVERY";
pub const ENV_LOG_CAPACITY: &str = "DOCNOTIFY_LOG_CAPACITY";

/// Default delivery for listeners registered without an explicit queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Run listeners on the thread that committed the write
    Synchronous,
    /// Run listeners on the database's main delivery queue
    #[default]
    Queued,
}

impl FromStr for DeliveryMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sync" | "synchronous" => Ok(DeliveryMode::Synchronous),
            "queued" | "async" => Ok(DeliveryMode::Queued),
            other => Err(Error::Config(format!("Unknown delivery mode: '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub delivery: DeliveryMode,
    /// Number of mutation log entries kept in memory
    pub mutation_log_capacity: usize,
    /// Thread name of the main delivery queue
    pub queue_name: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            delivery: DeliveryMode::Queued,
            mutation_log_capacity: 1024,
            queue_name: "docnotify-main".to_string(),
        }
    }
}

impl DatabaseConfig {
    pub fn synchronous() -> Self {
        DatabaseConfig {
            delivery: DeliveryMode::Synchronous,
            ..Default::default()
        }
    }

    /// Parse a JSON config. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: DatabaseConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `DOCNOTIFY_DELIVERY` and `DOCNOTIFY_LOG_CAPACITY`.
    ///
    /// Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        let mut config = DatabaseConfig::default();

        if let Ok(value) = env::var(ENV_DELIVERY) {
            match value.parse::<DeliveryMode>() {
                Ok(mode) => config.delivery = mode,
                Err(e) => log::warn!("Ignoring {}: {}", ENV_DELIVERY, e),
            }
        }

        if let Ok(value) = env::var(ENV_LOG_CAPACITY) {
            match value.trim().parse::<usize>() {
                Ok(capacity) if capacity > 0 => config.mutation_log_capacity = capacity,
                _ => log::warn!("Ignoring {}: '{}' is not a positive integer", ENV_LOG_CAPACITY, value),
            }
        }

        config
    }

    pub fn validate(&self) -> Result<()> {
        if self.mutation_log_capacity == 0 {
            return Err(Error::Config("mutation_log_capacity must be positive".to_string()));
        }
        if self.queue_name.trim().is_empty() {
            return Err(Error::Config("queue_name must not be empty".to_string()));
        }
        Ok(())
    }
}
