use ::config::{Config, Environment};
use serde::Deserialize;
use std::num::NonZeroUsize;

use crate::error::ConfigError;

/// Default capacity of the async command queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Prefix of the environment variables read by [`BusConfig::from_env`]
pub const ENV_PREFIX: &str = "COMMAND_BUS";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BusConfig {
    /// Number of worker threads draining the async queue
    pub pool_size: usize,
    /// Number of async commands that can wait in the queue before
    /// `handle_async` blocks
    pub queue_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl BusConfig {
    /// Defaults overridden by `COMMAND_BUS_POOL_SIZE` and
    /// `COMMAND_BUS_QUEUE_CAPACITY`
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let config: Self = Config::builder()
            .set_default("pool_size", defaults.pool_size as u64)?
            .set_default("queue_capacity", defaults.queue_capacity as u64)?
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "pool_size".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Number of available logical processors, falling back to one
pub fn default_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}
