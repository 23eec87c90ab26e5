//! Configuration for the orchestration core.
//!
//! Configuration can be set via environment variables:
//! - `GITU_BACKOFF_BASE_SECS` - Optional. Base delay for scheduler retry backoff. Defaults to `30`.
//! - `GITU_BACKOFF_CAP_SECS` - Optional. Upper bound on a single backoff delay. Defaults to `3600`.
//! - `GITU_PLUGIN_TIMEOUT_SECS` - Optional. Wall-clock limit for a plugin execution. Defaults to `30`.
//! - `GITU_TICK_BATCH` - Optional. Maximum tasks claimed per scheduler tick. Defaults to `32`.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Core runtime configuration shared by the scheduler and sandbox runner.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Base delay for exponential retry backoff
    pub backoff_base: Duration,

    /// Cap on a single backoff delay
    pub backoff_cap: Duration,

    /// Hard wall-clock timeout for plugin executions
    pub plugin_timeout: Duration,

    /// Maximum number of due tasks claimed per tick
    pub tick_batch: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            backoff_base: Duration::from_secs(30),
            backoff_cap: Duration::from_secs(3600),
            plugin_timeout: Duration::from_secs(30),
            tick_batch: 32,
        }
    }
}

impl CoreConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            backoff_base: Duration::from_secs(env_u64(
                "GITU_BACKOFF_BASE_SECS",
                defaults.backoff_base.as_secs(),
            )?),
            backoff_cap: Duration::from_secs(env_u64(
                "GITU_BACKOFF_CAP_SECS",
                defaults.backoff_cap.as_secs(),
            )?),
            plugin_timeout: Duration::from_secs(env_u64(
                "GITU_PLUGIN_TIMEOUT_SECS",
                defaults.plugin_timeout.as_secs(),
            )?),
            tick_batch: env_u64("GITU_TICK_BATCH", defaults.tick_batch as u64)? as usize,
        })
    }
}

fn env_u64(key: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}
