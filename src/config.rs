//! Runtime configuration.

use std::env;
use std::time::Duration;

use thiserror::Error;

pub const PREPARE_TIMEOUT_VAR: &str = "TPC_PREPARE_TIMEOUT_MS";
pub const REQUEST_TIMEOUT_VAR: &str = "TPC_REQUEST_TIMEOUT_MS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key}: invalid value '{value}', expected a positive number of milliseconds")]
    InvalidDuration { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Deadline for the whole prepare phase, measured from the start of a transaction.
    pub prepare_timeout: Duration,
    /// Upper bound on any single remote participant call.
    pub request_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            prepare_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(5),
        }
    }
}

impl Config {
    /// Defaults overridden by `TPC_PREPARE_TIMEOUT_MS` and `TPC_REQUEST_TIMEOUT_MS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Config::default();
        if let Some(value) = lookup(PREPARE_TIMEOUT_VAR) {
            config.prepare_timeout = parse_millis(PREPARE_TIMEOUT_VAR, value)?;
        }
        if let Some(value) = lookup(REQUEST_TIMEOUT_VAR) {
            config.request_timeout = parse_millis(REQUEST_TIMEOUT_VAR, value)?;
        }
        Ok(config)
    }
}

fn parse_millis(key: &'static str, value: String) -> Result<Duration, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(ms) if ms > 0 => Ok(Duration::from_millis(ms)),
        _ => Err(ConfigError::InvalidDuration { key, value }),
    }
}
