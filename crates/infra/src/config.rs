//! Runtime settings read from `ECF_*` environment variables.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use ecf_observability::LogFormat;

use crate::external::{Environment, MicroserviceConfig};

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:3000";
pub const DEFAULT_EXPIRY_SWEEP_SECS: u64 = 3600;
pub const DEFAULT_STATUS_POLL_SECS: u64 = 300;
pub const DEFAULT_STATUS_POLL_BATCH: usize = 50;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key}: invalid value '{value}': {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: &'static str, value: &str, reason: impl ToString) -> Self {
        ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub bind_addr: SocketAddr,
    /// Postgres event store when set; in-memory otherwise.
    pub database_url: Option<String>,
    pub microservice: MicroserviceConfig,
    pub expiry_sweep_interval: Duration,
    pub status_poll_interval: Duration,
    pub status_poll_batch: usize,
    pub log_format: LogFormat,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let bind_addr = parse_or("ECF_BIND_ADDR", get("ECF_BIND_ADDR"), DEFAULT_BIND_ADDR)?;

        let environment = match get("ECF_ENVIRONMENT") {
            Some(raw) => raw
                .parse::<Environment>()
                .map_err(|e| ConfigError::invalid("ECF_ENVIRONMENT", &raw, e))?,
            None => Environment::default(),
        };
        let microservice = MicroserviceConfig {
            api_base_url: get("ECF_API_BASE_URL")
                .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key: get("ECF_API_KEY"),
            environment,
        };

        let expiry_secs: u64 = parse_or(
            "ECF_EXPIRY_SWEEP_SECS",
            get("ECF_EXPIRY_SWEEP_SECS"),
            &DEFAULT_EXPIRY_SWEEP_SECS.to_string(),
        )?;
        let poll_secs: u64 = parse_or(
            "ECF_STATUS_POLL_SECS",
            get("ECF_STATUS_POLL_SECS"),
            &DEFAULT_STATUS_POLL_SECS.to_string(),
        )?;
        let status_poll_batch: usize = parse_or(
            "ECF_STATUS_POLL_BATCH",
            get("ECF_STATUS_POLL_BATCH"),
            &DEFAULT_STATUS_POLL_BATCH.to_string(),
        )?;
        for (key, value) in [
            ("ECF_EXPIRY_SWEEP_SECS", expiry_secs),
            ("ECF_STATUS_POLL_SECS", poll_secs),
            ("ECF_STATUS_POLL_BATCH", status_poll_batch as u64),
        ] {
            if value == 0 {
                return Err(ConfigError::invalid(key, "0", "must be greater than zero"));
            }
        }

        let log_format = match get("ECF_LOG_FORMAT") {
            Some(raw) => raw
                .parse::<LogFormat>()
                .map_err(|e| ConfigError::invalid("ECF_LOG_FORMAT", &raw, e))?,
            None => LogFormat::default(),
        };

        Ok(Self {
            bind_addr,
            database_url: get("ECF_DATABASE_URL"),
            microservice,
            expiry_sweep_interval: Duration::from_secs(expiry_secs),
            status_poll_interval: Duration::from_secs(poll_secs),
            status_poll_batch,
            log_format,
        })
    }
}

fn parse_or<T>(key: &'static str, value: Option<String>, default: &str) -> Result<T, ConfigError>
where
    T: core::str::FromStr,
    T::Err: ToString,
{
    let raw = value.unwrap_or_else(|| default.to_string());
    raw.parse::<T>().map_err(|e| ConfigError::invalid(key, &raw, e))
}
