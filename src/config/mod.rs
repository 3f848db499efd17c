//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing,
//! malformed, or combine into unsafe relay settings. The database URL is
//! wrapped in `secrecy::SecretString` so it never shows up in logs.

pub mod secrets;

use crate::error::{Error, Result};
use crate::model::LockId;
use crate::relay::RelayConfig;
use secrecy::SecretString;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    /// Records fetched per sweep.
    pub batch_size: i64,
    /// Age after which a lock is presumed abandoned.
    pub stale_after: Duration,
    pub poll_interval: Duration,
    pub invocation_timeout: Option<Duration>,
    /// Retry cap applied when re-arming failed records.
    pub max_attempts: u32,
    /// Fixed lock token for this worker. None = random per process.
    pub worker_id: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let config = Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            batch_size: parsed_var("OUTBOX_BATCH_SIZE")?.unwrap_or(50),
            stale_after: Duration::from_secs(parsed_var("OUTBOX_STALE_AFTER_SECS")?.unwrap_or(300)),
            poll_interval: Duration::from_millis(
                parsed_var("OUTBOX_POLL_INTERVAL_MS")?.unwrap_or(5000),
            ),
            invocation_timeout: parsed_var("OUTBOX_INVOCATION_TIMEOUT_MS")?
                .map(Duration::from_millis),
            max_attempts: parsed_var("OUTBOX_MAX_ATTEMPTS")?.unwrap_or(3),
            worker_id: std::env::var("OUTBOX_WORKER_ID").ok(),
        };
        config.relay_config().validate()?;
        Ok(config)
    }

    /// Relay settings derived from this configuration.
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            batch_size: self.batch_size,
            stale_after: self.stale_after,
            poll_interval: self.poll_interval,
            invocation_timeout: self.invocation_timeout,
        }
    }

    /// Lock token for this worker.
    pub fn lock_id(&self) -> LockId {
        match &self.worker_id {
            Some(id) => LockId::from(id.as_str()),
            None => LockId::new(),
        }
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

fn parsed_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("invalid value for {name} ({raw:?}): {e}"))),
        Err(_) => Ok(None),
    }
}
