//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing.
//! The database URL is wrapped in secrecy::SecretString so it never lands
//! in logs. Routing settings can also come from a TOML file.

pub mod secrets;

use std::path::Path;
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::model::DepartmentId;
use crate::retry::RetryPolicy;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    pub routing: RoutingConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            routing: RoutingConfig::from_env()?,
        })
    }
}

/// Knobs for the routing engine and its storage calls.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Proximity radius in kilometers.
    pub max_distance_km: f64,
    /// Send unroutable complaints to `fallback_department_id`.
    pub use_fallback: bool,
    pub fallback_department_id: Option<DepartmentId>,
    /// Total attempts per storage call, including the first.
    pub retry_attempts: u32,
    /// Delay before the first retry. Doubles each time.
    pub retry_backoff_ms: u64,
    /// Per-attempt timeout for storage calls.
    pub storage_timeout_ms: u64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            max_distance_km: 5.0,
            use_fallback: true,
            fallback_department_id: None,
            retry_attempts: 3,
            retry_backoff_ms: 100,
            storage_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RoutingFile {
    #[serde(default)]
    routing: RoutingConfig,
}

impl RoutingConfig {
    /// Read `ROUTING_*` / `STORAGE_TIMEOUT_MS`, defaulting anything unset.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            max_distance_km: parsed_var("ROUTING_MAX_DISTANCE_KM")?
                .unwrap_or(defaults.max_distance_km),
            use_fallback: parsed_var("ROUTING_USE_FALLBACK")?.unwrap_or(defaults.use_fallback),
            fallback_department_id: parsed_var("ROUTING_FALLBACK_DEPARTMENT_ID")?,
            retry_attempts: parsed_var("ROUTING_RETRY_ATTEMPTS")?
                .unwrap_or(defaults.retry_attempts),
            retry_backoff_ms: parsed_var("ROUTING_RETRY_BACKOFF_MS")?
                .unwrap_or(defaults.retry_backoff_ms),
            storage_timeout_ms: parsed_var("STORAGE_TIMEOUT_MS")?
                .unwrap_or(defaults.storage_timeout_ms),
        }
        .validated()?)
    }

    /// Load the `[routing]` table of a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read routing config {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
            .map_err(|e| Error::Config(format!("bad routing config {}: {e}", path.display())))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let file: RoutingFile =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        file.routing.validated()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts.max(1),
            initial_backoff: Duration::from_millis(self.retry_backoff_ms),
            max_backoff: Duration::from_secs(5),
            timeout: Duration::from_millis(self.storage_timeout_ms),
        }
    }

    fn validated(self) -> Result<Self> {
        if !self.max_distance_km.is_finite() || self.max_distance_km < 0.0 {
            return Err(Error::Config(format!(
                "max_distance_km must be a non-negative number, got {}",
                self.max_distance_km
            )));
        }
        if self.storage_timeout_ms == 0 {
            return Err(Error::Config("storage_timeout_ms must be positive".into()));
        }
        Ok(self)
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

/// Parse an optional variable. Empty counts as unset.
fn parsed_var<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("{name}={raw}: {e}"))),
        Err(_) => Ok(None),
    }
}
