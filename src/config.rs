//! Configuration management for `skycast`
//!
//! Handles loading configuration from files and environment variables
//! and validates every setting before the pipeline is built.

use crate::Result;
use crate::error::SkycastError;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SkycastConfig {
    #[serde(default)]
    pub geocoding: GeocodingConfig,
    #[serde(default)]
    pub forecast: ForecastConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub request: RequestConfig,
}

/// Geocoding API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeocodingConfig {
    #[serde(default = "default_geocoding_base_url")]
    pub base_url: String,
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u32,
    /// Country paired with bare postal codes
    #[serde(default = "default_country")]
    pub default_country: String,
    #[serde(default = "default_geocoding_ttl_hours")]
    pub cache_ttl_hours: u32,
}

/// Forecast API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastConfig {
    #[serde(default = "default_forecast_base_url")]
    pub base_url: String,
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u32,
    #[serde(default = "default_forecast_ttl_minutes")]
    pub cache_ttl_minutes: u32,
}

/// Retry loop settings shared by both lookups
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total invocations, first attempt included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Backoff time unit; the n-th retry waits `2^n` units
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Treat undecodable bodies as transient
    #[serde(default = "default_retry_malformed_body")]
    pub retry_malformed_body: bool,
}

/// Cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// `memory` or `persistent`
    #[serde(default = "default_cache_backend")]
    pub backend: String,
    /// Directory for the persistent backend
    #[serde(default = "default_cache_location")]
    pub location: String,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (pretty or json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Per-request limits
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RequestConfig {
    /// Upper bound on one whole lookup; unset means no deadline
    #[serde(default)]
    pub deadline_seconds: Option<u32>,
}

// Default value functions
fn default_geocoding_base_url() -> String {
    "https://maps.googleapis.com/maps/api/geocode/json".to_string()
}

fn default_forecast_base_url() -> String {
    "https://api.openweathermap.org/data/2.5".to_string()
}

fn default_timeout() -> u32 {
    10
}

fn default_country() -> String {
    "US".to_string()
}

fn default_geocoding_ttl_hours() -> u32 {
    // one month
    30 * 24
}

fn default_forecast_ttl_minutes() -> u32 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_retry_malformed_body() -> bool {
    true
}

fn default_cache_backend() -> String {
    "memory".to_string()
}

fn default_cache_location() -> String {
    dirs::cache_dir()
        .map(|dir| dir.join("skycast"))
        .unwrap_or_else(|| PathBuf::from(".skycast-cache"))
        .to_string_lossy()
        .into_owned()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for GeocodingConfig {
    fn default() -> Self {
        Self {
            base_url: default_geocoding_base_url(),
            timeout_seconds: default_timeout(),
            default_country: default_country(),
            cache_ttl_hours: default_geocoding_ttl_hours(),
        }
    }
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            base_url: default_forecast_base_url(),
            timeout_seconds: default_timeout(),
            cache_ttl_minutes: default_forecast_ttl_minutes(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            retry_malformed_body: default_retry_malformed_body(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: default_cache_backend(),
            location: default_cache_location(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl GeocodingConfig {
    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(u64::from(self.cache_ttl_hours) * 60 * 60)
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.into())
    }
}

impl ForecastConfig {
    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(u64::from(self.cache_ttl_minutes) * 60)
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.into())
    }
}

impl RequestConfig {
    #[must_use]
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_seconds
            .map(|secs| Duration::from_secs(secs.into()))
    }
}

impl SkycastConfig {
    /// Load configuration from file and environment variables
    pub fn load() -> Result<Self> {
        Self::load_from_path(None)
    }

    /// Load configuration from specified path
    pub fn load_from_path(config_path: Option<PathBuf>) -> Result<Self> {
        let mut builder = Config::builder();

        // Load from file if path is provided or use default location
        let config_file = config_path.unwrap_or_else(|| {
            Self::get_config_path().unwrap_or_else(|| PathBuf::from("config.toml"))
        });

        if config_file.exists() {
            builder = builder.add_source(
                File::from(config_file.clone())
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        // SKYCAST_RETRY__MAX_ATTEMPTS=5 and the like
        builder = builder.add_source(
            Environment::with_prefix("SKYCAST")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let settings = builder
            .build()
            .map_err(|e| SkycastError::config(format!("Failed to build configuration: {e}")))?;

        let mut config: SkycastConfig = settings.try_deserialize().map_err(|e| {
            SkycastError::config(format!("Failed to deserialize configuration: {e}"))
        })?;

        config.apply_defaults();
        config.validate()?;

        Ok(config)
    }

    /// Get the default configuration file path
    #[must_use]
    pub fn get_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("skycast").join("config.toml"))
    }

    /// Apply default values to empty or zeroed fields
    pub fn apply_defaults(&mut self) {
        if self.geocoding.base_url.is_empty() {
            self.geocoding.base_url = default_geocoding_base_url();
        }
        if self.geocoding.timeout_seconds == 0 {
            self.geocoding.timeout_seconds = default_timeout();
        }
        if self.geocoding.default_country.trim().is_empty() {
            self.geocoding.default_country = default_country();
        }
        if self.forecast.base_url.is_empty() {
            self.forecast.base_url = default_forecast_base_url();
        }
        if self.forecast.timeout_seconds == 0 {
            self.forecast.timeout_seconds = default_timeout();
        }
        if self.retry.max_attempts == 0 {
            self.retry.max_attempts = default_max_attempts();
        }
        if self.cache.backend.is_empty() {
            self.cache.backend = default_cache_backend();
        }
        if self.cache.location.is_empty() {
            self.cache.location = default_cache_location();
        }
        if self.logging.level.is_empty() {
            self.logging.level = default_log_level();
        }
        if self.logging.format.is_empty() {
            self.logging.format = default_log_format();
        }
    }

    /// Validate all configuration settings
    pub fn validate(&self) -> Result<()> {
        self.validate_numeric_ranges()?;
        self.validate_string_values()?;
        Ok(())
    }

    fn validate_numeric_ranges(&self) -> Result<()> {
        if self.geocoding.timeout_seconds > 300 || self.forecast.timeout_seconds > 300 {
            return Err(SkycastError::config(
                "Upstream timeout cannot exceed 300 seconds",
            ));
        }

        if self.retry.max_attempts > 10 {
            return Err(SkycastError::config("Retry max attempts cannot exceed 10"));
        }

        if self.retry.base_delay_ms > 60_000 {
            return Err(SkycastError::config(
                "Retry base delay cannot exceed 60000 ms",
            ));
        }

        if self.geocoding.cache_ttl_hours == 0 || self.forecast.cache_ttl_minutes == 0 {
            return Err(SkycastError::config("Cache TTLs must be positive"));
        }

        if self.request.deadline_seconds == Some(0) {
            return Err(SkycastError::config(
                "Request deadline must be positive when set",
            ));
        }

        Ok(())
    }

    fn validate_string_values(&self) -> Result<()> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.logging.level.as_str()) {
            return Err(SkycastError::config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            )));
        }

        let valid_log_formats = ["pretty", "json"];
        if !valid_log_formats.contains(&self.logging.format.as_str()) {
            return Err(SkycastError::config(format!(
                "Invalid log format '{}'. Must be one of: {}",
                self.logging.format,
                valid_log_formats.join(", ")
            )));
        }

        let valid_backends = ["memory", "persistent"];
        if !valid_backends.contains(&self.cache.backend.as_str()) {
            return Err(SkycastError::config(format!(
                "Invalid cache backend '{}'. Must be one of: {}",
                self.cache.backend,
                valid_backends.join(", ")
            )));
        }

        for (name, url) in [
            ("Geocoding", &self.geocoding.base_url),
            ("Forecast", &self.forecast.base_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(SkycastError::config(format!(
                    "{name} API base URL must be a valid HTTP or HTTPS URL"
                )));
            }
        }

        let country = self.geocoding.default_country.trim();
        if country.len() != 2 || !country.bytes().all(|b| b.is_ascii_alphabetic()) {
            return Err(SkycastError::config(format!(
                "Default country '{country}' must be a two-letter country code"
            )));
        }

        Ok(())
    }
}
