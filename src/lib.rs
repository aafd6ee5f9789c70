//! `skycast` - postal code or address to short-term weather forecast
//!
//! A query is geocoded, the forecast for the resolved coordinates is fetched
//! in the country's unit system, and both lookups sit behind their own cache
//! tier and retry policy. [`WeatherOrchestrator`] ties the stages together and
//! classifies every failure.

pub mod cache;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod error;
pub mod http;
pub mod location_resolver;
pub mod logging;
pub mod models;
pub mod orchestrator;
pub mod retry;
pub mod weather;

#[cfg(test)]
mod test_support;

// Re-export core types for public API
pub use cache::{CacheStore, CacheTier};
pub use config::SkycastConfig;
pub use error::SkycastError;
pub use location_resolver::LocationResolver;
pub use models::{ForecastPoint, ResolvedLocation, UnitSystem, WeatherReport};
pub use orchestrator::{FailureKind, FetchOptions, Stage, WeatherFailure, WeatherOrchestrator};
pub use retry::RetryPolicy;
pub use weather::ForecastProvider;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Core result type used throughout the library
pub type Result<T> = std::result::Result<T, SkycastError>;
