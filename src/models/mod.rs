//! Data models for skycast
//!
//! - Location: queries, their classification, and geocoding results
//! - Forecast: forecast points, unit systems, and the result envelope

pub mod forecast;
pub mod location;

pub use forecast::{ForecastPoint, UnitSystem, WeatherReport};
pub use location::{LocationQuery, QueryKind, ResolvedLocation};
