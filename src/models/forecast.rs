//! Forecast points and the pipeline's result envelope

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Countries served in metric units. Everyone else gets imperial.
const METRIC_COUNTRIES: &[&str] = &["CA"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitSystem {
    Metric,
    Imperial,
}

impl UnitSystem {
    /// Looks the country up in a fixed table; absent or unknown countries are
    /// imperial.
    #[must_use]
    pub fn for_country(country_code: Option<&str>) -> Self {
        match country_code {
            Some(code)
                if METRIC_COUNTRIES
                    .iter()
                    .any(|metric| metric.eq_ignore_ascii_case(code.trim())) =>
            {
                UnitSystem::Metric
            }
            _ => UnitSystem::Imperial,
        }
    }

    /// Value of the provider's `units` parameter
    #[must_use]
    pub fn as_param(&self) -> &'static str {
        match self {
            UnitSystem::Metric => "metric",
            UnitSystem::Imperial => "imperial",
        }
    }

    #[must_use]
    pub fn temperature_symbol(&self) -> &'static str {
        match self {
            UnitSystem::Metric => "°C",
            UnitSystem::Imperial => "°F",
        }
    }
}

/// One forecast step. Fields the provider left out stay `None`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ForecastPoint {
    pub timestamp: DateTime<Utc>,
    pub temperature: Option<f64>,
    pub temp_min: Option<f64>,
    pub temp_max: Option<f64>,
    pub description: Option<String>,
    /// Provider icon id, e.g. `01d`
    pub icon: Option<String>,
}

impl ForecastPoint {
    /// Format temperature with unit
    #[must_use]
    pub fn format_temperature(&self, units: UnitSystem) -> String {
        match self.temperature {
            Some(temp) => format!("{temp:.1}{}", units.temperature_symbol()),
            None => "n/a".to_string(),
        }
    }

    /// `low–high` range with unit, if both ends are known
    #[must_use]
    pub fn format_range(&self, units: UnitSystem) -> Option<String> {
        let (min, max) = (self.temp_min?, self.temp_max?);
        let symbol = units.temperature_symbol();
        Some(format!("{min:.1}{symbol} to {max:.1}{symbol}"))
    }
}

/// What a successful lookup hands back to the caller
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct WeatherReport {
    /// Provider order, never re-sorted
    pub forecast: Vec<ForecastPoint>,
    /// Whether `forecast` came from the forecast cache tier
    pub is_from_cache: bool,
    pub postal_code: Option<String>,
    pub country_code: Option<String>,
    pub units: UnitSystem,
}
