//! `OpenWeatherMap` 5 day / 3 hour forecast response structures
//!
//! Only the fields the pipeline consumes are modelled. Everything is optional
//! on the wire; `list` and `dt` are the only fields whose absence makes the
//! body unusable.

use crate::Result;
use crate::error::SkycastError;
use crate::models::ForecastPoint;
use chrono::DateTime;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ForecastResponse {
    pub list: Option<Vec<ForecastItem>>,
}

#[derive(Debug, Deserialize)]
pub struct ForecastItem {
    /// Unix seconds, UTC
    pub dt: Option<i64>,
    pub main: Option<MainData>,
    pub weather: Option<Vec<Condition>>,
}

#[derive(Debug, Deserialize)]
pub struct MainData {
    pub temp: Option<f64>,
    pub temp_min: Option<f64>,
    pub temp_max: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct Condition {
    pub description: Option<String>,
    pub icon: Option<String>,
}

impl ForecastItem {
    fn into_point(self, index: usize) -> Result<ForecastPoint> {
        let dt = self
            .dt
            .ok_or_else(|| SkycastError::malformed(format!("Forecast item {index} has no dt")))?;
        let timestamp = DateTime::from_timestamp(dt, 0).ok_or_else(|| {
            SkycastError::malformed(format!("Forecast item {index} has invalid dt {dt}"))
        })?;

        let (temperature, temp_min, temp_max) = match self.main {
            Some(main) => (main.temp, main.temp_min, main.temp_max),
            None => (None, None, None),
        };
        let condition = self.weather.and_then(|conditions| conditions.into_iter().next());
        let (description, icon) = match condition {
            Some(condition) => (condition.description, condition.icon),
            None => (None, None),
        };

        Ok(ForecastPoint {
            timestamp,
            temperature,
            temp_min,
            temp_max,
            description,
            icon,
        })
    }
}

impl ForecastResponse {
    /// One point per list item, in provider order
    pub fn into_points(self) -> Result<Vec<ForecastPoint>> {
        let list = self
            .list
            .ok_or_else(|| SkycastError::malformed("Forecast response has no list"))?;

        list.into_iter()
            .enumerate()
            .map(|(index, item)| item.into_point(index))
            .collect()
    }
}
