//! Forecast provider
//!
//! Fetches the 5 day / 3 hour forecast for a coordinate pair in one unit
//! system. Every call runs inside the retry policy; once the policy gives up
//! the last error is reported as [`SkycastError::Unavailable`].

use crate::Result;
use crate::config::ForecastConfig;
use crate::credentials::ApiKey;
use crate::error::SkycastError;
use crate::http::NetworkClient;
use crate::models::{ForecastPoint, UnitSystem};
use crate::retry::{RetryContext, RetryPolicy};
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

mod openweather;

/// Namespace of the forecast cache tier
pub const CACHE_NAMESPACE: &str = "forecast";

pub struct ForecastProvider {
    http: Arc<dyn NetworkClient>,
    api_key: ApiKey,
    endpoint: String,
    units: UnitSystem,
    retry: RetryPolicy,
}

impl ForecastProvider {
    pub fn new(
        http: Arc<dyn NetworkClient>,
        api_key: ApiKey,
        config: &ForecastConfig,
        units: UnitSystem,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            http,
            api_key,
            endpoint: format!("{}/forecast", config.base_url.trim_end_matches('/')),
            units,
            retry,
        }
    }

    #[must_use]
    pub fn units(&self) -> UnitSystem {
        self.units
    }

    /// Forecast points in provider order
    #[instrument(skip(self), fields(units = self.units.as_param()))]
    pub async fn forecast(&self, latitude: f64, longitude: f64) -> Result<Vec<ForecastPoint>> {
        info!("Fetching forecast for ({latitude}, {longitude})");
        let params = vec![
            ("lat".to_string(), latitude.to_string()),
            ("lon".to_string(), longitude.to_string()),
            ("appid".to_string(), self.api_key.expose().to_string()),
            ("units".to_string(), self.units.as_param().to_string()),
        ];

        let points = self
            .retry
            .run(|context| self.forecast_once(&params, context))
            .await
            .map_err(|e| {
                error!(error = %e, "Forecast request failed");
                match e {
                    SkycastError::Unavailable { .. } => e,
                    other => SkycastError::unavailable(other.to_string()),
                }
            })?;

        debug!(points = points.len(), "Forecast received");
        Ok(points)
    }

    async fn forecast_once(
        &self,
        params: &[(String, String)],
        context: RetryContext,
    ) -> Result<Vec<ForecastPoint>> {
        debug!(
            attempt = context.attempt,
            max_attempts = context.max_attempts,
            "Calling forecast provider"
        );
        let response = self.http.get(&self.endpoint, params).await?;

        if !response.is_success() {
            return Err(SkycastError::upstream(
                response.status,
                "Forecast request failed",
            ));
        }

        let parsed: openweather::ForecastResponse =
            serde_json::from_str(&response.body).map_err(|e| {
                SkycastError::malformed(format!("Failed to parse forecast response: {e}"))
            })?;

        parsed.into_points()
    }
}
