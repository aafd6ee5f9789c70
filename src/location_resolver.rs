//! Location Resolution Module
//!
//! Turns a free-form query (postal code or address) into a
//! [`ResolvedLocation`] through the geocoding provider. Results are cached in
//! the geocode tier under a key built from the query's classification and its
//! normalized text; the upstream call itself runs inside the retry policy.

use crate::Result;
use crate::cache::CacheTier;
use crate::config::GeocodingConfig;
use crate::credentials::ApiKey;
use crate::error::SkycastError;
use crate::http::NetworkClient;
use crate::models::{LocationQuery, QueryKind, ResolvedLocation};
use crate::retry::{RetryContext, RetryPolicy};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Namespace of the geocode cache tier
pub const CACHE_NAMESPACE: &str = "geocode";

/// What to send upstream and where to cache it
#[derive(Debug, PartialEq, Eq)]
struct Lookup {
    cache_suffix: String,
    address: String,
}

impl Lookup {
    fn new(query: &LocationQuery, country: &str) -> Self {
        match query.kind() {
            QueryKind::PostalCode => {
                let zip = query.raw().trim();
                let country = country.trim();
                Self {
                    cache_suffix: format!(
                        "{}:{zip},{}",
                        query.kind().as_str(),
                        country.to_lowercase()
                    ),
                    address: format!("{zip},{}", country.to_uppercase()),
                }
            }
            QueryKind::Address => Self {
                cache_suffix: format!("{}:{}", query.kind().as_str(), query.normalized()),
                address: query.raw().trim().to_string(),
            },
        }
    }
}

/// Service for resolving location queries
pub struct LocationResolver {
    http: Arc<dyn NetworkClient>,
    api_key: ApiKey,
    base_url: String,
    default_country: String,
    retry: RetryPolicy,
    cache: CacheTier,
}

impl LocationResolver {
    pub fn new(
        http: Arc<dyn NetworkClient>,
        api_key: ApiKey,
        config: &GeocodingConfig,
        retry: RetryPolicy,
        cache: CacheTier,
    ) -> Self {
        Self {
            http,
            api_key,
            base_url: config.base_url.clone(),
            default_country: config.default_country.clone(),
            retry,
            cache,
        }
    }

    /// Resolve a query, pairing bare postal codes with the default country
    pub async fn resolve(&self, query: &str, skip_cache: bool) -> Result<ResolvedLocation> {
        self.resolve_in_country(query, &self.default_country, skip_cache)
            .await
    }

    /// Resolve a query, pairing bare postal codes with `country`
    #[instrument(skip(self))]
    pub async fn resolve_in_country(
        &self,
        query: &str,
        country: &str,
        skip_cache: bool,
    ) -> Result<ResolvedLocation> {
        let query = LocationQuery::parse(query);
        if query.is_empty() {
            return Err(SkycastError::invalid_query("Location cannot be empty"));
        }

        let lookup = Lookup::new(&query, country);
        debug!(
            kind = ?query.kind(),
            key = %self.cache.key(&lookup.cache_suffix),
            "Resolving location"
        );

        let cached = self
            .cache
            .fetch(&lookup.cache_suffix, skip_cache, || self.geocode(&lookup.address))
            .await?;

        let location = cached.value;
        debug!(
            from_cache = cached.was_cache_hit,
            postal_code = ?location.postal_code,
            country_code = ?location.country_code,
            "Resolved location at ({}, {})",
            location.latitude,
            location.longitude
        );
        Ok(location)
    }

    /// Full geocode-tier key for `query` in `country`
    #[must_use]
    pub fn cache_key(&self, query: &str, country: &str) -> String {
        let lookup = Lookup::new(&LocationQuery::parse(query), country);
        self.cache.key(&lookup.cache_suffix)
    }

    async fn geocode(&self, address: &str) -> Result<ResolvedLocation> {
        info!("Fetching geocode for {address}");
        let params = vec![
            ("address".to_string(), address.to_string()),
            ("key".to_string(), self.api_key.expose().to_string()),
        ];

        self.retry
            .run(|context| self.geocode_once(address, &params, context))
            .await
    }

    async fn geocode_once(
        &self,
        address: &str,
        params: &[(String, String)],
        context: RetryContext,
    ) -> Result<ResolvedLocation> {
        debug!(attempt = context.attempt, max_attempts = context.max_attempts, "Calling geocoder");
        let response = self.http.get(&self.base_url, params).await?;

        if !response.is_success() {
            return Err(SkycastError::upstream(
                response.status,
                "Geocoding request failed",
            ));
        }

        let parsed: google::GeocodeResponse =
            serde_json::from_str(&response.body).map_err(|e| {
                SkycastError::malformed(format!("Failed to parse geocoding response: {e}"))
            })?;

        parsed.into_location(address)
    }
}

/// Google Geocoding API response structures, only the consumed fields
mod google {
    use super::{ResolvedLocation, Result, SkycastError};
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    pub struct GeocodeResponse {
        pub status: Option<String>,
        #[serde(default)]
        pub results: Vec<GeocodeResult>,
        pub error_message: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct GeocodeResult {
        #[serde(default)]
        pub address_components: Vec<AddressComponent>,
        pub geometry: Option<Geometry>,
    }

    #[derive(Debug, Deserialize)]
    pub struct AddressComponent {
        pub short_name: Option<String>,
        #[serde(default)]
        pub types: Vec<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Geometry {
        pub location: Option<LatLng>,
    }

    #[derive(Debug, Deserialize)]
    pub struct LatLng {
        pub lat: Option<f64>,
        pub lng: Option<f64>,
    }

    fn find_component(components: &[AddressComponent], kind: &str) -> Option<String> {
        components
            .iter()
            .find(|component| component.types.iter().any(|t| t == kind))
            .and_then(|component| component.short_name.clone())
    }

    impl GeocodeResponse {
        fn check_status(&self) -> Result<()> {
            let detail = self.error_message.as_deref().unwrap_or("no details");
            match self.status.as_deref() {
                None | Some("OK" | "ZERO_RESULTS") => Ok(()),
                Some(status @ ("OVER_QUERY_LIMIT" | "UNKNOWN_ERROR")) => Err(
                    SkycastError::transient(format!("Geocoder answered {status}: {detail}")),
                ),
                Some("REQUEST_DENIED") => Err(SkycastError::config(format!(
                    "Geocoding request denied: {detail}"
                ))),
                Some("INVALID_REQUEST") => Err(SkycastError::invalid_query(format!(
                    "Geocoder rejected the query: {detail}"
                ))),
                Some(status) => Err(SkycastError::unavailable(format!(
                    "Geocoder answered {status}: {detail}"
                ))),
            }
        }

        /// First result with both coordinates, or `NotFound`
        pub fn into_location(self, query: &str) -> Result<ResolvedLocation> {
            self.check_status()?;

            let result = self
                .results
                .into_iter()
                .next()
                .ok_or_else(|| SkycastError::not_found(query))?;

            let coordinates = result
                .geometry
                .and_then(|geometry| geometry.location)
                .and_then(|location| location.lat.zip(location.lng));
            let Some((latitude, longitude)) = coordinates else {
                return Err(SkycastError::not_found(query));
            };

            Ok(ResolvedLocation {
                latitude,
                longitude,
                postal_code: find_component(&result.address_components, "postal_code"),
                country_code: find_component(&result.address_components, "country"),
            })
        }
    }
}
