//! Weather pipeline
//!
//! Drives one request through `Start → Resolving → Forecasting → Done`. The
//! geocode tier lives inside the [`LocationResolver`]; the forecast tier is
//! applied here, keyed by the resolved postal code (or coordinates) and
//! country. Every outcome is either a [`WeatherReport`] or a classified
//! [`WeatherFailure`]; errors, elapsed deadlines and panics inside the
//! pipeline never escape as anything else.

use crate::cache::{CacheStore, CacheTier};
use crate::config::SkycastConfig;
use crate::credentials::{CredentialSource, require_keys};
use crate::error::SkycastError;
use crate::http::NetworkClient;
use crate::location_resolver::{self, LocationResolver};
use crate::models::{UnitSystem, WeatherReport};
use crate::retry::RetryPolicy;
use crate::weather::{self, ForecastProvider};
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Stage {
    Start,
    Resolving,
    Forecasting,
    Done,
}

impl Stage {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Stage::Resolving,
            2 => Stage::Forecasting,
            3 => Stage::Done,
            _ => Stage::Start,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Start => "start",
            Stage::Resolving => "resolving",
            Stage::Forecasting => "forecasting",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

/// Forward-only stage cell shared with the running pipeline
#[derive(Debug, Default)]
struct StageCell(AtomicU8);

impl StageCell {
    fn enter(&self, stage: Stage) {
        self.0.fetch_max(stage as u8, Ordering::SeqCst);
    }

    fn current(&self) -> Stage {
        Stage::from_u8(self.0.load(Ordering::SeqCst))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    LocationNotFound,
    ForecastUnavailable,
    Unexpected,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::LocationNotFound => "location not found",
            FailureKind::ForecastUnavailable => "forecast unavailable",
            FailureKind::Unexpected => "unexpected error",
        };
        f.write_str(name)
    }
}

/// A pipeline run that ended without a report
#[derive(Debug, Error)]
#[error("{kind} while {stage}: {reason}")]
pub struct WeatherFailure {
    pub kind: FailureKind,
    /// Stage the pipeline was in when it stopped
    pub stage: Stage,
    /// Diagnostic detail, not meant for end users
    pub reason: String,
}

impl WeatherFailure {
    fn new(kind: FailureKind, stage: Stage, reason: impl Into<String>) -> Self {
        Self {
            kind,
            stage,
            reason: reason.into(),
        }
    }

    /// Message safe to show to whoever asked for the weather
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self.kind {
            FailureKind::LocationNotFound => {
                "We couldn't find that location. Please check your input and try again."
            }
            FailureKind::ForecastUnavailable => {
                "We're sorry, but we can't retrieve the weather information at the moment. \
                 Our forecast service might be temporarily unavailable. Please try again later."
            }
            FailureKind::Unexpected => "An unexpected error occurred. Our team has been notified.",
        }
    }

    /// HTTP-style status: input-level failures are 422, faults are 500
    #[must_use]
    pub fn status_code(&self) -> u16 {
        if self.is_fault() { 500 } else { 422 }
    }

    #[must_use]
    pub fn is_fault(&self) -> bool {
        self.kind == FailureKind::Unexpected
    }
}

/// Maps an error to a failure kind by the stage it came out of.
///
/// Everything the resolver reports is a lookup miss unless it points at our
/// own infrastructure; everything the forecast stage reports is an outage.
#[must_use]
pub fn classify_failure(stage: Stage, err: &SkycastError) -> WeatherFailure {
    let kind = match stage {
        Stage::Resolving if err.is_fault() => FailureKind::Unexpected,
        Stage::Resolving => FailureKind::LocationNotFound,
        Stage::Forecasting => FailureKind::ForecastUnavailable,
        Stage::Start | Stage::Done => FailureKind::Unexpected,
    };
    WeatherFailure::new(kind, stage, err.to_string())
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panic: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panic: {message}")
    } else {
        "panic with non-string payload".to_string()
    }
}

/// Per-call knobs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchOptions {
    /// Bypass both cache tiers; fresh results still overwrite cached ones
    pub skip_cache: bool,
    /// Upper bound on the whole pipeline, including backoff
    pub deadline: Option<Duration>,
}

pub struct WeatherOrchestrator {
    resolver: LocationResolver,
    metric: ForecastProvider,
    imperial: ForecastProvider,
    forecast_cache: CacheTier,
    default_deadline: Option<Duration>,
}

impl WeatherOrchestrator {
    pub fn new(
        resolver: LocationResolver,
        metric: ForecastProvider,
        imperial: ForecastProvider,
        forecast_cache: CacheTier,
    ) -> Self {
        Self {
            resolver,
            metric,
            imperial,
            forecast_cache,
            default_deadline: None,
        }
    }

    /// Deadline applied by [`Self::fetch_weather`]
    #[must_use]
    pub fn with_default_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.default_deadline = deadline;
        self
    }

    /// Wires resolver, both providers and both cache tiers from configuration.
    /// Credentials are read once, here. Each upstream gets its own client so
    /// its configured timeout applies.
    pub fn from_config(
        config: &SkycastConfig,
        credentials: &dyn CredentialSource,
        geocoding_http: Arc<dyn NetworkClient>,
        forecast_http: Arc<dyn NetworkClient>,
        store: Arc<CacheStore>,
    ) -> crate::Result<Self> {
        let (geocoding_key, forecast_key) = require_keys(credentials)?;
        let retry = RetryPolicy::from_config(&config.retry);

        let resolver = LocationResolver::new(
            geocoding_http,
            geocoding_key,
            &config.geocoding,
            retry.clone(),
            CacheTier::new(
                store.clone(),
                location_resolver::CACHE_NAMESPACE,
                config.geocoding.cache_ttl(),
            ),
        );
        let provider = |units| {
            ForecastProvider::new(
                forecast_http.clone(),
                forecast_key.clone(),
                &config.forecast,
                units,
                retry.clone(),
            )
        };
        let forecast_cache = CacheTier::new(
            store,
            weather::CACHE_NAMESPACE,
            config.forecast.cache_ttl(),
        );

        Ok(Self::new(
            resolver,
            provider(UnitSystem::Metric),
            provider(UnitSystem::Imperial),
            forecast_cache,
        )
        .with_default_deadline(config.request.deadline()))
    }

    fn provider_for(&self, units: UnitSystem) -> &ForecastProvider {
        match units {
            UnitSystem::Metric => &self.metric,
            UnitSystem::Imperial => &self.imperial,
        }
    }

    /// Runs the pipeline with caching on and the default deadline
    pub async fn fetch_weather(&self, query: &str) -> Result<WeatherReport, WeatherFailure> {
        let options = FetchOptions {
            skip_cache: false,
            deadline: self.default_deadline,
        };
        self.fetch_weather_with(query, options).await
    }

    #[instrument(skip(self))]
    pub async fn fetch_weather_with(
        &self,
        query: &str,
        options: FetchOptions,
    ) -> Result<WeatherReport, WeatherFailure> {
        let stage = StageCell::default();
        let pipeline = AssertUnwindSafe(self.run(query, options.skip_cache, &stage)).catch_unwind();

        let outcome = match options.deadline {
            Some(limit) => match tokio::time::timeout(limit, pipeline).await {
                Ok(outcome) => outcome,
                Err(_) => Ok(Err(WeatherFailure::new(
                    FailureKind::Unexpected,
                    stage.current(),
                    format!("deadline of {limit:?} elapsed"),
                ))),
            },
            None => pipeline.await,
        };

        let result = outcome.unwrap_or_else(|payload| {
            Err(WeatherFailure::new(
                FailureKind::Unexpected,
                stage.current(),
                panic_reason(payload.as_ref()),
            ))
        });

        match &result {
            Ok(report) => info!(
                points = report.forecast.len(),
                from_cache = report.is_from_cache,
                "Weather report ready"
            ),
            Err(failure) if failure.is_fault() => error!(?failure, "Weather lookup failed"),
            Err(failure) => warn!(
                kind = %failure.kind,
                stage = %failure.stage,
                reason = %failure.reason,
                "Weather lookup failed"
            ),
        }
        result
    }

    async fn run(
        &self,
        query: &str,
        skip_cache: bool,
        stage: &StageCell,
    ) -> Result<WeatherReport, WeatherFailure> {
        stage.enter(Stage::Resolving);
        let location = self
            .resolver
            .resolve(query, skip_cache)
            .await
            .map_err(|e| classify_failure(Stage::Resolving, &e))?;

        stage.enter(Stage::Forecasting);
        let units = UnitSystem::for_country(location.country_code.as_deref());
        let provider = self.provider_for(units);
        let cached = self
            .forecast_cache
            .fetch(&location.forecast_cache_key(), skip_cache, || {
                provider.forecast(location.latitude, location.longitude)
            })
            .await
            .map_err(|e| classify_failure(Stage::Forecasting, &e))?;

        stage.enter(Stage::Done);
        Ok(WeatherReport {
            forecast: cached.value,
            is_from_cache: cached.was_cache_hit,
            postal_code: location.postal_code,
            country_code: location.country_code,
            units,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheBackend, CacheEntry};
    use crate::clock::SystemClock;
    use crate::config::{ForecastConfig, GeocodingConfig};
    use crate::credentials::{ApiKey, StaticCredentials};
    use crate::http::HttpResponse;
    use crate::test_support::{
        FORECAST_URL, GEOCODE_URL, RecordingSleeper, Scripted, ScriptedNetwork, forecast_body,
        geocode_body, zero_results_body,
    };
    use async_trait::async_trait;
    use rstest::rstest;

    const UNIT: Duration = Duration::from_millis(1);

    fn orchestrator_on(
        network: Arc<dyn NetworkClient>,
        store: Arc<CacheStore>,
    ) -> WeatherOrchestrator {
        let retry = RetryPolicy::new(3, UNIT).with_sleeper(Arc::new(RecordingSleeper::default()));
        let geocoding = GeocodingConfig {
            base_url: GEOCODE_URL.to_string(),
            ..GeocodingConfig::default()
        };
        let forecast = ForecastConfig {
            base_url: FORECAST_URL.to_string(),
            ..ForecastConfig::default()
        };
        let resolver = LocationResolver::new(
            network.clone(),
            ApiKey::new("g"),
            &geocoding,
            retry.clone(),
            CacheTier::new(
                store.clone(),
                location_resolver::CACHE_NAMESPACE,
                geocoding.cache_ttl(),
            ),
        );
        let provider = |units| {
            ForecastProvider::new(
                network.clone(),
                ApiKey::new("f"),
                &forecast,
                units,
                retry.clone(),
            )
        };
        WeatherOrchestrator::new(
            resolver,
            provider(UnitSystem::Metric),
            provider(UnitSystem::Imperial),
            CacheTier::new(store, weather::CACHE_NAMESPACE, forecast.cache_ttl()),
        )
    }

    fn orchestrator(network: &Arc<ScriptedNetwork>) -> WeatherOrchestrator {
        orchestrator_on(network.clone(), Arc::new(CacheStore::in_memory()))
    }

    fn happy_network(country: &str) -> Arc<ScriptedNetwork> {
        Arc::new(
            ScriptedNetwork::default()
                .always(
                    GEOCODE_URL,
                    Scripted::Respond(
                        200,
                        geocode_body(34.0901, -118.4065, Some("90210"), Some(country)),
                    ),
                )
                .always(FORECAST_URL, Scripted::Respond(200, forecast_body())),
        )
    }

    #[tokio::test]
    async fn test_postal_code_lookup_then_cache_hit() {
        let network = happy_network("US");
        let orchestrator = orchestrator(&network);

        let first = orchestrator.fetch_weather("90210").await.unwrap();
        assert!(!first.is_from_cache);
        assert!(!first.forecast.is_empty());
        assert_eq!(first.postal_code.as_deref(), Some("90210"));
        assert_eq!(first.country_code.as_deref(), Some("US"));
        assert_eq!(first.units, UnitSystem::Imperial);

        let second = orchestrator.fetch_weather("90210").await.unwrap();
        assert!(second.is_from_cache);
        assert_eq!(second.forecast, first.forecast);
        assert_eq!(network.calls_to(GEOCODE_URL), 1);
        assert_eq!(network.calls_to(FORECAST_URL), 1);
    }

    #[tokio::test]
    async fn test_queries_resolving_to_same_postal_code_share_forecast() {
        let network = happy_network("US");
        let orchestrator = orchestrator(&network);

        orchestrator.fetch_weather("90210").await.unwrap();
        let report = orchestrator.fetch_weather("Beverly Hills, CA").await.unwrap();

        assert!(report.is_from_cache);
        assert_eq!(network.calls_to(GEOCODE_URL), 2);
        assert_eq!(network.calls_to(FORECAST_URL), 1);
    }

    #[tokio::test]
    async fn test_canadian_location_uses_metric() {
        let network = Arc::new(
            ScriptedNetwork::default()
                .always(
                    GEOCODE_URL,
                    Scripted::Respond(
                        200,
                        geocode_body(45.4215, -75.6972, Some("K1A"), Some("CA")),
                    ),
                )
                .always(FORECAST_URL, Scripted::Respond(200, forecast_body())),
        );

        let report = orchestrator(&network).fetch_weather("Ottawa").await.unwrap();

        assert_eq!(report.units, UnitSystem::Metric);
        let queries = network.queries_to(FORECAST_URL);
        assert!(queries[0].contains(&("units".to_string(), "metric".to_string())));
    }

    #[tokio::test]
    async fn test_unknown_location_never_reaches_forecast() {
        let network = Arc::new(
            ScriptedNetwork::default()
                .always(GEOCODE_URL, Scripted::Respond(200, zero_results_body()))
                .always(FORECAST_URL, Scripted::Respond(200, forecast_body())),
        );

        let failure = orchestrator(&network)
            .fetch_weather("zzzzz-invalid")
            .await
            .unwrap_err();

        assert_eq!(failure.kind, FailureKind::LocationNotFound);
        assert_eq!(failure.stage, Stage::Resolving);
        assert_eq!(failure.status_code(), 422);
        assert_eq!(network.calls_to(FORECAST_URL), 0);
    }

    #[tokio::test]
    async fn test_forecast_outage_is_unavailable_after_max_attempts() {
        let network = Arc::new(
            ScriptedNetwork::default()
                .always(
                    GEOCODE_URL,
                    Scripted::Respond(
                        200,
                        geocode_body(34.0901, -118.4065, Some("90210"), Some("US")),
                    ),
                )
                .always(FORECAST_URL, Scripted::Respond(503, String::new())),
        );

        let failure = orchestrator(&network).fetch_weather("90210").await.unwrap_err();

        assert_eq!(failure.kind, FailureKind::ForecastUnavailable);
        assert_eq!(failure.stage, Stage::Forecasting);
        assert!(!failure.is_fault());
        assert_eq!(network.calls_to(FORECAST_URL), 3);
    }

    #[tokio::test]
    async fn test_skip_cache_bypasses_both_tiers() {
        let network = happy_network("US");
        let orchestrator = orchestrator(&network);
        let options = FetchOptions {
            skip_cache: true,
            ..FetchOptions::default()
        };

        orchestrator.fetch_weather("90210").await.unwrap();
        let report = orchestrator.fetch_weather_with("90210", options).await.unwrap();

        assert!(!report.is_from_cache);
        assert_eq!(network.calls_to(GEOCODE_URL), 2);
        assert_eq!(network.calls_to(FORECAST_URL), 2);
    }

    #[tokio::test]
    async fn test_location_without_postal_code_is_keyed_by_coordinates() {
        let network = Arc::new(
            ScriptedNetwork::default()
                .always(GEOCODE_URL, Scripted::Respond(200, geocode_body(12.5, -7.25, None, None)))
                .always(FORECAST_URL, Scripted::Respond(200, forecast_body())),
        );
        let store = Arc::new(CacheStore::in_memory());
        let orchestrator = orchestrator_on(network.clone(), store.clone());

        let report = orchestrator.fetch_weather("open water").await.unwrap();
        assert_eq!(report.postal_code, None);

        let tier = CacheTier::new(store, weather::CACHE_NAMESPACE, Duration::from_secs(60));
        let cached = tier
            .fetch("-:12.5000,-7.2500", false, || async {
                Err::<Vec<crate::models::ForecastPoint>, _>(SkycastError::cache("should be cached"))
            })
            .await
            .unwrap();
        assert!(cached.was_cache_hit);
        assert_eq!(cached.value, report.forecast);
    }

    struct SlowNetwork;

    #[async_trait]
    impl NetworkClient for SlowNetwork {
        async fn get(
            &self,
            _url: &str,
            _query: &[(String, String)],
        ) -> crate::Result<HttpResponse> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(HttpResponse {
                status: 200,
                body: zero_results_body(),
            })
        }
    }

    #[tokio::test]
    async fn test_deadline_is_unexpected() {
        let orchestrator =
            orchestrator_on(Arc::new(SlowNetwork), Arc::new(CacheStore::in_memory()));
        let options = FetchOptions {
            skip_cache: false,
            deadline: Some(Duration::from_millis(20)),
        };

        let failure = orchestrator.fetch_weather_with("90210", options).await.unwrap_err();

        assert_eq!(failure.kind, FailureKind::Unexpected);
        assert_eq!(failure.stage, Stage::Resolving);
        assert!(failure.reason.contains("deadline"), "{}", failure.reason);
    }

    struct PanickingNetwork;

    #[async_trait]
    impl NetworkClient for PanickingNetwork {
        async fn get(
            &self,
            _url: &str,
            _query: &[(String, String)],
        ) -> crate::Result<HttpResponse> {
            panic!("socket exploded");
        }
    }

    #[tokio::test]
    async fn test_panic_is_caught_and_unexpected() {
        let orchestrator =
            orchestrator_on(Arc::new(PanickingNetwork), Arc::new(CacheStore::in_memory()));

        let failure = orchestrator.fetch_weather("90210").await.unwrap_err();

        assert_eq!(failure.kind, FailureKind::Unexpected);
        assert_eq!(failure.status_code(), 500);
        assert!(failure.reason.contains("socket exploded"), "{}", failure.reason);
    }

    struct BrokenBackend;

    #[async_trait]
    impl CacheBackend for BrokenBackend {
        async fn read(&self, _key: &str) -> crate::Result<Option<CacheEntry>> {
            Err(SkycastError::cache("disk on fire"))
        }

        async fn write(&self, _entry: CacheEntry) -> crate::Result<()> {
            Err(SkycastError::cache("disk on fire"))
        }

        async fn remove(&self, _key: &str) -> crate::Result<()> {
            Ok(())
        }

        async fn purge_expired(
            &self,
            _now: chrono::DateTime<chrono::Utc>,
        ) -> crate::Result<usize> {
            Err(SkycastError::cache("disk on fire"))
        }
    }

    #[tokio::test]
    async fn test_cache_fault_while_resolving_is_unexpected() {
        let network = happy_network("US");
        let store = Arc::new(CacheStore::new(Arc::new(BrokenBackend), Arc::new(SystemClock)));

        let failure = orchestrator_on(network.clone(), store)
            .fetch_weather("90210")
            .await
            .unwrap_err();

        assert_eq!(failure.kind, FailureKind::Unexpected);
        assert_eq!(failure.stage, Stage::Resolving);
        assert_eq!(network.calls_to(GEOCODE_URL), 0);
    }

    #[rstest]
    #[case(Stage::Resolving, SkycastError::not_found("x"), FailureKind::LocationNotFound)]
    #[case(Stage::Resolving, SkycastError::invalid_query("empty"), FailureKind::LocationNotFound)]
    #[case(Stage::Resolving, SkycastError::upstream(503, "down"), FailureKind::LocationNotFound)]
    #[case(Stage::Resolving, SkycastError::config("no key"), FailureKind::Unexpected)]
    #[case(Stage::Forecasting, SkycastError::unavailable("down"), FailureKind::ForecastUnavailable)]
    #[case(Stage::Forecasting, SkycastError::cache("full"), FailureKind::ForecastUnavailable)]
    #[case(Stage::Start, SkycastError::transient("?"), FailureKind::Unexpected)]
    fn test_classification_by_stage(
        #[case] stage: Stage,
        #[case] err: SkycastError,
        #[case] expected: FailureKind,
    ) {
        let failure = classify_failure(stage, &err);
        assert_eq!(failure.kind, expected);
        assert_eq!(failure.stage, stage);
    }

    #[test]
    fn test_user_messages_differ_per_kind() {
        let messages: Vec<_> = [
            FailureKind::LocationNotFound,
            FailureKind::ForecastUnavailable,
            FailureKind::Unexpected,
        ]
        .into_iter()
        .map(|kind| WeatherFailure::new(kind, Stage::Start, "").user_message())
        .collect();

        assert!(messages[0].contains("couldn't find that location"));
        assert!(messages[1].contains("temporarily unavailable"));
        assert!(messages[2].contains("unexpected error"));
    }

    #[test]
    fn test_from_config_requires_both_keys() {
        let network: Arc<dyn NetworkClient> = Arc::new(ScriptedNetwork::default());
        let store = Arc::new(CacheStore::in_memory());
        let config = SkycastConfig::default();

        let missing = StaticCredentials {
            geocoding: Some(ApiKey::new("g")),
            forecast: None,
        };
        let Err(err) = WeatherOrchestrator::from_config(
            &config,
            &missing,
            network.clone(),
            network.clone(),
            store.clone(),
        ) else {
            panic!("expected a configuration error");
        };
        assert!(err.is_fault());

        let both = StaticCredentials::new("g", "f");
        assert!(
            WeatherOrchestrator::from_config(&config, &both, network.clone(), network, store)
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_from_config_routes_each_upstream_to_its_client() {
        let geocoding = happy_network("US");
        let forecast = happy_network("US");
        let mut config = SkycastConfig::default();
        config.geocoding.base_url = GEOCODE_URL.to_string();
        config.forecast.base_url = FORECAST_URL.to_string();

        let orchestrator = WeatherOrchestrator::from_config(
            &config,
            &StaticCredentials::new("g", "f"),
            geocoding.clone(),
            forecast.clone(),
            Arc::new(CacheStore::in_memory()),
        )
        .unwrap();
        orchestrator.fetch_weather("90210").await.unwrap();

        assert_eq!(geocoding.calls_to(GEOCODE_URL), 1);
        assert_eq!(geocoding.calls_to(FORECAST_URL), 0);
        assert_eq!(forecast.calls_to(GEOCODE_URL), 0);
        assert_eq!(forecast.calls_to(FORECAST_URL), 1);
    }

    #[test]
    fn test_stage_only_moves_forward() {
        let cell = StageCell::default();
        assert_eq!(cell.current(), Stage::Start);
        cell.enter(Stage::Forecasting);
        cell.enter(Stage::Resolving);
        assert_eq!(cell.current(), Stage::Forecasting);
    }
}
