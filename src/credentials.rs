//! API keys for the two upstream providers

use crate::Result;
use crate::error::SkycastError;
use std::env;
use std::fmt;

pub const GEOCODING_KEY_VAR: &str = "GOOGLE_MAPS_API_KEY";
pub const FORECAST_KEY_VAR: &str = "OPENWEATHER_API_KEY";

/// An API key that never shows up in logs or debug output.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Only for putting the key on the wire.
    #[inline]
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ApiKey([REDACTED])")
    }
}

impl fmt::Display for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED API KEY]")
    }
}

/// Read-only access to provider keys. Consulted once, when the pipeline is
/// built.
pub trait CredentialSource: Send + Sync {
    fn geocoding_key(&self) -> Option<ApiKey>;
    fn forecast_key(&self) -> Option<ApiKey>;
}

/// Reads `GOOGLE_MAPS_API_KEY` and `OPENWEATHER_API_KEY`
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvCredentials;

fn from_env(var: &str) -> Option<ApiKey> {
    env::var(var)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(ApiKey::new)
}

impl CredentialSource for EnvCredentials {
    fn geocoding_key(&self) -> Option<ApiKey> {
        from_env(GEOCODING_KEY_VAR)
    }

    fn forecast_key(&self) -> Option<ApiKey> {
        from_env(FORECAST_KEY_VAR)
    }
}

#[derive(Debug, Clone)]
pub struct StaticCredentials {
    pub geocoding: Option<ApiKey>,
    pub forecast: Option<ApiKey>,
}

impl StaticCredentials {
    pub fn new(geocoding: impl Into<String>, forecast: impl Into<String>) -> Self {
        Self {
            geocoding: Some(ApiKey::new(geocoding)),
            forecast: Some(ApiKey::new(forecast)),
        }
    }
}

impl CredentialSource for StaticCredentials {
    fn geocoding_key(&self) -> Option<ApiKey> {
        self.geocoding.clone()
    }

    fn forecast_key(&self) -> Option<ApiKey> {
        self.forecast.clone()
    }
}

/// Both keys, or a configuration error naming the missing one
pub fn require_keys(source: &dyn CredentialSource) -> Result<(ApiKey, ApiKey)> {
    let geocoding = source.geocoding_key().ok_or_else(|| {
        SkycastError::config(format!("Missing geocoding API key ({GEOCODING_KEY_VAR})"))
    })?;
    let forecast = source.forecast_key().ok_or_else(|| {
        SkycastError::config(format!("Missing forecast API key ({FORECAST_KEY_VAR})"))
    })?;
    Ok((geocoding, forecast))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_is_redacted() {
        let key = ApiKey::new("super-secret-value");
        assert_eq!(format!("{key:?}"), "ApiKey([REDACTED])");
        assert!(!key.to_string().contains("super-secret"));
        assert_eq!(key.expose(), "super-secret-value");
    }

    #[test]
    fn test_require_keys() {
        let both = StaticCredentials::new("g", "f");
        let (geocoding, forecast) = require_keys(&both).unwrap();
        assert_eq!(geocoding.expose(), "g");
        assert_eq!(forecast.expose(), "f");

        let missing = StaticCredentials {
            geocoding: Some(ApiKey::new("g")),
            forecast: None,
        };
        let err = require_keys(&missing).unwrap_err();
        assert!(matches!(err, SkycastError::Config { .. }));
        assert!(err.to_string().contains(FORECAST_KEY_VAR));
    }
}
