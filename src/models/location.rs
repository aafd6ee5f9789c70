//! Location queries and geocoding results

use serde::{Deserialize, Serialize};

/// How a query is looked up upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueryKind {
    /// Exactly five ASCII digits
    PostalCode,
    /// Anything else
    Address,
}

impl QueryKind {
    /// Tag used in cache keys
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryKind::PostalCode => "zipcode",
            QueryKind::Address => "address",
        }
    }
}

/// Strict 5-digit check on the already-trimmed text
#[must_use]
pub fn is_postal_code(text: &str) -> bool {
    text.len() == 5 && text.bytes().all(|b| b.is_ascii_digit())
}

/// Trim, collapse whitespace runs, lowercase
#[must_use]
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// A raw user query and its classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationQuery {
    raw: String,
    kind: QueryKind,
    normalized: String,
}

impl LocationQuery {
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let kind = if is_postal_code(raw.trim()) {
            QueryKind::PostalCode
        } else {
            QueryKind::Address
        };
        Self {
            raw: raw.to_string(),
            kind,
            normalized: normalize(raw),
        }
    }

    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub fn kind(&self) -> QueryKind {
        self.kind
    }

    #[must_use]
    pub fn normalized(&self) -> &str {
        &self.normalized
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.normalized.is_empty()
    }
}

/// Coordinates plus whatever identifiers the geocoder returned
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ResolvedLocation {
    /// Latitude in decimal degrees
    pub latitude: f64,
    /// Longitude in decimal degrees
    pub longitude: f64,
    pub postal_code: Option<String>,
    /// ISO 3166-1 alpha-2, as reported by the geocoder
    pub country_code: Option<String>,
}

impl ResolvedLocation {
    /// Format location as coordinates string
    #[must_use]
    pub fn format_coordinates(&self) -> String {
        format!("{:.4},{:.4}", self.latitude, self.longitude)
    }

    /// Forecast-tier key: country plus postal code, or coordinates when the
    /// geocoder gave no postal code
    #[must_use]
    pub fn forecast_cache_key(&self) -> String {
        let country = self.country_code.as_deref().unwrap_or("-");
        match &self.postal_code {
            Some(postal) => format!("{country}:{postal}"),
            None => format!("{country}:{}", self.format_coordinates()),
        }
    }
}
