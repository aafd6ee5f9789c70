//! Error types and handling for `skycast`

use thiserror::Error;

/// How a failure should be treated by the retry loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Network blips, timeouts, 5xx/429 responses
    Transient,
    /// The upstream answered but the body could not be decoded
    Malformed,
    /// Retrying cannot change the outcome
    Permanent,
}

/// Errors that report their own retry class
pub trait Classify {
    fn class(&self) -> ErrorClass;
}

/// Main error type for the `skycast` pipeline
#[derive(Error, Debug)]
pub enum SkycastError {
    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// The query cannot be looked up at all
    #[error("Invalid query: {message}")]
    InvalidQuery { message: String },

    /// Transport-level failure talking to an upstream
    #[error("Network error: {message}")]
    TransientNetwork { message: String },

    /// Upstream body did not match the expected shape
    #[error("Malformed response: {message}")]
    MalformedBody { message: String },

    /// Upstream answered with a non-success status
    #[error("Upstream returned status {status}: {message}")]
    Upstream { status: u16, message: String },

    /// Geocoding produced no usable result
    #[error("Location not found: {query}")]
    NotFound { query: String },

    /// Forecast could not be produced
    #[error("Forecast unavailable: {message}")]
    Unavailable { message: String },

    /// Cache backend errors
    #[error("Cache error: {message}")]
    Cache { message: String },
}

impl SkycastError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new invalid query error
    pub fn invalid_query<S: Into<String>>(message: S) -> Self {
        Self::InvalidQuery {
            message: message.into(),
        }
    }

    /// Create a new transient network error
    pub fn transient<S: Into<String>>(message: S) -> Self {
        Self::TransientNetwork {
            message: message.into(),
        }
    }

    /// Create a new malformed body error
    pub fn malformed<S: Into<String>>(message: S) -> Self {
        Self::MalformedBody {
            message: message.into(),
        }
    }

    /// Create a new upstream status error
    pub fn upstream<S: Into<String>>(status: u16, message: S) -> Self {
        Self::Upstream {
            status,
            message: message.into(),
        }
    }

    /// Create a new not-found error
    pub fn not_found<S: Into<String>>(query: S) -> Self {
        Self::NotFound {
            query: query.into(),
        }
    }

    /// Create a new unavailable error
    pub fn unavailable<S: Into<String>>(message: S) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Create a new cache error
    pub fn cache<S: Into<String>>(message: S) -> Self {
        Self::Cache {
            message: message.into(),
        }
    }

    /// Whether this error points at our own infrastructure rather than the
    /// request or an upstream
    #[must_use]
    pub fn is_fault(&self) -> bool {
        matches!(self, Self::Config { .. } | Self::Cache { .. })
    }
}

/// Statuses worth another attempt: server errors, request timeout, rate limit
#[must_use]
pub fn is_transient_status(status: u16) -> bool {
    (500..600).contains(&status) || status == 408 || status == 429
}

impl Classify for SkycastError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::TransientNetwork { .. } => ErrorClass::Transient,
            Self::MalformedBody { .. } => ErrorClass::Malformed,
            Self::Upstream { status, .. } if is_transient_status(*status) => {
                ErrorClass::Transient
            }
            _ => ErrorClass::Permanent,
        }
    }
}
