//! Error types for the geocoding stage

use thiserror::Error;

/// Errors raised while talking to the geocoding service
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GeocodeError {
    /// Email or password not configured
    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    /// Service rejected the credentials or token
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// Search attempted before `authenticate` succeeded
    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("API error {0}: {1}")]
    ApiError(u16, String),

    #[error("Parse error: {0}")]
    ParseError(String),

    /// Search returned zero usable candidates
    #[error("No matches for '{0}'")]
    NoMatches(String),
}

impl GeocodeError {
    /// Whether the request may succeed if repeated
    pub fn is_transient(&self) -> bool {
        match self {
            GeocodeError::NetworkError(_)
            | GeocodeError::Timeout(_)
            | GeocodeError::RateLimitExceeded => true,
            GeocodeError::ApiError(status, _) => *status >= 500,
            _ => false,
        }
    }

    /// Whether the error means the service refused our identity
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            GeocodeError::MissingCredentials(_)
                | GeocodeError::AuthFailed(_)
                | GeocodeError::NotAuthenticated
        )
    }
}

impl From<reqwest::Error> for GeocodeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GeocodeError::Timeout(err.to_string())
        } else if err.is_decode() {
            GeocodeError::ParseError(err.to_string())
        } else {
            GeocodeError::NetworkError(err.to_string())
        }
    }
}

/// Errors that abort a pipeline stage
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Geocode(#[from] GeocodeError),

    #[error(transparent)]
    Storage(#[from] sgre_common::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
