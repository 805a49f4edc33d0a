//! OneMap search API client
//!
//! Two endpoints are used:
//! - `POST /api/auth/post/getToken` exchanges email/password for an access token
//! - `GET /api/common/elastic/search` returns ranked candidates for a query
//!
//! All coordinates in the search response are strings.

use crate::error::GeocodeError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sgre_common::config::GeocodingConfig;
use std::time::Duration;

const TOKEN_PATH: &str = "/api/auth/post/getToken";
const SEARCH_PATH: &str = "/api/common/elastic/search";
const USER_AGENT: &str = concat!("sgre-geocode/", env!("CARGO_PKG_VERSION"));

/// One raw candidate from the search endpoint
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", default)]
pub struct SearchHit {
    pub searchval: String,
    pub blk_no: String,
    pub road_name: String,
    pub building: String,
    pub address: String,
    pub postal: String,
    pub x: String,
    pub y: String,
    pub latitude: String,
    pub longitude: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    #[serde(default)]
    found: u32,
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
}

/// Service that turns address strings into ranked candidates
///
/// The geocoding client owns retries, caching and rate limiting; a backend
/// performs exactly one request per call.
#[async_trait]
pub trait GeocodeBackend: Send + Sync {
    /// Obtain an access token
    async fn authenticate(&self) -> Result<String, GeocodeError>;

    /// Run one search with a previously obtained token
    async fn search(&self, token: &str, query: &str) -> Result<Vec<SearchHit>, GeocodeError>;
}

pub struct OneMapBackend {
    http_client: reqwest::Client,
    base_url: String,
    email: Option<String>,
    password: Option<String>,
}

impl OneMapBackend {
    pub fn new(config: &GeocodingConfig) -> Result<Self, GeocodeError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GeocodeError::NetworkError(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            email: config.email.clone().filter(|s| !s.trim().is_empty()),
            password: config.password.clone().filter(|s| !s.is_empty()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl GeocodeBackend for OneMapBackend {
    async fn authenticate(&self) -> Result<String, GeocodeError> {
        let (email, password) = match (&self.email, &self.password) {
            (Some(email), Some(password)) => (email, password),
            (None, _) => return Err(GeocodeError::MissingCredentials("ONEMAP_EMAIL not set".into())),
            (_, None) => {
                return Err(GeocodeError::MissingCredentials("ONEMAP_PASSWORD not set".into()))
            }
        };

        let url = format!("{}{}", self.base_url, TOKEN_PATH);
        tracing::debug!(url = %url, "Requesting OneMap access token");

        let response = self
            .http_client
            .post(&url)
            .json(&TokenRequest { email, password })
            .send()
            .await?;

        let status = response.status();
        if matches!(status.as_u16(), 400 | 401 | 403) {
            let body = response.text().await.unwrap_or_default();
            return Err(GeocodeError::AuthFailed(format!("HTTP {}: {}", status.as_u16(), body)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GeocodeError::ApiError(status.as_u16(), body));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| GeocodeError::ParseError(e.to_string()))?;

        match token.access_token.filter(|t| !t.is_empty()) {
            Some(access_token) => Ok(access_token),
            None => Err(GeocodeError::AuthFailed(
                token.error.unwrap_or_else(|| "no access_token in response".to_string()),
            )),
        }
    }

    async fn search(&self, token: &str, query: &str) -> Result<Vec<SearchHit>, GeocodeError> {
        let url = format!("{}{}", self.base_url, SEARCH_PATH);

        let response = self
            .http_client
            .get(&url)
            .bearer_auth(token)
            .query(&[
                ("searchVal", query),
                ("returnGeom", "Y"),
                ("getAddrDetails", "Y"),
                ("pageNum", "1"),
            ])
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(GeocodeError::RateLimitExceeded);
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(GeocodeError::AuthFailed(format!("search rejected token (HTTP {})", status.as_u16())));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GeocodeError::ApiError(status.as_u16(), body));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| GeocodeError::ParseError(e.to_string()))?;

        tracing::debug!(query, found = body.found, returned = body.results.len(), "OneMap search");
        Ok(body.results)
    }
}
