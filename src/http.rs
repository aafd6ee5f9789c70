//! Outbound HTTP used by the geocoding and forecast lookups

use crate::Result;
use crate::error::SkycastError;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

const USER_AGENT: &str = concat!("skycast/", env!("CARGO_PKG_VERSION"));

/// Status and raw body of an upstream reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait NetworkClient: Send + Sync {
    /// GET `url` with `query` appended. Only transport failures are errors; any
    /// status the server sends comes back as a response.
    async fn get(&self, url: &str, query: &[(String, String)]) -> Result<HttpResponse>;
}

pub struct ReqwestClient {
    client: Client,
}

impl ReqwestClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| SkycastError::config(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl NetworkClient for ReqwestClient {
    async fn get(&self, url: &str, query: &[(String, String)]) -> Result<HttpResponse> {
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| {
                // the URL carries the API key
                SkycastError::transient(format!("Request to {url} failed: {}", e.without_url()))
            })?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| {
            SkycastError::transient(format!(
                "Failed to read response body from {url}: {}",
                e.without_url()
            ))
        })?;
        debug!(url, status, bytes = body.len(), "Upstream responded");

        Ok(HttpResponse { status, body })
    }
}
