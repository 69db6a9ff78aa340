//! Outbound HTTP for miner status pages and pool APIs.

use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::extractor::extract_status;
use crate::types::StatusReading;

pub const MINER_USER_AGENT: &str = "miner-dashboard/0.1";
pub const POOL_USER_AGENT: &str = "miner-dashboard-pool/0.1";

/// Why an upstream request failed.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("HTTP {code}: {reason}")]
    Status { code: u16, reason: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("request error: {0}")]
    Request(String),
}

impl FetchError {
    /// HTTP status code of the upstream answer, if it got that far.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            FetchError::Status { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout(e.to_string())
        } else if let Some(status) = e.status() {
            FetchError::Status {
                code: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
            }
        } else if e.is_connect() {
            FetchError::Connect(e.to_string())
        } else if e.is_decode() || e.is_body() {
            FetchError::Malformed(e.to_string())
        } else {
            FetchError::Request(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, FetchError>;

/// Shared HTTP client for miners and pools.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(request_timeout: Duration, pool_idle_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .pool_idle_timeout(pool_idle_timeout)
            .pool_max_idle_per_host(1)
            .build()?;
        Ok(Self { client })
    }

    /// GET a miner status page and scrape it.
    pub async fn fetch_status(&self, url: &str) -> Result<StatusReading> {
        let body = self.get(url, MINER_USER_AGENT).await?;
        let markup = String::from_utf8_lossy(&body);
        let reading = extract_status(&markup);
        debug!("Scraped {} bytes from {}: {:?}", body.len(), url, reading);
        Ok(reading)
    }

    /// GET a pool API endpoint and return the raw body.
    pub async fn fetch_pool_stats(&self, url: &str) -> Result<Bytes> {
        self.get(url, POOL_USER_AGENT).await
    }

    async fn get(&self, url: &str, user_agent: &str) -> Result<Bytes> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, user_agent)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.bytes().await?)
    }
}
