//! HTTP client for the TronGrid contract-events endpoint
//!
//! One call fetches one page. The client keeps no pagination state; the
//! cursor travels inside the query.

use crate::types::{EventQuery, Page};
use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::StatusCode;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Default TronGrid host.
pub const DEFAULT_API_BASE_URL: &str = "https://api.trongrid.io";

/// Header carrying the TronGrid API key.
pub const API_KEY_HEADER: &str = "TRON-PRO-API-KEY";

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors returned by a page fetch.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("http {status}: {body}")]
    Http { status: StatusCode, body: String },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("provider reported failure: {0}")]
    Provider(String),
    #[error("failed to decode page: {0}")]
    Decode(#[from] serde_json::Error),
}

impl FeedError {
    /// Whether repeating the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            FeedError::Transport(_) => true,
            FeedError::Http { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            FeedError::Provider(_) | FeedError::Decode(_) => false,
        }
    }
}

/// Source of event pages.
pub trait EventFeed {
    fn fetch_page(
        &self,
        query: &EventQuery,
    ) -> impl Future<Output = Result<Page, FeedError>> + Send;
}

/// TronGrid client. Cheap to share; the underlying connection pool lives
/// in `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct FeedClient {
    client: reqwest::Client,
    base_url: String,
}

impl FeedClient {
    /// Create a client that sends `api_key` with every request.
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        if api_key.trim().is_empty() {
            anyhow::bail!("TronGrid API key is empty");
        }

        let mut headers = HeaderMap::new();
        let mut key = HeaderValue::from_str(api_key.trim()).context("Invalid API key header value")?;
        key.set_sensitive(true);
        headers.insert(API_KEY_HEADER, key);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// URL of the events endpoint for a contract.
    pub fn events_url(&self, contract: &str) -> String {
        format!("{}/v1/contracts/{}/events", self.base_url, contract)
    }
}

impl EventFeed for FeedClient {
    async fn fetch_page(&self, query: &EventQuery) -> Result<Page, FeedError> {
        let url = self.events_url(&query.contract);
        let params = query.query_pairs();
        debug!(
            url = %url,
            cursor = query.cursor.as_deref().unwrap_or(""),
            min_ts = query.min_block_timestamp,
            max_ts = query.max_block_timestamp,
            limit = query.limit,
            "Requesting events page"
        );

        let response = self.client.get(&url).query(&params).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(FeedError::Http { status, body });
        }

        let page: Page = serde_json::from_str(&body)?;
        if !page.success {
            let message = page
                .error
                .clone()
                .unwrap_or_else(|| "success=false".to_string());
            return Err(FeedError::Provider(message));
        }

        debug!(
            events = page.events.len(),
            fingerprint = %page.meta.fingerprint,
            "Received events page"
        );
        Ok(page)
    }
}
