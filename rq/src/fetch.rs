//! HTTP fetches routed through the scheduler
//!
//! Each URL becomes a [`RequestDescriptor`] keyed by the URL itself, so
//! retries for the same resource share one counter.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use reqwest::{Client, Url};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::config::HttpConfig;
use crate::scheduler::RequestDescriptor;

/// Errors from a single fetch attempt
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

/// A successful fetch
#[derive(Debug, Clone, Serialize)]
pub struct FetchResponse {
    pub url: String,
    pub status: u16,
    pub body: String,

    /// Attempts this request needed, including the successful one
    pub attempts: u32,
}

/// Builds scheduler descriptors for HTTP GETs
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    http: Client,
}

impl HttpFetcher {
    pub fn from_config(config: &HttpConfig) -> Result<Self, FetchError> {
        debug!(?config, "HttpFetcher::from_config: called");
        let http = Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.as_str())
            .build()?;
        Ok(Self { http })
    }

    /// Descriptor that GETs `url`; non-2xx responses count as failures
    pub fn descriptor(&self, url: &str) -> Result<RequestDescriptor<FetchResponse>, FetchError> {
        let url = Url::parse(url).map_err(|e| FetchError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        let target_id = url.to_string();
        let http = self.http.clone();
        let calls = Arc::new(AtomicU32::new(0));

        Ok(RequestDescriptor::new(target_id, move || {
            let http = http.clone();
            let url = url.clone();
            let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { get(&http, url, attempt).await }
        }))
    }

    /// Descriptors for every URL, or the first parse error and none at all
    pub fn descriptors<S: AsRef<str>>(&self, urls: &[S]) -> Result<Vec<RequestDescriptor<FetchResponse>>, FetchError> {
        urls.iter().map(|url| self.descriptor(url.as_ref())).collect()
    }
}

async fn get(http: &Client, url: Url, attempt: u32) -> Result<FetchResponse, FetchError> {
    debug!(%url, attempt, "get: called");
    let response = http.get(url.clone()).send().await?;
    let status = response.status();

    if !status.is_success() {
        return Err(FetchError::Status {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }

    let body = response.text().await?;
    debug!(%url, status = status.as_u16(), bytes = body.len(), "get: done");
    Ok(FetchResponse {
        url: url.to_string(),
        status: status.as_u16(),
        body,
        attempts: attempt,
    })
}
