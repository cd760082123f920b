//! Bounded upstream fetches.
//!
//! Every outbound GET runs under a hard deadline. When the deadline fires the
//! in-flight exchange is dropped, so a late response can never be observed
//! by the caller. There are no retries: one timeout or error is final.

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::{debug, info};

use crate::config::Config;
use crate::http::StatusCode;

const USER_AGENT_VALUE: &str = concat!("modelcache/", env!("CARGO_PKG_VERSION"));

/// Result of a single bounded fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// 2xx response; carries the complete body.
    Success(Bytes),
    /// Upstream status for non-2xx responses, `408` for timeouts and
    /// transport failures.
    Failure(StatusCode),
}

/// Source of bounded fetches for request targets.
///
/// [`Upstream`] is the production implementation; the cache core is generic
/// over this trait so it can run against any origin.
pub trait Fetcher: Send + Sync + 'static {
    /// Fetches `target` (path and query) from the origin.
    fn fetch(&self, target: &str) -> impl Future<Output = FetchOutcome> + Send;

    /// Returns the absolute URL `target` resolves to, for logging.
    fn url(&self, target: &str) -> String;
}

/// Client for the configured upstream (the server identity).
#[derive(Debug, Clone)]
pub struct Upstream {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl Upstream {
    /// Builds a client for the upstream named in `config`.
    pub fn new(config: &Config) -> Result<Self, reqwest::Error> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .build()?;

        Ok(Self {
            client,
            base_url: config.server_name.clone(),
            timeout: config.timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the full upstream URL for a request target.
    pub fn url(&self, target: &str) -> String {
        format!("{}{}", self.base_url, target)
    }

    /// Fetches `{base_url}{target}` under the configured deadline.
    pub async fn fetch(&self, target: &str) -> FetchOutcome {
        let url = self.url(target);
        info!(url = %url, "fetching from upstream");
        self.fetch_url(&url).await
    }

    // The deadline covers the whole exchange, body included.
    async fn fetch_url(&self, url: &str) -> FetchOutcome {
        match tokio::time::timeout(self.timeout, self.exchange(url)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                debug!(url = %url, timeout_ms = self.timeout.as_millis() as u64, "upstream timed out");
                FetchOutcome::Failure(StatusCode::REQUEST_TIMEOUT)
            }
        }
    }

    async fn exchange(&self, url: &str) -> FetchOutcome {
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                debug!(url = %url, error = %e, "upstream transport error");
                return FetchOutcome::Failure(StatusCode::REQUEST_TIMEOUT);
            }
        };

        let status = response.status();
        if !status.is_success() {
            debug!(url = %url, status = status.as_u16(), "upstream returned failure status");
            return FetchOutcome::Failure(
                StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY),
            );
        }

        match response.bytes().await {
            Ok(body) => FetchOutcome::Success(body),
            Err(e) => {
                debug!(url = %url, error = %e, "failed to read upstream body");
                FetchOutcome::Failure(StatusCode::REQUEST_TIMEOUT)
            }
        }
    }
}

impl Fetcher for Upstream {
    fn fetch(&self, target: &str) -> impl Future<Output = FetchOutcome> + Send {
        Upstream::fetch(self, target)
    }

    fn url(&self, target: &str) -> String {
        Upstream::url(self, target)
    }
}
