//! Bounded, retrying JSON fetcher shared by the platform adapters.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info_span, warn, Instrument};

/// Exponential retry schedule: `first_delay`, doubled per retry, never
/// above `ceiling`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub first_delay: Duration,
    pub ceiling: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            first_delay: Duration::from_millis(250),
            ceiling: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (zero-based).
    pub fn delay_before(&self, retry: u32) -> Duration {
        self.first_delay
            .saturating_mul(2u32.saturating_pow(retry))
            .min(self.ceiling)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    /// Requests in flight across all platforms.
    pub max_in_flight: usize,
    pub max_in_flight_per_platform: usize,
    pub retry: RetryPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            max_in_flight: 16,
            max_in_flight_per_platform: 4,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("request to {url} timed out")]
    Timeout { url: String },
    #[error("upstream answered {status} for {url}")]
    Status { status: u16, url: String },
    #[error("credentials rejected with status {status} for {url}")]
    Unauthorized { status: u16, url: String },
    #[error("response body is not valid json: {0}")]
    Decode(String),
    #[error("fetcher is shutting down")]
    Closed,
}

impl FetchError {
    /// Throttling, 5xx answers and connection trouble may clear up on a
    /// later attempt; everything else will not.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Timeout { .. } => true,
            FetchError::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS.as_u16() || (500..600).contains(status)
            }
            FetchError::Request(err) => err.is_timeout() || err.is_connect(),
            FetchError::Unauthorized { .. } | FetchError::Decode(_) | FetchError::Closed => false,
        }
    }
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    in_flight: Arc<Semaphore>,
    per_platform_limit: usize,
    per_platform: Mutex<HashMap<String, Arc<Semaphore>>>,
    retry: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> Result<Self, FetchError> {
        let client = match &config.user_agent {
            Some(agent) => reqwest::Client::builder().user_agent(agent.as_str()),
            None => reqwest::Client::builder(),
        }
        .gzip(true)
        .brotli(true)
        .timeout(config.timeout)
        .build()?;

        Ok(Self {
            client,
            in_flight: Arc::new(Semaphore::new(config.max_in_flight.max(1))),
            per_platform_limit: config.max_in_flight_per_platform.max(1),
            per_platform: Mutex::new(HashMap::new()),
            retry: config.retry,
        })
    }

    async fn per_platform_semaphore(&self, platform: &str) -> Arc<Semaphore> {
        let mut map = self.per_platform.lock().await;
        map.entry(platform.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_platform_limit)))
            .clone()
    }

    /// GET `url` and decode the body as JSON. Retries transient failures
    /// per the retry policy; 401/403 are surfaced immediately.
    pub async fn get_json(
        &self,
        platform: &str,
        url: &str,
        query: &[(&str, String)],
        headers: &[(&str, String)],
    ) -> Result<JsonValue, FetchError> {
        let _global = self
            .in_flight
            .acquire()
            .await
            .map_err(|_| FetchError::Closed)?;
        let per_platform = self.per_platform_semaphore(platform).await;
        let _platform = per_platform.acquire().await.map_err(|_| FetchError::Closed)?;

        let span = info_span!("http_fetch", platform, url);
        self.get_json_with_retries(url, query, headers)
            .instrument(span)
            .await
    }

    async fn get_json_with_retries(
        &self,
        url: &str,
        query: &[(&str, String)],
        headers: &[(&str, String)],
    ) -> Result<JsonValue, FetchError> {
        let mut retry = 0;
        loop {
            let err = match self.attempt(url, query, headers).await {
                Ok(body) => return Ok(body),
                Err(err) => err,
            };
            if !err.is_transient() {
                return Err(err);
            }
            if retry >= self.retry.retries {
                warn!(attempts = retry + 1, error = %err, "giving up on request");
                return Err(err);
            }
            let delay = self.retry.delay_before(retry);
            debug!(retry, ?delay, error = %err, "retrying request");
            tokio::time::sleep(delay).await;
            retry += 1;
        }
    }

    async fn attempt(
        &self,
        url: &str,
        query: &[(&str, String)],
        headers: &[(&str, String)],
    ) -> Result<JsonValue, FetchError> {
        let request = headers
            .iter()
            .fold(self.client.get(url).query(query), |req, (name, value)| {
                req.header(*name, value)
            });
        let resp = request.send().await.map_err(|err| {
            if err.is_timeout() {
                FetchError::Timeout {
                    url: url.to_string(),
                }
            } else {
                FetchError::Request(err)
            }
        })?;

        let status = resp.status();
        let path = resp.url().path().to_string();
        if status.is_success() {
            let body = resp.bytes().await?;
            return serde_json::from_slice(&body)
                .map_err(|err| FetchError::Decode(err.to_string()));
        }
        let status_code = status.as_u16();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(FetchError::Unauthorized {
                status: status_code,
                url: path,
            });
        }
        Err(FetchError::Status {
            status: status_code,
            url: path,
        })
    }
}
