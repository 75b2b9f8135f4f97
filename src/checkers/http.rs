use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use crate::{
    checkers::CheckFailure,
    error::Result,
    ratelimit::SlidingWindowLimiter,
};

/// Longest slice of an upstream body kept in error details
const MAX_ERROR_BODY: usize = 512;

/// Failure talking to an upstream scrub service
#[derive(Debug, Clone)]
pub struct UpstreamError {
    pub failure: CheckFailure,
    pub detail: String,
}

impl UpstreamError {
    pub fn new(failure: CheckFailure, detail: impl Into<String>) -> Self {
        Self { failure, detail: detail.into() }
    }

    fn from_reqwest(err: reqwest::Error) -> Self {
        let failure = if err.is_timeout() {
            CheckFailure::Timeout
        } else {
            CheckFailure::Network
        };
        Self::new(failure, err.to_string())
    }
}

/// Shared HTTP plumbing for the external checkers: one client with a
/// request timeout, plus the outbound limiter guarding third-party quotas.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    limiter: Option<Arc<SlidingWindowLimiter>>,
    max_wait: Duration,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            limiter: None,
            max_wait: Duration::ZERO,
        })
    }

    pub fn with_limiter(mut self, limiter: Arc<SlidingWindowLimiter>, max_wait: Duration) -> Self {
        self.limiter = Some(limiter);
        self.max_wait = max_wait;
        self
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Send a request on behalf of `source` and decode a JSON body
    pub async fn fetch_json(
        &self,
        source: &str,
        request: reqwest::RequestBuilder,
    ) -> std::result::Result<serde_json::Value, UpstreamError> {
        if let Some(limiter) = &self.limiter {
            let key = format!("outbound:{}", source);
            if let Err(retry_after) = limiter.acquire(&key, 1, self.max_wait).await {
                return Err(UpstreamError::new(
                    CheckFailure::RateLimited,
                    format!("outbound quota exhausted, retry after {} ms", retry_after.as_millis()),
                ));
            }
        }

        let response = request.send().await.map_err(UpstreamError::from_reqwest)?;
        let status = response.status();
        let body = response.text().await.map_err(UpstreamError::from_reqwest)?;

        debug!("{} responded with {} ({} bytes)", source, status, body.len());

        if !status.is_success() {
            return Err(UpstreamError::new(
                CheckFailure::UpstreamStatus(status.as_u16()),
                truncate(&body, MAX_ERROR_BODY),
            ));
        }

        serde_json::from_str(&body).map_err(|e| {
            UpstreamError::new(
                CheckFailure::MalformedResponse,
                format!("{}: {}", e, truncate(&body, MAX_ERROR_BODY)),
            )
        })
    }
}

fn truncate(body: &str, max: usize) -> String {
    if body.len() <= max {
        return body.to_string();
    }
    let mut end = max;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}
