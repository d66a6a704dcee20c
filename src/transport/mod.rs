use std::time::Duration;

use reqwest::{Client, StatusCode, header::CONTENT_TYPE};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};
use url::Url;

use crate::{protocol::AlertsRequest, query::backend_uri};

pub const ALERTS_PATH: &str = "alerts.json";

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid backend uri: {0}")]
    Uri(#[from] url::ParseError),
    #[error("backend responded with {status}")]
    Status { status: StatusCode },
}

impl TransportError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Http(err) => !err.is_decode() && !err.is_builder(),
            Self::Status { status } => status.is_server_error(),
            Self::Uri(_) => false,
        }
    }
}

/// Raw backend reply. Parsing is left to the caller so decode failures are
/// reported the same way as transport failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    pub body: String,
    /// The reply did not come from the backend we asked, usually because an
    /// authentication proxy redirected us to its login page.
    pub opaque: bool,
}

#[allow(async_fn_in_trait)]
pub trait Transport {
    /// `on_retry` is called with the attempt number after every failed
    /// attempt that will be retried.
    async fn fetch_alerts(
        &self,
        request: &AlertsRequest,
        on_retry: &mut dyn FnMut(u32),
    ) -> Result<Fetched, TransportError>;
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 9,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 1.5,
        }
    }
}

impl RetryPolicy {
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self
            .backoff_multiplier
            .powi(attempt.saturating_sub(1) as i32);
        let delay_millis = (self.initial_delay.as_millis() as f64 * factor) as u64;
        Duration::from_millis(delay_millis).min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    endpoint: Url,
    retry: RetryPolicy,
}

impl HttpTransport {
    pub fn new(backend: &str, retry: RetryPolicy) -> Result<Self, TransportError> {
        let endpoint = Url::parse(&backend_uri(backend, ALERTS_PATH))?;
        Ok(Self {
            client: Client::new(),
            endpoint,
            retry,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn attempt(&self, request: &AlertsRequest) -> Result<Fetched, TransportError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status { status });
        }

        let redirected = response.url().origin() != self.endpoint.origin();
        let json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.contains("json"));
        let body = response.text().await?;

        Ok(Fetched {
            body,
            opaque: redirected || !json,
        })
    }
}

impl Transport for HttpTransport {
    async fn fetch_alerts(
        &self,
        request: &AlertsRequest,
        on_retry: &mut dyn FnMut(u32),
    ) -> Result<Fetched, TransportError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.attempt(request).await {
                Ok(fetched) => return Ok(fetched),
                Err(err) if err.is_retryable() && attempt <= self.retry.retries => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(%err, attempt, ?delay, "backend request failed, retrying");
                    on_retry(attempt);
                    sleep(delay).await;
                }
                Err(err) => {
                    debug!(%err, attempt, "giving up on backend request");
                    return Err(err);
                }
            }
        }
    }
}
