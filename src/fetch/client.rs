//! Outbound HTTP with per-attempt timeout and exponential backoff

use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use tokio::time::timeout;

use super::throttle::Throttle;
use crate::config::MetadataConfig;

/// Fetch errors
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Request to {url} timed out after {timeout_ms}ms")]
    Timeout { url: String, timeout_ms: u64 },

    #[error("Request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16, body: String },

    #[error("{url} is rate limited (HTTP {status})")]
    RateLimited { url: String, status: u16, body: String },

    #[error("Failed to decode response from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("Request to {url} withdrawn before sending")]
    Withdrawn { url: String },
}

impl FetchError {
    /// Whether another attempt could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Timeout { .. } | FetchError::Http { .. } => true,
            FetchError::Status { status, .. } => *status >= 500,
            FetchError::InvalidUrl(_)
            | FetchError::RateLimited { .. }
            | FetchError::Decode { .. }
            | FetchError::Withdrawn { .. } => false,
        }
    }
}

/// Consulted right before each attempt goes out, after any throttle wait.
/// A closed gate withdraws the call.
pub trait CallGate: Send + Sync {
    fn is_open(&self) -> bool;
}

/// Gate that never closes
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOpen;

impl CallGate for AlwaysOpen {
    fn is_open(&self) -> bool {
        true
    }
}

/// Timeout and retry schedule applied to every call
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Per-attempt deadline, covering connect, headers and body
    pub timeout: Duration,
    /// Attempts after the first one
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &MetadataConfig) -> Self {
        Self {
            timeout: config.fetch_timeout(),
            max_retries: config.max_retries,
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_cap: Duration::from_millis(config.backoff_cap_ms),
        }
    }

    /// Delay before retrying after the given zero-based attempt failed
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.backoff_base.saturating_mul(factor).min(self.backoff_cap)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&MetadataConfig::default())
    }
}

/// A fully read response
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl FetchResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, FetchError> {
        serde_json::from_slice(&self.body).map_err(|e| FetchError::Decode {
            url: self.url.clone(),
            message: e.to_string(),
        })
    }
}

/// Status line and content type, body left unread
#[derive(Debug, Clone)]
pub struct HeadResponse {
    pub status: u16,
    pub content_type: Option<String>,
}

impl HeadResponse {
    pub fn is_image(&self) -> bool {
        (200..300).contains(&self.status)
            && self
                .content_type
                .as_deref()
                .map(|ct| ct.trim().to_ascii_lowercase().starts_with("image/"))
                .unwrap_or(false)
    }
}

/// HTTP client shared by every metadata source
#[derive(Clone)]
pub struct FetchClient {
    http: reqwest::Client,
    policy: RetryPolicy,
}

impl FetchClient {
    pub fn new(policy: RetryPolicy) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(concat!("bookshelf-server/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Falling back to default HTTP client: {}", e);
                reqwest::Client::new()
            });

        Self { http, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// GET a URL, retrying transient failures with exponential backoff.
    ///
    /// The throttle, when given, is awaited before every attempt. Rate-limit
    /// responses and client errors are returned without retrying.
    pub async fn fetch_with_retry(
        &self,
        url: &str,
        throttle: Option<&Throttle>,
    ) -> Result<FetchResponse, FetchError> {
        self.fetch_gated(url, throttle, &AlwaysOpen).await
    }

    /// Like [`fetch_with_retry`](Self::fetch_with_retry), but every attempt
    /// must also pass `gate` once its throttle slot comes up.
    pub async fn fetch_gated(
        &self,
        url: &str,
        throttle: Option<&Throttle>,
        gate: &dyn CallGate,
    ) -> Result<FetchResponse, FetchError> {
        let parsed = parse_url(url)?;
        let mut attempt = 0;

        loop {
            if let Some(throttle) = throttle {
                throttle.wait().await;
            }

            if !gate.is_open() {
                tracing::debug!(url = %url, "Gate closed, withdrawing request");
                return Err(FetchError::Withdrawn {
                    url: url.to_string(),
                });
            }

            match self.fetch_once(parsed.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < self.policy.max_retries => {
                    let delay = self.policy.backoff(attempt);
                    tracing::debug!(
                        url = %url,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Fetch failed, retrying: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Check a URL without downloading it: HEAD, falling back to GET when
    /// the server refuses HEAD. One attempt, same timeout.
    pub async fn head(&self, url: &str) -> Result<HeadResponse, FetchError> {
        let parsed = parse_url(url)?;

        let head = self.send_headers_only(Method::HEAD, parsed.clone()).await?;
        if head.status == StatusCode::METHOD_NOT_ALLOWED.as_u16()
            || head.status == StatusCode::NOT_IMPLEMENTED.as_u16()
        {
            return self.send_headers_only(Method::GET, parsed).await;
        }

        Ok(head)
    }

    async fn fetch_once(&self, url: Url) -> Result<FetchResponse, FetchError> {
        let url_string = url.to_string();
        let request = async {
            let response = self
                .http
                .get(url)
                .send()
                .await
                .map_err(|source| FetchError::Http {
                    url: url_string.clone(),
                    source,
                })?;

            let status = response.status();
            let content_type = content_type(&response);
            let body = response
                .bytes()
                .await
                .map_err(|source| FetchError::Http {
                    url: url_string.clone(),
                    source,
                })?
                .to_vec();

            if status == StatusCode::TOO_MANY_REQUESTS {
                return Err(FetchError::RateLimited {
                    url: url_string.clone(),
                    status: status.as_u16(),
                    body: String::from_utf8_lossy(&body).into_owned(),
                });
            }

            if !status.is_success() {
                return Err(FetchError::Status {
                    url: url_string.clone(),
                    status: status.as_u16(),
                    body: String::from_utf8_lossy(&body).into_owned(),
                });
            }

            Ok(FetchResponse {
                url: url_string.clone(),
                status: status.as_u16(),
                content_type,
                body,
            })
        };

        timeout(self.policy.timeout, request)
            .await
            .unwrap_or_else(|_| {
                Err(FetchError::Timeout {
                    url: url_string.clone(),
                    timeout_ms: self.policy.timeout.as_millis() as u64,
                })
            })
    }

    async fn send_headers_only(&self, method: Method, url: Url) -> Result<HeadResponse, FetchError> {
        let url_string = url.to_string();
        let request = self.http.request(method, url).send();

        match timeout(self.policy.timeout, request).await {
            Ok(Ok(response)) => Ok(HeadResponse {
                status: response.status().as_u16(),
                content_type: content_type(&response),
            }),
            Ok(Err(source)) => Err(FetchError::Http {
                url: url_string,
                source,
            }),
            Err(_) => Err(FetchError::Timeout {
                url: url_string,
                timeout_ms: self.policy.timeout.as_millis() as u64,
            }),
        }
    }
}

fn parse_url(url: &str) -> Result<Url, FetchError> {
    let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl(format!("{}: {}", url, e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(FetchError::InvalidUrl(format!("unsupported scheme {}", other))),
    }
}

fn content_type(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}
