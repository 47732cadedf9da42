//! HTTP channel-history gateway source.
//!
//! Fetches pages of channel history from a gateway exposing
//! `GET {base}/channels/{channel}/messages?limit=N&max_id=M`, newest first.
//! The gateway signals rate limiting with HTTP 429, carrying the wait either
//! in a `Retry-After` header or a `{"retry_after": n}` body; both map to
//! [`FetchOutcome::RateLimited`] so the loop can honor the stated wait.
//!
//! Requests deliberately carry no client-side timeout: the only wait this
//! pipeline observes is the one the source dictates.

use super::{FetchOutcome, MessageSource};
use crate::{Error, Result};
use async_trait::async_trait;
use chronicle_core::{Message, MessageId};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

/// Wait applied when a 429 carries no usable duration.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(30);

/// Configuration for the gateway source.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Gateway base URL (e.g., "http://localhost:8085").
    pub base_url: String,

    /// Bearer token, if the gateway requires one.
    pub token: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8085".to_string(),
            token: None,
        }
    }
}

/// HTTP gateway message source.
pub struct GatewaySource {
    config: GatewayConfig,
    client: reqwest::Client,
}

impl GatewaySource {
    /// Create a new gateway source with the given configuration.
    pub fn new(config: GatewayConfig) -> Result<Self> {
        if config.base_url.trim().is_empty() {
            return Err(Error::Config("gateway base URL is empty".to_string()));
        }

        Ok(Self {
            config,
            client: reqwest::Client::new(),
        })
    }

    fn messages_url(&self, channel: &str) -> String {
        format!(
            "{}/channels/{}/messages",
            self.config.base_url.trim_end_matches('/'),
            channel
        )
    }
}

#[async_trait]
impl MessageSource for GatewaySource {
    fn name(&self) -> &'static str {
        "gateway"
    }

    async fn fetch(
        &self,
        channel: &str,
        limit: usize,
        max_id: Option<MessageId>,
    ) -> Result<FetchOutcome> {
        let mut request = self
            .client
            .get(self.messages_url(channel))
            .query(&[("limit", limit as u64)]);

        if let Some(max_id) = max_id {
            request = request.query(&[("max_id", max_id)]);
        }
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let headers = response.headers().clone();
            let body = response.bytes().await.unwrap_or_default();
            let wait = retry_after(&headers, &body);
            return Ok(FetchOutcome::RateLimited { wait });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Source(format!(
                "gateway returned {status} for {channel}: {}",
                truncate(&body, 200)
            )));
        }

        let page: Vec<Message> = response.json().await?;
        Ok(FetchOutcome::Page(page))
    }
}

/// Body shape of a 429 response.
#[derive(Debug, Deserialize)]
struct RateLimitBody {
    #[serde(default)]
    retry_after: Option<u64>,
}

/// Extract the wait duration from a 429 response.
///
/// The `Retry-After` header wins over the body; an unusable response falls
/// back to [`DEFAULT_RETRY_AFTER`].
fn retry_after(headers: &HeaderMap, body: &[u8]) -> Duration {
    if let Some(secs) = headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
    {
        return Duration::from_secs(secs);
    }

    if let Ok(parsed) = serde_json::from_slice::<RateLimitBody>(body) {
        if let Some(secs) = parsed.retry_after {
            return Duration::from_secs(secs);
        }
    }

    DEFAULT_RETRY_AFTER
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
