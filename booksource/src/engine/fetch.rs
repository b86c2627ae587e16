use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Proxy};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::{RuleError, RuleResult};

use super::request::{Method, ResolvedRequest};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub body: String,
    /// URL after redirects; relative links on the page resolve against it.
    pub final_url: String,
    pub status: u16,
}

/**
    Transport for rule requests.
*/
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn request(&self, request: &ResolvedRequest) -> RuleResult<FetchResponse>;
}

/**
    Plain HTTP transport on reqwest.
*/
pub struct HttpFetcher {
    client: Client,
    user_agent: String,
    last_request: Mutex<HashMap<String, Instant>>,
}

impl HttpFetcher {
    pub fn new(proxy: Option<&str>, user_agent: Option<&str>) -> RuleResult<Self> {
        let client = if let Some(proxy_url) = proxy {
            let proxy = Proxy::all(proxy_url).map_err(|e| {
                RuleError::unknown(format!("invalid proxy URL '{}'", proxy_url)).with_cause(e)
            })?;
            Client::builder().proxy(proxy).build().map_err(|e| {
                RuleError::unknown("failed to create HTTP client with proxy").with_cause(e)
            })?
        } else {
            Client::new()
        };

        Ok(Self {
            client,
            user_agent: user_agent.unwrap_or(DEFAULT_USER_AGENT).to_string(),
            last_request: Mutex::new(HashMap::new()),
        })
    }

    /// Wait until at least `rate_limit_ms` has passed since the last request to the same source.
    async fn throttle(&self, source_id: &str, rate_limit_ms: Option<u64>) {
        let Some(interval) = rate_limit_ms.filter(|ms| *ms > 0).map(Duration::from_millis) else {
            return;
        };

        let wait_until = {
            let mut last = self.last_request.lock().await;
            let now = Instant::now();
            let slot = last.get(source_id).map(|t| *t + interval).unwrap_or(now).max(now);
            last.insert(source_id.to_string(), slot);
            slot
        };

        tokio::time::sleep_until(wait_until).await;
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn request(&self, request: &ResolvedRequest) -> RuleResult<FetchResponse> {
        self.throttle(&request.source_id, request.rate_limit_ms).await;

        tracing::debug!(source = %request.source_id, url = %request.url, method = ?request.method, "fetching");

        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };

        builder = builder
            .header("User-Agent", &self.user_agent)
            .timeout(Duration::from_millis(request.timeout_ms));

        for (key, value) in &request.headers {
            if !value.trim().is_empty() {
                builder = builder.header(key.as_str(), value.as_str());
            }
        }

        if let Some(body) = &request.body {
            if request.method == Method::Post
                && !request
                    .headers
                    .keys()
                    .any(|k| k.eq_ignore_ascii_case("content-type"))
            {
                let content_type = if body.trim_start().starts_with(['{', '[']) {
                    "application/json"
                } else {
                    "application/x-www-form-urlencoded"
                };
                builder = builder.header("Content-Type", content_type);
            }
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(|e| {
            let message = if e.is_timeout() {
                format!("request timed out after {}ms", request.timeout_ms)
            } else {
                format!("HTTP request failed: {}", e)
            };
            RuleError::network(message)
                .with_cause(e)
                .with_url(&request.url)
                .with_source_id(&request.source_id)
        })?;

        let status = response.status();
        let final_url = response.url().to_string();

        if !status.is_success() {
            return Err(RuleError::network(format!("HTTP status {}", status))
                .with_url(&request.url)
                .with_source_id(&request.source_id));
        }

        let charset = request.charset.as_deref().unwrap_or("utf-8");
        let body = response.text_with_charset(charset).await.map_err(|e| {
            RuleError::network("failed to read response body")
                .with_cause(e)
                .with_url(&request.url)
                .with_source_id(&request.source_id)
        })?;

        tracing::debug!(url = %final_url, bytes = body.len(), "fetched");

        Ok(FetchResponse {
            body,
            final_url,
            status: status.as_u16(),
        })
    }
}
