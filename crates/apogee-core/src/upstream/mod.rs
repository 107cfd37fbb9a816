//! Multi-base-URL upstream HTTP client.
//!
//! Failover policy: 429 is never retried against another base URL (base
//! rotation spreads load, it does not cure a per-account quota); 401 gets
//! exactly one token refresh and same-base retry; network errors and 5xx
//! advance to the next base; exhausting every base is a bad gateway.

mod retry_hint;

pub use retry_hint::parse_retry_delay_secs;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use serde_json::Value;

use apogee_types::{ProxyError, Result};

use crate::pool::{AccountPool, TokenRefresher};

pub const DEFAULT_USER_AGENT: &str = "antigravity/1.104.2 (linux; x64)";

const BASE_URL_PROD: &str = "https://cloudcode-pa.googleapis.com/v1internal";
const BASE_URL_DAILY: &str = "https://daily-cloudcode-pa.sandbox.googleapis.com/v1internal";

const UNARY_TIMEOUT: Duration = Duration::from_secs(120);

fn default_base_urls() -> Vec<String> {
    vec![BASE_URL_PROD.to_string(), BASE_URL_DAILY.to_string()]
}

/// Base URLs: explicit override, else `ANTIGRAVITY_UPSTREAM_URL`, else the
/// built-in production + sandbox pair. An invalid override is ignored
/// with a warning rather than taking the proxy down.
pub fn resolve_base_urls(explicit: Option<Vec<String>>) -> Vec<String> {
    if let Some(urls) = explicit {
        if !urls.is_empty() {
            return urls;
        }
    }
    if let Ok(raw) = std::env::var("ANTIGRAVITY_UPSTREAM_URL") {
        let trimmed = raw.trim().trim_end_matches('/').to_string();
        if !trimmed.is_empty() && url::Url::parse(&trimmed).is_ok() {
            tracing::info!("Using custom upstream base URL");
            return vec![trimmed];
        }
        tracing::warn!("ANTIGRAVITY_UPSTREAM_URL is not a valid URL, using defaults");
    }
    default_base_urls()
}

pub struct UpstreamClient {
    http: reqwest::Client,
    base_urls: Vec<String>,
    cursor: AtomicUsize,
    pool: Arc<AccountPool>,
    refresher: Arc<TokenRefresher>,
}

impl UpstreamClient {
    /// `http` must not carry a global timeout. Streaming bodies are
    /// unbounded; per-attempt unary timeouts are set here.
    pub fn new(
        http: reqwest::Client,
        base_urls: Vec<String>,
        pool: Arc<AccountPool>,
        refresher: Arc<TokenRefresher>,
    ) -> Self {
        Self { http, base_urls, cursor: AtomicUsize::new(0), pool, refresher }
    }

    /// Unary call: returns the parsed JSON body of a 2xx response.
    pub async fn post_json(&self, account_id: &str, method: &str, body: &Value) -> Result<Value> {
        let response = self.send(account_id, method, None, body, false).await?;
        response
            .json()
            .await
            .map_err(|e| ProxyError::BadGateway { message: format!("invalid upstream JSON: {e}") })
    }

    /// Streaming call: returns the raw SSE byte stream as soon as response
    /// headers arrive.
    pub async fn post_stream(
        &self,
        account_id: &str,
        method: &str,
        query: Option<&str>,
        body: &Value,
    ) -> Result<impl Stream<Item = std::result::Result<Bytes, reqwest::Error>>> {
        let response = self.send(account_id, method, query, body, true).await?;
        Ok(response.bytes_stream())
    }

    async fn send(
        &self,
        account_id: &str,
        method: &str,
        query: Option<&str>,
        body: &Value,
        streaming: bool,
    ) -> Result<reqwest::Response> {
        let mut token = self.refresher.ensure_fresh(&self.pool, account_id).await?;

        let total = self.base_urls.len();
        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % total;
        let mut last_err: Option<String> = None;

        for offset in 0..total {
            let base_url = &self.base_urls[(start + offset) % total];
            let url = match query {
                Some(qs) => format!("{base_url}:{method}?{qs}"),
                None => format!("{base_url}:{method}"),
            };
            let mut refreshed_after_401 = false;

            loop {
                let mut request = self
                    .http
                    .post(&url)
                    .bearer_auth(&token)
                    .header(reqwest::header::CONTENT_TYPE, "application/json")
                    .header(reqwest::header::USER_AGENT, DEFAULT_USER_AGENT)
                    .json(body);

                if streaming {
                    request = request.header(reqwest::header::ACCEPT, "text/event-stream");
                    if let Some(host) = host_of(base_url) {
                        request = request.header(reqwest::header::HOST, host);
                    }
                } else {
                    request = request.timeout(UNARY_TIMEOUT);
                }

                let response = match request.send().await {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::debug!(base = %base_url, error = %e, "Upstream transport error");
                        last_err = Some(format!("{base_url}: {e}"));
                        break;
                    },
                };

                let status = response.status();
                if status.is_success() {
                    if offset > 0 {
                        tracing::info!(base = %base_url, "Upstream fallback succeeded");
                    }
                    return Ok(response);
                }

                let code = status.as_u16();
                if code == 429 {
                    let text = response.text().await.unwrap_or_default();
                    let retry_after_secs = parse_retry_delay_secs(&text);
                    tracing::warn!(
                        account = %account_id,
                        retry_hint = ?retry_after_secs,
                        "Upstream rate limited the account"
                    );
                    return Err(ProxyError::RateLimited { retry_after_secs });
                }

                if code == 401 && !refreshed_after_401 {
                    tracing::info!(account = %account_id, "Upstream rejected token, refreshing once");
                    token = self.refresher.force_refresh(&self.pool, account_id).await?;
                    refreshed_after_401 = true;
                    continue;
                }

                if status.is_server_error() {
                    tracing::warn!(base = %base_url, status = code, "Upstream 5xx, trying next base");
                    last_err = Some(format!("{base_url}: {status}"));
                    break;
                }

                // Remaining 4xx (including the post-refresh 401): forward.
                let text = response.text().await.unwrap_or_default();
                return Err(ProxyError::Upstream { status: code, message: text });
            }
        }

        Err(ProxyError::BadGateway {
            message: last_err.unwrap_or_else(|| "all upstream endpoints failed".to_string()),
        })
    }
}

fn host_of(base_url: &str) -> Option<String> {
    url::Url::parse(base_url).ok().and_then(|u| u.host_str().map(str::to_string))
}
