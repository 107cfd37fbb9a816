//! OAuth access-token refresh with per-account single-flight.
//!
//! Concurrent requests against one account must not fire concurrent
//! refreshes: the second caller parks on the account's latch and reuses
//! the first flight's result via a freshness re-check.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Deserialize;

use apogee_types::{ProxyError, Result};

use super::store::AccountPool;

const OAUTH_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    /// Lifetime in seconds.
    expires_in: i64,
    refresh_token: Option<String>,
}

pub struct TokenRefresher {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    latches: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl TokenRefresher {
    pub fn new(http: reqwest::Client, client_id: String, client_secret: String) -> Self {
        Self {
            http,
            token_url: OAUTH_TOKEN_URL.to_string(),
            client_id,
            client_secret,
            latches: DashMap::new(),
        }
    }

    /// Point at a different token endpoint (tests).
    pub fn with_token_url(mut self, url: String) -> Self {
        self.token_url = url;
        self
    }

    /// Return a valid access token for the account, refreshing it first
    /// when it is within the expiry buffer.
    pub async fn ensure_fresh(&self, pool: &AccountPool, id: &str) -> Result<String> {
        let account = pool
            .get(id)
            .ok_or_else(|| ProxyError::Internal { message: format!("unknown account {id}") })?;

        if !account.needs_refresh(chrono::Utc::now().timestamp_millis()) {
            return Ok(account.access_token);
        }
        self.refresh(pool, id, false).await
    }

    /// Refresh unconditionally (the 401 retry path: the current token was
    /// just rejected regardless of its recorded expiry).
    pub async fn force_refresh(&self, pool: &AccountPool, id: &str) -> Result<String> {
        self.refresh(pool, id, true).await
    }

    async fn refresh(&self, pool: &AccountPool, id: &str, force: bool) -> Result<String> {
        let latch = self
            .latches
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _flight = latch.lock().await;

        // Another flight may have completed while we waited.
        let account = pool
            .get(id)
            .ok_or_else(|| ProxyError::Internal { message: format!("unknown account {id}") })?;
        let now = chrono::Utc::now().timestamp_millis();
        if !force && !account.needs_refresh(now) {
            return Ok(account.access_token);
        }

        tracing::debug!(account = %id, email = %account.email, "Refreshing access token");

        let result = self
            .http
            .post(&self.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", account.refresh_token.as_str()),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await;

        let response = match result {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                return Err(self.fail(pool, id, &account.email, format!("{status}: {body}")));
            },
            Err(e) => {
                return Err(self.fail(pool, id, &account.email, e.to_string()));
            },
        };

        let token: TokenResponse = match response.json().await {
            Ok(t) => t,
            Err(e) => {
                return Err(self.fail(pool, id, &account.email, format!("bad token body: {e}")));
            },
        };

        let expiry = chrono::Utc::now().timestamp_millis() + token.expires_in * 1000;
        pool.update_tokens(id, token.access_token.clone(), token.refresh_token, expiry);
        tracing::info!(account = %id, "Access token refreshed");
        Ok(token.access_token)
    }

    fn fail(&self, pool: &AccountPool, id: &str, email: &str, message: String) -> ProxyError {
        tracing::error!(account = %id, email = %email, %message, "Token refresh failed");
        pool.mark_error(id);
        ProxyError::AuthRefreshFailed { email: email.to_string(), message }
    }
}
