//! Request dispatch: executes one logical request against the pool with
//! at-most-N account failovers.
//!
//! A 429 from the upstream cools the selected account down and moves on
//! to the next candidate; any other error propagates. Streaming requests
//! fail over only until response headers arrive. Once the transport has
//! returned a body stream, failover would mean replaying partial output,
//! so mid-stream errors surface in the client dialect instead.

use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use futures::Stream;
use serde_json::Value;

use apogee_types::{Account, ProxyError, Result};

use crate::pool::{
    pick_account, AccountAuth, AccountPool, ProjectResolver, QuotaTracker, TokenRefresher,
};
use crate::upstream::UpstreamClient;

const UNARY_METHOD: &str = "generateContent";
const STREAM_METHOD: &str = "streamGenerateContent";
const STREAM_QUERY: &str = "alt=sse";

/// Fallback `Retry-After` when no cooldown end is known.
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

pub type UpstreamByteStream =
    Pin<Box<dyn Stream<Item = std::result::Result<Bytes, reqwest::Error>> + Send>>;

pub struct Dispatcher {
    pool: Arc<AccountPool>,
    refresher: Arc<TokenRefresher>,
    resolver: Arc<ProjectResolver>,
    quota: Arc<QuotaTracker>,
    upstream: Arc<UpstreamClient>,
    max_retry_accounts: usize,
}

impl Dispatcher {
    pub fn new(
        pool: Arc<AccountPool>,
        refresher: Arc<TokenRefresher>,
        resolver: Arc<ProjectResolver>,
        quota: Arc<QuotaTracker>,
        upstream: Arc<UpstreamClient>,
        max_retry_accounts: usize,
    ) -> Self {
        Self { pool, refresher, resolver, quota, upstream, max_retry_accounts }
    }

    pub fn pool(&self) -> &Arc<AccountPool> {
        &self.pool
    }

    pub fn quota(&self) -> &Arc<QuotaTracker> {
        &self.quota
    }

    /// Execute a unary request. `build` produces the upstream body given
    /// the selected account's project id.
    pub async fn unary(
        &self,
        model: Option<&str>,
        build: impl Fn(&str) -> Value,
    ) -> Result<Value> {
        let attempts = self.attempts()?;

        for attempt in 1..=attempts {
            let (account, project) = self.next_candidate(model).await?;
            let body = build(&project);

            match self.upstream.post_json(&account.id, UNARY_METHOD, &body).await {
                Ok(response) => {
                    self.pool.mark_success(&account.id);
                    return Ok(response);
                },
                Err(ProxyError::RateLimited { .. }) => {
                    tracing::warn!(
                        account = %account.id,
                        attempt,
                        attempts,
                        "Rate limited, rotating to next account"
                    );
                    self.pool.mark_cooldown(&account.id);
                },
                Err(other) => return Err(other),
            }
        }

        Err(self.exhausted())
    }

    /// Execute a streaming request, returning the upstream byte stream as
    /// soon as headers arrive. The selected account is marked successful
    /// at that point; everything after is the stream pipeline's problem.
    pub async fn stream(
        &self,
        model: Option<&str>,
        build: impl Fn(&str) -> Value,
    ) -> Result<UpstreamByteStream> {
        let attempts = self.attempts()?;

        for attempt in 1..=attempts {
            let (account, project) = self.next_candidate(model).await?;
            let body = build(&project);

            match self
                .upstream
                .post_stream(&account.id, STREAM_METHOD, Some(STREAM_QUERY), &body)
                .await
            {
                Ok(stream) => {
                    self.pool.mark_success(&account.id);
                    return Ok(Box::pin(stream));
                },
                Err(ProxyError::RateLimited { .. }) => {
                    tracing::warn!(
                        account = %account.id,
                        attempt,
                        attempts,
                        "Rate limited before headers, rotating to next account"
                    );
                    self.pool.mark_cooldown(&account.id);
                },
                Err(other) => return Err(other),
            }
        }

        Err(self.exhausted())
    }

    /// Build the authentication material for a quota fan-out across ready
    /// accounts. Accounts whose token refresh fails are skipped.
    pub async fn quota_auths(&self) -> Vec<AccountAuth> {
        let mut auths = Vec::new();
        for account in self.pool.ready_accounts() {
            match self.refresher.ensure_fresh(&self.pool, &account.id).await {
                Ok(access_token) => auths.push(AccountAuth {
                    account_id: account.id.clone(),
                    email: account.email.clone(),
                    access_token,
                    project: account.project().unwrap_or_default().to_string(),
                }),
                Err(e) => {
                    tracing::warn!(account = %account.id, error = %e, "Skipping quota fetch");
                },
            }
        }
        auths
    }

    /// Best-effort quota refresh across all ready accounts.
    pub async fn refresh_all_quota(&self) {
        let auths = self.quota_auths().await;
        self.quota.refresh_all(auths).await;
    }

    fn attempts(&self) -> Result<usize> {
        let pool_size = self.pool.len();
        if pool_size == 0 {
            return Err(ProxyError::NoAccounts);
        }
        Ok(self.max_retry_accounts.min(pool_size))
    }

    async fn next_candidate(&self, model: Option<&str>) -> Result<(Account, String)> {
        let account = pick_account(&self.pool, self.quota.as_ref(), model)
            .ok_or_else(|| self.exhausted())?;

        let access_token = self.refresher.ensure_fresh(&self.pool, &account.id).await?;
        let project = self.resolver.resolve(&self.pool, &account, &access_token).await;
        Ok((account, project))
    }

    /// 429 with a `Retry-After` derived from the earliest cooldown end.
    fn exhausted(&self) -> ProxyError {
        let retry_after_secs = self
            .pool
            .earliest_cooldown_end()
            .map(|end| {
                let delta_ms = end - chrono::Utc::now().timestamp_millis();
                ((delta_ms.max(0) + 999) / 1000).max(1) as u64
            })
            .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
        ProxyError::RateLimitExhausted { retry_after_secs }
    }
}
