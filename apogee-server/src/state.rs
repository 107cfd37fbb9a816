//! Application state: the wired-together core components.

use std::sync::Arc;
use std::time::Duration;

use apogee_core::pool::{AccountPool, ProjectResolver, QuotaTracker, TokenRefresher};
use apogee_core::upstream::{resolve_base_urls, UpstreamClient, DEFAULT_USER_AGENT};
use apogee_core::Dispatcher;
use apogee_types::ProxyConfig;

pub struct AppState {
    pub config: ProxyConfig,
    pub dispatcher: Dispatcher,
}

impl AppState {
    pub fn new(config: ProxyConfig) -> anyhow::Result<Arc<Self>> {
        // One long-lived client for everything. No global timeout here:
        // streaming bodies are unbounded, and unary calls set per-request
        // timeouts in the transport.
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(20))
            .pool_max_idle_per_host(16)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .user_agent(DEFAULT_USER_AGENT)
            .build()?;

        let base_urls = resolve_base_urls(None);
        let primary_base = base_urls[0].clone();

        let pool = Arc::new(AccountPool::from_seeds(
            config.accounts.clone(),
            config.cooldown_duration_ms,
        ));
        let refresher = Arc::new(TokenRefresher::new(
            http.clone(),
            config.client_id.clone(),
            config.client_secret.clone(),
        ));
        let resolver = Arc::new(ProjectResolver::new(http.clone(), primary_base.clone()));
        let quota = Arc::new(QuotaTracker::new(http.clone(), primary_base));
        let upstream =
            Arc::new(UpstreamClient::new(http, base_urls, pool.clone(), refresher.clone()));

        let dispatcher = Dispatcher::new(
            pool,
            refresher,
            resolver,
            quota,
            upstream,
            config.max_retry_accounts,
        );

        Ok(Arc::new(Self { config, dispatcher }))
    }

    pub fn account_count(&self) -> usize {
        self.dispatcher.pool().len()
    }
}
