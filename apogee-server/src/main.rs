//! Apogee: OpenAI- and Anthropic-compatible reverse proxy for the
//! Antigravity upstream.
//!
//! Serves `/v1/chat/completions` and `/v1/messages` over a pool of
//! OAuth-authenticated upstream accounts with quota-aware selection and
//! rate-limit-driven rotation. Accounts come from `ANTIGRAVITY_ACCOUNTS_N`
//! environment variables; nothing is persisted to disk.

use std::net::SocketAddr;

use anyhow::Result;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use apogee_types::ProxyConfig;

mod handlers;
mod middleware;
mod router;
mod state;

use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = ProxyConfig::from_env();
    let port = config.port;

    if config.accounts.is_empty() {
        warn!("No accounts configured; every request will return 503");
    }
    if config.api_key.is_none() {
        warn!("PROXY_API_KEY not set; accepting unauthenticated requests");
    }

    let state = AppState::new(config)?;
    info!("Loaded {} account(s) into the pool", state.account_count());

    let app = router::build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Apogee listening on http://{}", addr);
    info!("OpenAI endpoint:    POST /v1/chat/completions");
    info!("Anthropic endpoint: POST /v1/messages");

    axum::serve(listener, app).await?;
    Ok(())
}
