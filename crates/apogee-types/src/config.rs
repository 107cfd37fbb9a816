//! Runtime configuration, loaded from the environment at startup.
//!
//! Accounts arrive as a numbered series `ANTIGRAVITY_ACCOUNTS_1`,
//! `ANTIGRAVITY_ACCOUNTS_2`, … of JSON objects; the series terminates at
//! the first missing index, and malformed entries are skipped with a
//! warning so one bad credential does not take the pool down.

use crate::account::CredentialSeed;

pub const DEFAULT_PORT: u16 = 8046;
pub const DEFAULT_COOLDOWN_MS: i64 = 60_000;
pub const DEFAULT_MAX_RETRY_ACCOUNTS: usize = 3;

/// Process-wide configuration.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub port: u16,
    /// When set, `/v1/*` requests must present this key.
    pub api_key: Option<String>,
    pub client_id: String,
    pub client_secret: String,
    /// Cooldown backoff base in milliseconds.
    pub cooldown_duration_ms: i64,
    /// Upper bound on account failovers per logical request.
    pub max_retry_accounts: usize,
    pub accounts: Vec<CredentialSeed>,
}

impl ProxyConfig {
    /// Load from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load via an arbitrary lookup function. Split out so tests don't
    /// mutate process-global state.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let port = lookup("PORT").and_then(|v| v.parse().ok()).unwrap_or(DEFAULT_PORT);

        let api_key = lookup("PROXY_API_KEY").filter(|k| !k.is_empty());

        let client_id = lookup("ANTIGRAVITY_CLIENT_ID").unwrap_or_default();
        let client_secret = lookup("ANTIGRAVITY_CLIENT_SECRET").unwrap_or_default();

        let cooldown_duration_ms = lookup("COOLDOWN_DURATION_MS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_COOLDOWN_MS);

        let max_retry_accounts = lookup("MAX_RETRY_ACCOUNTS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_RETRY_ACCOUNTS);

        let mut accounts = Vec::new();
        for n in 1.. {
            let key = format!("ANTIGRAVITY_ACCOUNTS_{n}");
            let Some(raw) = lookup(&key) else {
                break;
            };
            match serde_json::from_str::<CredentialSeed>(&raw) {
                Ok(seed) => accounts.push(seed),
                Err(e) => {
                    tracing::warn!("Skipping malformed {}: {}", key, e);
                },
            }
        }

        Self {
            port,
            api_key,
            client_id,
            client_secret,
            cooldown_duration_ms,
            max_retry_accounts,
            accounts,
        }
    }
}
