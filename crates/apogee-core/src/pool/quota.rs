//! Per-account per-model quota tracking.
//!
//! The tracker fetches remaining-fraction data on demand via
//! `:fetchAvailableModels` and caches it; the selector consumes the cache
//! through the read-only [`QuotaView`] trait, which breaks the
//! accounts ↔ quota dependency cycle at the type level.

use std::time::Duration;

use dashmap::DashMap;
use serde_json::{json, Value};

use apogee_types::{Account, AccountQuotaSnapshot, ModelQuota, QuotaEntry};

use crate::upstream::DEFAULT_USER_AGENT;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Read-only quota lookup, as the selector sees it.
pub trait QuotaView: Send + Sync {
    fn entry(&self, account_id: &str, model: &str) -> Option<QuotaEntry>;
}

/// Just enough account material to authenticate a quota fetch. Built by
/// the wiring layer from the pool + refresher so the tracker never holds
/// the pool type itself.
#[derive(Debug, Clone)]
pub struct AccountAuth {
    pub account_id: String,
    pub email: String,
    pub access_token: String,
    /// Resolved project id, or empty when none is known yet.
    pub project: String,
}

pub struct QuotaTracker {
    http: reqwest::Client,
    base_url: String,
    entries: DashMap<(String, String), QuotaEntry>,
}

impl QuotaTracker {
    pub fn new(http: reqwest::Client, base_url: String) -> Self {
        Self { http, base_url, entries: DashMap::new() }
    }

    /// Fetch and cache quota for one account. Returns the number of
    /// models upserted.
    pub async fn refresh_account(&self, auth: &AccountAuth) -> Result<usize, String> {
        let url = format!("{}:fetchAvailableModels", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&auth.access_token)
            .header(reqwest::header::USER_AGENT, DEFAULT_USER_AGENT)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .timeout(FETCH_TIMEOUT)
            .json(&json!({ "project": auth.project }))
            .send()
            .await
            .map_err(|e| format!("fetchAvailableModels failed: {e}"))?;

        if !response.status().is_success() {
            return Err(format!("fetchAvailableModels returned {}", response.status()));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| format!("fetchAvailableModels returned invalid JSON: {e}"))?;

        let now = chrono::Utc::now().timestamp_millis();
        let mut count = 0;

        if let Some(models) = body.get("models").and_then(|v| v.as_object()) {
            for (model_name, info) in models {
                let Some(quota_info) = info.get("quotaInfo") else {
                    continue;
                };
                let remaining = quota_info
                    .get("remainingFraction")
                    .and_then(|v| v.as_f64())
                    .unwrap_or(0.0)
                    .clamp(0.0, 1.0);
                let reset_time = quota_info
                    .get("resetTime")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);

                self.entries.insert(
                    (auth.account_id.clone(), model_name.clone()),
                    QuotaEntry { remaining_fraction: remaining, reset_time, last_fetched_at: now },
                );
                count += 1;
            }
        }

        tracing::debug!(account = %auth.account_id, models = count, "Quota refreshed");
        Ok(count)
    }

    /// Fan out a refresh across accounts, gathering everything and
    /// ignoring individual failures.
    pub async fn refresh_all(&self, auths: Vec<AccountAuth>) {
        let results = futures::future::join_all(
            auths.iter().map(|auth| self.refresh_account(auth)),
        )
        .await;

        for (auth, result) in auths.iter().zip(results) {
            if let Err(e) = result {
                tracing::warn!(account = %auth.account_id, error = %e, "Quota refresh failed");
            }
        }
    }

    /// Snapshot quota state for the given accounts, models sorted by name.
    pub fn snapshot(&self, accounts: &[Account]) -> Vec<AccountQuotaSnapshot> {
        accounts
            .iter()
            .map(|account| {
                let mut models: Vec<ModelQuota> = self
                    .entries
                    .iter()
                    .filter(|e| e.key().0 == account.id)
                    .map(|e| ModelQuota {
                        model_name: e.key().1.clone(),
                        quota: e.value().remaining_fraction,
                        reset_time: e.value().reset_time.clone(),
                        status: e.value().status(),
                    })
                    .collect();
                models.sort_by(|a, b| a.model_name.cmp(&b.model_name));

                let last_fetched_at = self
                    .entries
                    .iter()
                    .filter(|e| e.key().0 == account.id)
                    .map(|e| e.value().last_fetched_at)
                    .max();

                AccountQuotaSnapshot {
                    account_id: account.id.clone(),
                    email: account.email.clone(),
                    status: account.status,
                    models,
                    last_fetched_at,
                }
            })
            .collect()
    }
}

impl QuotaView for QuotaTracker {
    fn entry(&self, account_id: &str, model: &str) -> Option<QuotaEntry> {
        self.entries
            .get(&(account_id.to_string(), model.to_string()))
            .map(|e| e.clone())
    }
}
