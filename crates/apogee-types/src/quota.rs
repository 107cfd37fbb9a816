//! Quota cache entries and the snapshot shapes served by `/v1/quota`.

use serde::{Deserialize, Serialize};

use crate::account::AccountStatus;

/// Remaining fraction at or below which a model counts as exhausted.
pub const EXHAUSTED_THRESHOLD: f64 = 0.01;

/// Availability of one (account, model) pair.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QuotaStatus {
    Available,
    Exhausted,
}

/// Cached remaining-fraction for one (account, model) pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuotaEntry {
    /// Remaining fraction in [0, 1].
    pub remaining_fraction: f64,
    /// Upstream-provided reset time, verbatim (RFC 3339 string).
    pub reset_time: Option<String>,
    /// Milliseconds since epoch when this entry was fetched.
    pub last_fetched_at: i64,
}

impl QuotaEntry {
    pub fn status(&self) -> QuotaStatus {
        if self.remaining_fraction > EXHAUSTED_THRESHOLD {
            QuotaStatus::Available
        } else {
            QuotaStatus::Exhausted
        }
    }
}

/// One row of the per-account quota view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelQuota {
    pub model_name: String,
    /// Remaining fraction in [0, 1].
    pub quota: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_time: Option<String>,
    pub status: QuotaStatus,
}

/// Snapshot of one account's quota state, models sorted by name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountQuotaSnapshot {
    pub account_id: String,
    pub email: String,
    pub status: AccountStatus,
    pub models: Vec<ModelQuota>,
    /// Most recent fetch across this account's entries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_fetched_at: Option<i64>,
}
