//! Account model: one authenticated upstream identity with refreshable
//! OAuth credentials and its health/usage counters.

use serde::{Deserialize, Serialize};

/// Access tokens are refreshed this long before their recorded expiry.
pub const REFRESH_BUFFER_MS: i64 = 5 * 60 * 1000;

/// Exponent cap for the cooldown backoff: the schedule saturates at 64×.
pub const BACKOFF_CAP_EXP: u32 = 6;

/// Health state of an account.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    /// Eligible for selection.
    Ready,
    /// Cooling down after a rate limit; recovers when `cooldown_until` passes.
    Cooldown,
    /// Non-recoverable auth failure; excluded until credentials are replaced.
    Error,
}

/// Credential material as supplied by the environment
/// (`ANTIGRAVITY_ACCOUNTS_<N>` JSON objects) or by the OAuth callback.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CredentialSeed {
    pub email: String,
    pub access_token: String,
    pub refresh_token: String,
    /// Access-token expiry, milliseconds since epoch.
    pub expiry_date: i64,
    /// Operator-pinned project id; skips discovery entirely when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
}

/// Result of inserting a credential into the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddOutcome {
    pub id: String,
    /// 1-based insertion rank.
    pub rank: usize,
    /// False when an existing account with the same email was updated.
    pub is_new: bool,
}

/// One pooled upstream account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
    /// Stable identifier, `account-N` where N is the insertion rank.
    pub id: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub access_token: String,
    #[serde(skip_serializing)]
    pub refresh_token: String,
    /// Access-token expiry, milliseconds since epoch.
    pub expiry: i64,
    /// Project id pinned via configuration.
    pub configured_project: Option<String>,
    /// Project id discovered via loadCodeAssist/onboardUser.
    pub discovered_project: Option<String>,
    pub status: AccountStatus,
    /// Set iff status is `Cooldown`.
    pub cooldown_until: Option<i64>,
    pub request_count: u64,
    pub error_count: u64,
    pub consecutive_errors: u32,
    /// Milliseconds since epoch of the last successful request.
    pub last_used: Option<i64>,
}

impl Account {
    pub fn new(id: String, seed: CredentialSeed) -> Self {
        Self {
            id,
            email: seed.email,
            access_token: seed.access_token,
            refresh_token: seed.refresh_token,
            expiry: seed.expiry_date,
            configured_project: seed.project_id,
            discovered_project: None,
            status: AccountStatus::Ready,
            cooldown_until: None,
            request_count: 0,
            error_count: 0,
            consecutive_errors: 0,
            last_used: None,
        }
    }

    /// Re-seed an existing account (same email added again): replace the
    /// credential material and reset health, keeping id and usage history.
    pub fn reseed(&mut self, seed: CredentialSeed) {
        self.access_token = seed.access_token;
        self.refresh_token = seed.refresh_token;
        self.expiry = seed.expiry_date;
        if seed.project_id.is_some() {
            self.configured_project = seed.project_id;
        }
        self.status = AccountStatus::Ready;
        self.cooldown_until = None;
        self.consecutive_errors = 0;
        self.error_count = 0;
    }

    /// Record a successful request: bumps usage, clears any cooldown or
    /// error state and resets the consecutive-failure counter.
    pub fn note_success(&mut self, now_ms: i64) {
        self.request_count += 1;
        self.last_used = Some(now_ms);
        self.consecutive_errors = 0;
        self.status = AccountStatus::Ready;
        self.cooldown_until = None;
    }

    /// Record a rate limit: schedules a cooldown with exponential backoff
    /// (base × 2^min(k−1, 6) for the k-th consecutive failure) and returns
    /// the computed `cooldown_until`.
    pub fn note_rate_limit(&mut self, now_ms: i64, base_ms: i64) -> i64 {
        self.consecutive_errors += 1;
        self.error_count += 1;
        let exp = (self.consecutive_errors - 1).min(BACKOFF_CAP_EXP);
        let until = now_ms + base_ms * (1i64 << exp);
        self.status = AccountStatus::Cooldown;
        self.cooldown_until = Some(until);
        until
    }

    /// Record a non-recoverable auth failure. No recovery is scheduled.
    pub fn note_auth_failure(&mut self) {
        self.status = AccountStatus::Error;
        self.error_count += 1;
    }

    /// Lazily expire an elapsed cooldown. Returns true if the account
    /// transitioned back to `Ready`.
    pub fn expire_cooldown(&mut self, now_ms: i64) -> bool {
        if self.status == AccountStatus::Cooldown
            && self.cooldown_until.is_some_and(|until| until <= now_ms)
        {
            self.status = AccountStatus::Ready;
            self.cooldown_until = None;
            return true;
        }
        false
    }

    /// Whether the access token should be refreshed before use.
    pub fn needs_refresh(&self, now_ms: i64) -> bool {
        now_ms + REFRESH_BUFFER_MS >= self.expiry
    }

    /// The project id to use, preferring the configured one.
    pub fn project(&self) -> Option<&str> {
        self.configured_project.as_deref().or(self.discovered_project.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(email: &str) -> CredentialSeed {
        CredentialSeed {
            email: email.to_string(),
            access_token: "at".into(),
            refresh_token: "rt".into(),
            expiry_date: 2_000_000,
            project_id: None,
        }
    }

    #[test]
    fn backoff_doubles_then_saturates() {
        let mut a = Account::new("account-1".into(), seed("a@x"));
        let now = 1_000_000;
        let base = 60_000;

        let expected = [1, 2, 4, 8, 16, 32, 64, 64, 64];
        for (k, factor) in expected.iter().enumerate() {
            let until = a.note_rate_limit(now, base);
            assert_eq!(until - now, base * factor, "k={}", k + 1);
            assert_eq!(a.status, AccountStatus::Cooldown);
        }
        assert_eq!(a.consecutive_errors, 9);
        assert_eq!(a.error_count, 9);
    }

    #[test]
    fn success_resets_failure_state() {
        let mut a = Account::new("account-1".into(), seed("a@x"));
        a.note_rate_limit(0, 60_000);
        a.note_rate_limit(0, 60_000);

        a.note_success(5_000);
        assert_eq!(a.status, AccountStatus::Ready);
        assert_eq!(a.cooldown_until, None);
        assert_eq!(a.consecutive_errors, 0);
        assert_eq!(a.request_count, 1);
        assert_eq!(a.last_used, Some(5_000));

        // The next failure starts the schedule over at 1×.
        let until = a.note_rate_limit(10_000, 60_000);
        assert_eq!(until, 70_000);
    }

    #[test]
    fn cooldown_expires_lazily() {
        let mut a = Account::new("account-1".into(), seed("a@x"));
        let until = a.note_rate_limit(1_000, 60_000);

        assert!(!a.expire_cooldown(until - 1));
        assert_eq!(a.status, AccountStatus::Cooldown);

        assert!(a.expire_cooldown(until));
        assert_eq!(a.status, AccountStatus::Ready);
        assert_eq!(a.cooldown_until, None);
    }

    #[test]
    fn reseed_replaces_credentials_and_resets_health() {
        let mut a = Account::new("account-1".into(), seed("a@x"));
        a.note_auth_failure();

        let mut fresh = seed("a@x");
        fresh.access_token = "at2".into();
        a.reseed(fresh);

        assert_eq!(a.access_token, "at2");
        assert_eq!(a.status, AccountStatus::Ready);
        assert_eq!(a.error_count, 0);
    }

    #[test]
    fn refresh_buffer_is_five_minutes() {
        let a = Account::new("account-1".into(), seed("a@x"));
        assert!(!a.needs_refresh(2_000_000 - REFRESH_BUFFER_MS - 1));
        assert!(a.needs_refresh(2_000_000 - REFRESH_BUFFER_MS));
    }
}
