//! In-memory credential store.
//!
//! Accounts live only in process memory, in insertion order (the order
//! determines id numbering and breaks selection ties). All mutation goes
//! through this type under one coarse lock; pool sizes are small, so
//! O(accounts) scans under the lock are fine.

use std::sync::RwLock;

use apogee_types::{Account, AccountStatus, AddOutcome, CredentialSeed};

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Process-wide account store.
pub struct AccountPool {
    accounts: RwLock<Vec<Account>>,
    cooldown_base_ms: i64,
}

impl AccountPool {
    pub fn new(cooldown_base_ms: i64) -> Self {
        Self { accounts: RwLock::new(Vec::new()), cooldown_base_ms }
    }

    /// Seed the pool from configuration, preserving order.
    pub fn from_seeds(seeds: Vec<CredentialSeed>, cooldown_base_ms: i64) -> Self {
        let pool = Self::new(cooldown_base_ms);
        for seed in seeds {
            let outcome = pool.add(seed);
            tracing::info!(id = %outcome.id, "Loaded account into pool");
        }
        pool
    }

    /// Add a credential. Adding an email that already exists updates that
    /// account in place (fresh tokens, health reset) instead of growing
    /// the pool.
    pub fn add(&self, seed: CredentialSeed) -> AddOutcome {
        let mut accounts = self.accounts.write().expect("account pool lock poisoned");

        if let Some((idx, existing)) =
            accounts.iter_mut().enumerate().find(|(_, a)| a.email == seed.email)
        {
            existing.reseed(seed);
            return AddOutcome { id: existing.id.clone(), rank: idx + 1, is_new: false };
        }

        let rank = accounts.len() + 1;
        let id = format!("account-{rank}");
        accounts.push(Account::new(id.clone(), seed));
        AddOutcome { id, rank, is_new: true }
    }

    pub fn get(&self, id: &str) -> Option<Account> {
        self.accounts.read().expect("account pool lock poisoned").iter().find(|a| a.id == id).cloned()
    }

    /// All accounts, insertion order, with elapsed cooldowns expired.
    pub fn list(&self) -> Vec<Account> {
        self.expire_cooldowns();
        self.accounts.read().expect("account pool lock poisoned").clone()
    }

    pub fn list_ids(&self) -> Vec<String> {
        self.accounts
            .read()
            .expect("account pool lock poisoned")
            .iter()
            .map(|a| a.id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.accounts.read().expect("account pool lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ready accounts, insertion order. Expires elapsed cooldowns first.
    pub fn ready_accounts(&self) -> Vec<Account> {
        self.expire_cooldowns();
        self.accounts
            .read()
            .expect("account pool lock poisoned")
            .iter()
            .filter(|a| a.status == AccountStatus::Ready)
            .cloned()
            .collect()
    }

    pub fn mark_success(&self, id: &str) {
        self.with_account(id, |a| a.note_success(now_ms()));
    }

    pub fn mark_cooldown(&self, id: &str) {
        let base = self.cooldown_base_ms;
        self.with_account(id, |a| {
            let until = a.note_rate_limit(now_ms(), base);
            tracing::warn!(
                account = %a.id,
                consecutive = a.consecutive_errors,
                until_ms = until,
                "Account entering cooldown"
            );
        });
    }

    pub fn mark_error(&self, id: &str) {
        self.with_account(id, |a| {
            a.note_auth_failure();
            tracing::error!(account = %a.id, email = %a.email, "Account marked as errored");
        });
    }

    /// Flip every elapsed cooldown back to ready.
    pub fn expire_cooldowns(&self) {
        let now = now_ms();
        let mut accounts = self.accounts.write().expect("account pool lock poisoned");
        for account in accounts.iter_mut() {
            if account.expire_cooldown(now) {
                tracing::info!(account = %account.id, "Cooldown expired, account ready again");
            }
        }
    }

    /// Earliest `cooldown_until` across cooling accounts, if any.
    pub fn earliest_cooldown_end(&self) -> Option<i64> {
        self.accounts
            .read()
            .expect("account pool lock poisoned")
            .iter()
            .filter_map(|a| a.cooldown_until)
            .min()
    }

    /// Store a refreshed access token (and optionally rotated refresh
    /// token) for an account.
    pub fn update_tokens(
        &self,
        id: &str,
        access_token: String,
        refresh_token: Option<String>,
        expiry_ms: i64,
    ) {
        self.with_account(id, |a| {
            a.access_token = access_token;
            if let Some(rt) = refresh_token {
                a.refresh_token = rt;
            }
            a.expiry = expiry_ms;
        });
    }

    /// Cache a discovered project id on an account.
    pub fn set_discovered_project(&self, id: &str, project: String) {
        self.with_account(id, |a| a.discovered_project = Some(project));
    }

    fn with_account(&self, id: &str, f: impl FnOnce(&mut Account)) {
        let mut accounts = self.accounts.write().expect("account pool lock poisoned");
        if let Some(account) = accounts.iter_mut().find(|a| a.id == id) {
            f(account);
        }
    }
}
