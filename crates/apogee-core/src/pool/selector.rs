//! Quota-aware account selection.
//!
//! Scoring favors fresh available quota first, then spreads load toward
//! the least-used and least-recently-used accounts; never-used accounts
//! get a warm-in bonus so the whole pool sees traffic early.

use apogee_types::{Account, QuotaStatus};

use super::quota::QuotaView;
use super::store::AccountPool;

const QUOTA_WEIGHT: f64 = 1000.0;
const EXHAUSTED_PENALTY: f64 = -5000.0;
const USAGE_WEIGHT: f64 = -0.1;
const NEVER_USED_BONUS: f64 = 4000.0;
const RECENCY_CAP_SECS: f64 = 3600.0;

/// Pick the best ready account for `model`, or `None` when nothing is
/// ready. Ties go to the earlier-inserted account.
pub fn pick_account(
    pool: &AccountPool,
    quota: &dyn QuotaView,
    model: Option<&str>,
) -> Option<Account> {
    let ready = pool.ready_accounts();
    if ready.is_empty() {
        return None;
    }

    let now_ms = chrono::Utc::now().timestamp_millis();
    let mut best: Option<(f64, Account)> = None;

    for account in ready {
        let s = score(&account, quota, model, now_ms);
        // Strictly-greater keeps the first (earliest-inserted) of equals.
        let improves = best.as_ref().map_or(true, |(best_score, _)| s > *best_score);
        if improves {
            best = Some((s, account));
        }
    }

    best.map(|(_, account)| account)
}

fn score(account: &Account, quota: &dyn QuotaView, model: Option<&str>, now_ms: i64) -> f64 {
    let mut total = 0.0;

    if let Some(model) = model {
        if let Some(entry) = quota.entry(&account.id, model) {
            total += QUOTA_WEIGHT * entry.remaining_fraction;
            if entry.status() == QuotaStatus::Exhausted {
                total += EXHAUSTED_PENALTY;
            }
        }
    }

    total += USAGE_WEIGHT * account.request_count as f64;

    total += match account.last_used {
        None => NEVER_USED_BONUS,
        Some(last) => {
            let idle_secs = ((now_ms - last) as f64 / 1000.0).max(0.0);
            idle_secs.min(RECENCY_CAP_SECS)
        },
    };

    total
}
