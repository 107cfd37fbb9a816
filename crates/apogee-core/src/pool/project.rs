//! Cloud project discovery and onboarding.
//!
//! An account needs a cloudaicompanion project id before the upstream
//! accepts generation calls. Discovery order: configured id, previously
//! discovered id, `:loadCodeAssist`, then `:onboardUser` polling for
//! accounts that have never been onboarded. When everything fails the
//! resolver degrades to a synthesized dummy id; the next upstream call
//! will surface the real error, which is the intended policy.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;
use serde_json::{json, Value};

use apogee_types::Account;

use super::store::AccountPool;
use crate::upstream::DEFAULT_USER_AGENT;

const LOAD_TIMEOUT: Duration = Duration::from_secs(20);
const ONBOARD_POLL_TIMEOUT: Duration = Duration::from_secs(30);
const ONBOARD_POLL_INTERVAL: Duration = Duration::from_secs(2);
const ONBOARD_MAX_ATTEMPTS: usize = 60;

const CLIENT_METADATA: &str =
    r#"{"ideType":"IDE_UNSPECIFIED","platform":"PLATFORM_UNSPECIFIED","pluginType":"GEMINI"}"#;

const DUMMY_ADJECTIVES: &[&str] = &["useful", "swift", "calm", "bright", "quiet", "bold"];
const DUMMY_NOUNS: &[&str] = &["fuji", "cedar", "harbor", "comet", "mesa", "atlas"];

pub struct ProjectResolver {
    http: reqwest::Client,
    base_url: String,
    latches: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl ProjectResolver {
    /// `base_url` is the primary upstream base, e.g.
    /// `https://cloudcode-pa.googleapis.com/v1internal`.
    pub fn new(http: reqwest::Client, base_url: String) -> Self {
        Self { http, base_url, latches: DashMap::new() }
    }

    /// Resolve a project id for the account. Never fails: the degraded
    /// path returns a dummy id and lets the next upstream call report
    /// the misconfiguration.
    pub async fn resolve(&self, pool: &AccountPool, account: &Account, access_token: &str) -> String {
        if let Some(pinned) = &account.configured_project {
            return pinned.clone();
        }
        if let Some(discovered) = &account.discovered_project {
            return discovered.clone();
        }

        let latch = self
            .latches
            .entry(account.id.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _flight = latch.lock().await;

        // A concurrent flight may have finished discovery while we waited.
        if let Some(discovered) = pool.get(&account.id).and_then(|a| a.discovered_project) {
            return discovered;
        }

        match self.discover(account, access_token).await {
            Ok(project) => {
                pool.set_discovered_project(&account.id, project.clone());
                tracing::info!(account = %account.id, %project, "Discovered project id");
                project
            },
            Err(message) => {
                let dummy = dummy_project_id();
                tracing::error!(
                    account = %account.id,
                    email = %account.email,
                    %message,
                    %dummy,
                    "Project discovery failed; continuing with a dummy project id. \
                     Upstream calls for this account will likely be rejected."
                );
                dummy
            },
        }
    }

    async fn discover(&self, account: &Account, access_token: &str) -> Result<String, String> {
        let metadata: Value =
            serde_json::from_str(CLIENT_METADATA).unwrap_or_else(|_| json!({}));

        let load: Value = self
            .post(
                "loadCodeAssist",
                access_token,
                &json!({ "metadata": metadata, "cloudaicompanionProject": null }),
                LOAD_TIMEOUT,
            )
            .await?;

        if let Some(project) = load.get("cloudaicompanionProject").and_then(|v| v.as_str()) {
            if !project.is_empty() {
                return Ok(project.to_string());
            }
        }

        if load.get("currentTier").is_some() {
            return Err("loadCodeAssist returned a tier but no project".to_string());
        }

        let tier_id = default_tier_id(&load);
        tracing::info!(account = %account.id, tier = %tier_id, "Onboarding account");
        self.onboard(access_token, &tier_id, &metadata).await
    }

    async fn onboard(
        &self,
        access_token: &str,
        tier_id: &str,
        metadata: &Value,
    ) -> Result<String, String> {
        let body = json!({
            "tierId": tier_id,
            "metadata": metadata,
            "cloudaicompanionProject": null,
        });

        for attempt in 1..=ONBOARD_MAX_ATTEMPTS {
            let operation: Value = self
                .post("onboardUser", access_token, &body, ONBOARD_POLL_TIMEOUT)
                .await?;

            if operation.get("done").and_then(|v| v.as_bool()).unwrap_or(false) {
                return operation
                    .pointer("/response/cloudaicompanionProject/id")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .ok_or_else(|| "onboarding finished without a project id".to_string());
            }

            tracing::debug!(attempt, "Onboarding not done yet");
            tokio::time::sleep(ONBOARD_POLL_INTERVAL).await;
        }

        Err(format!("onboarding did not complete within {ONBOARD_MAX_ATTEMPTS} attempts"))
    }

    async fn post(
        &self,
        method: &str,
        access_token: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<Value, String> {
        let url = format!("{}:{method}", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(access_token)
            .header(reqwest::header::USER_AGENT, DEFAULT_USER_AGENT)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| format!("{method} request failed: {e}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(format!("{method} returned {status}: {text}"));
        }

        response.json().await.map_err(|e| format!("{method} returned invalid JSON: {e}"))
    }
}

fn default_tier_id(load: &Value) -> String {
    load.get("allowedTiers")
        .and_then(|v| v.as_array())
        .and_then(|tiers| {
            tiers
                .iter()
                .find(|t| t.get("isDefault").and_then(|v| v.as_bool()).unwrap_or(false))
        })
        .and_then(|t| t.get("id").and_then(|v| v.as_str()))
        .unwrap_or("free-tier")
        .to_string()
}

/// `<adjective>-<noun>-<5 hex chars>`, e.g. `calm-cedar-3fa9c`.
fn dummy_project_id() -> String {
    let mut rng = rand::thread_rng();
    let adjective = DUMMY_ADJECTIVES[rng.gen_range(0..DUMMY_ADJECTIVES.len())];
    let noun = DUMMY_NOUNS[rng.gen_range(0..DUMMY_NOUNS.len())];
    let suffix: String = (0..5)
        .map(|_| std::char::from_digit(rng.gen_range(0..16), 16).unwrap_or('0'))
        .collect();
    format!("{adjective}-{noun}-{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use apogee_types::CredentialSeed;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn pool_and_account(project: Option<String>) -> (AccountPool, Account) {
        let pool = AccountPool::new(60_000);
        pool.add(CredentialSeed {
            email: "a@x.com".into(),
            access_token: "at".into(),
            refresh_token: "rt".into(),
            expiry_date: i64::MAX / 2,
            project_id: project,
        });
        let account = pool.get("account-1").unwrap();
        (pool, account)
    }

    fn resolver(uri: &str) -> ProjectResolver {
        ProjectResolver::new(reqwest::Client::new(), format!("{uri}/v1internal"))
    }

    #[tokio::test]
    async fn configured_project_short_circuits() {
        let (pool, account) = pool_and_account(Some("pinned-project".into()));
        let resolver = ProjectResolver::new(
            reqwest::Client::new(),
            "http://127.0.0.1:1/v1internal".into(),
        );
        assert_eq!(resolver.resolve(&pool, &account, "at").await, "pinned-project");
    }

    #[tokio::test]
    async fn load_code_assist_project_is_cached() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1internal:loadCodeAssist"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "cloudaicompanionProject": "real-project-1",
                "currentTier": {"id": "free-tier"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let (pool, account) = pool_and_account(None);
        let resolver = resolver(&server.uri());

        assert_eq!(resolver.resolve(&pool, &account, "at").await, "real-project-1");
        assert_eq!(
            pool.get("account-1").unwrap().discovered_project.as_deref(),
            Some("real-project-1")
        );

        // Second resolve hits the cache (mock expects exactly one call).
        let account = pool.get("account-1").unwrap();
        assert_eq!(resolver.resolve(&pool, &account, "at").await, "real-project-1");
    }

    #[tokio::test]
    async fn onboards_when_no_tier_is_set() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1internal:loadCodeAssist"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "allowedTiers": [
                    {"id": "standard-tier", "isDefault": false},
                    {"id": "legacy-tier", "isDefault": true}
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1internal:onboardUser"))
            .and(body_partial_json(serde_json::json!({"tierId": "legacy-tier"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "done": true,
                "response": {"cloudaicompanionProject": {"id": "onboarded-7"}}
            })))
            .mount(&server)
            .await;

        let (pool, account) = pool_and_account(None);
        assert_eq!(resolver(&server.uri()).resolve(&pool, &account, "at").await, "onboarded-7");
    }

    #[tokio::test]
    async fn failure_degrades_to_dummy_id_without_caching() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1internal:loadCodeAssist"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let (pool, account) = pool_and_account(None);
        let id = resolver(&server.uri()).resolve(&pool, &account, "at").await;

        // shape: adjective-noun-xxxxx
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[2].len(), 5);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));

        // Dummy ids are never cached; recovery stays possible.
        assert!(pool.get("account-1").unwrap().discovered_project.is_none());
    }

    #[test]
    fn default_tier_falls_back_to_free_tier() {
        assert_eq!(default_tier_id(&serde_json::json!({})), "free-tier");
        assert_eq!(
            default_tier_id(&serde_json::json!({
                "allowedTiers": [{"id": "t1", "isDefault": true}]
            })),
            "t1"
        );
    }
}
