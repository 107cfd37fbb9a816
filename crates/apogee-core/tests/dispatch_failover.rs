//! End-to-end dispatch scenarios against a mocked upstream: rotation on
//! 429, pool exhaustion, and streaming failover before headers.

use std::sync::Arc;

use futures::StreamExt;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use apogee_core::dispatch::Dispatcher;
use apogee_core::mappers::openai::openai_sse_stream;
use apogee_core::pool::{AccountPool, ProjectResolver, QuotaTracker, TokenRefresher};
use apogee_core::upstream::UpstreamClient;
use apogee_types::{AccountStatus, CredentialSeed, ProxyError};

fn seed(n: usize) -> CredentialSeed {
    CredentialSeed {
        email: format!("user{n}@x.com"),
        access_token: format!("tok-{n}"),
        refresh_token: format!("rt-{n}"),
        expiry_date: i64::MAX / 2,
        // Pinned project: discovery never fires in these tests.
        project_id: Some(format!("proj-{n}")),
    }
}

fn dispatcher(server: &MockServer, accounts: usize, max_retry: usize) -> Dispatcher {
    let base = format!("{}/v1internal", server.uri());
    let pool = Arc::new(AccountPool::from_seeds(
        (1..=accounts).map(seed).collect(),
        60_000,
    ));
    let refresher = Arc::new(TokenRefresher::new(
        reqwest::Client::new(),
        "cid".into(),
        "cs".into(),
    ));
    let resolver = Arc::new(ProjectResolver::new(reqwest::Client::new(), base.clone()));
    let quota = Arc::new(QuotaTracker::new(reqwest::Client::new(), base.clone()));
    let upstream = Arc::new(UpstreamClient::new(
        reqwest::Client::new(),
        vec![base],
        pool.clone(),
        refresher.clone(),
    ));
    Dispatcher::new(pool, refresher, resolver, quota, upstream, max_retry)
}

fn success_body() -> serde_json::Value {
    serde_json::json!({
        "response": {
            "candidates": [{
                "content": { "parts": [{ "text": "hello from account 2" }], "role": "model" },
                "finishReason": "STOP"
            }],
            "usageMetadata": { "promptTokenCount": 2, "candidatesTokenCount": 5 }
        }
    })
}

#[tokio::test]
async fn rotation_under_rate_limit() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1internal:generateContent"))
        .and(header("authorization", "Bearer tok-1"))
        .respond_with(ResponseTemplate::new(429).set_body_string("{}"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1internal:generateContent"))
        .and(header("authorization", "Bearer tok-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(success_body()))
        .expect(1)
        .mount(&server)
        .await;

    let dispatcher = dispatcher(&server, 3, 3);
    let response = dispatcher
        .unary(Some("gemini-3-flash"), |project| {
            serde_json::json!({ "project": project, "request": { "contents": [] } })
        })
        .await
        .expect("second account should succeed");

    assert_eq!(
        response["response"]["candidates"][0]["content"]["parts"][0]["text"],
        "hello from account 2"
    );

    let pool = dispatcher.pool();
    let first = pool.get("account-1").unwrap();
    assert_eq!(first.status, AccountStatus::Cooldown);
    assert_eq!(first.consecutive_errors, 1);
    let delta = first.cooldown_until.unwrap() - chrono::Utc::now().timestamp_millis();
    assert!((55_000..=61_000).contains(&delta), "cooldown ≈60s, got {delta}ms");

    let second = pool.get("account-2").unwrap();
    assert_eq!(second.status, AccountStatus::Ready);
    assert_eq!(second.request_count, 1);
}

#[tokio::test]
async fn exhaustion_returns_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1internal:generateContent"))
        .respond_with(ResponseTemplate::new(429).set_body_string("{}"))
        .expect(2)
        .mount(&server)
        .await;

    let dispatcher = dispatcher(&server, 2, 3);
    let err = dispatcher
        .unary(Some("gemini-3-flash"), |_| serde_json::json!({}))
        .await
        .unwrap_err();

    let ProxyError::RateLimitExhausted { retry_after_secs } = err else {
        panic!("expected RateLimitExhausted, got {err:?}");
    };
    assert!((55..=61).contains(&retry_after_secs), "got {retry_after_secs}");

    let pool = dispatcher.pool();
    assert_eq!(pool.get("account-1").unwrap().status, AccountStatus::Cooldown);
    assert_eq!(pool.get("account-2").unwrap().status, AccountStatus::Cooldown);

    // Error body shape for the OpenAI dialect.
    let body = ProxyError::RateLimitExhausted { retry_after_secs }.openai_body();
    assert_eq!(body["error"]["type"], "rate_limit_error");
    assert_eq!(body["error"]["code"], "rate_limit_exceeded");
}

#[tokio::test]
async fn empty_pool_is_no_accounts() {
    let server = MockServer::start().await;
    let dispatcher = dispatcher(&server, 0, 3);
    let err = dispatcher.unary(None, |_| serde_json::json!({})).await.unwrap_err();
    assert_eq!(err, ProxyError::NoAccounts);
    assert_eq!(err.http_status(), 503);
}

#[tokio::test]
async fn non_rate_limit_errors_propagate_without_rotation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1internal:generateContent"))
        .respond_with(ResponseTemplate::new(400).set_body_string("schema rejected"))
        .expect(1)
        .mount(&server)
        .await;

    let dispatcher = dispatcher(&server, 2, 3);
    let err = dispatcher.unary(None, |_| serde_json::json!({})).await.unwrap_err();
    assert_eq!(err, ProxyError::Upstream { status: 400, message: "schema rejected".into() });

    // Neither account was cooled down.
    assert_eq!(dispatcher.pool().ready_accounts().len(), 2);
}

#[tokio::test]
async fn streaming_fails_over_before_headers() {
    let server = MockServer::start().await;

    let sse_body = concat!(
        "data: {\"response\":{\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Hi\"}]}}]}}\n\n",
        "data: {\"response\":{\"candidates\":[{\"content\":{\"parts\":[]},\"finishReason\":\"STOP\"}],",
        "\"usageMetadata\":{\"promptTokenCount\":1,\"candidatesTokenCount\":2}}}\n\n",
    );

    Mock::given(method("POST"))
        .and(path("/v1internal:streamGenerateContent"))
        .and(header("authorization", "Bearer tok-1"))
        .respond_with(ResponseTemplate::new(429).set_body_string("{}"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1internal:streamGenerateContent"))
        .and(header("authorization", "Bearer tok-2"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(sse_body)
                .insert_header("content-type", "text/event-stream"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dispatcher = dispatcher(&server, 2, 3);
    let upstream = dispatcher
        .stream(Some("gemini-3-flash"), |project| {
            serde_json::json!({ "project": project, "request": { "contents": [] } })
        })
        .await
        .expect("failover should land on account 2");

    assert_eq!(dispatcher.pool().get("account-1").unwrap().status, AccountStatus::Cooldown);
    assert_eq!(dispatcher.pool().get("account-2").unwrap().request_count, 1);

    // Run the stream pipeline and check the client-visible frames.
    let mut client_stream = openai_sse_stream(upstream, "gemini-3-flash".into());
    let mut collected = String::new();
    while let Some(frame) = client_stream.next().await {
        collected.push_str(std::str::from_utf8(&frame.unwrap()).unwrap());
    }

    assert!(collected.contains("\"content\":\"Hi\""));
    assert!(collected.contains("\"finish_reason\":\"stop\""));
    assert!(collected.trim_end().ends_with("data: [DONE]"));
}
