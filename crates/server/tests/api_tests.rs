use std::fs;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use tempfile::TempDir;
use tower::ServiceExt;

use vaultize_dispatch::{Dispatcher, DispatcherConfig};
use vaultize_engine::{Engine, EngineConfig};
use vaultize_server::api::{AppState, router};
use vaultize_state::StateStore;
use vaultize_store::client::{SearchResult, SearchStore};
use vaultize_store::testing::MockSearchStore;

const ADMIN_TOKEN: &str = "test-admin-token";

// -- Helpers --------------------------------------------------------------

fn rule_json(name: &str) -> serde_json::Value {
    serde_json::json!({
        "name": name,
        "description": "request error spike",
        "enabled": false,
        "schedule": { "interval": "60s" },
        "query": {
            "indices": ["logs-app-*"],
            "time_field": "@timestamp",
            "time_range": { "from": "now-5m", "to": "now" },
        },
        "condition": { "operator": "gt", "threshold": 100.0 },
        "throttle": "15m",
        "actions": [{
            // Nothing listens here; deliveries fail fast in tests.
            "url": "http://127.0.0.1:1/hook",
            "body": { "text": "{{alert.name}}" }
        }]
    })
}

struct TestApp {
    app: Router,
    store: Arc<MockSearchStore>,
    rules_dir: TempDir,
}

async fn test_app(start_engine: bool) -> TestApp {
    let rules_dir = TempDir::new().unwrap();
    fs::write(
        rules_dir.path().join("a.json"),
        serde_json::to_vec_pretty(&rule_json("high-error-rate")).unwrap(),
    )
    .unwrap();

    let store = Arc::new(MockSearchStore::new());
    let states = Arc::new(StateStore::new(
        Arc::clone(&store) as Arc<dyn SearchStore>,
        "vaultize-alerts-state",
        "vaultize-alerts-history",
    ));
    let dispatcher = Dispatcher::new(
        DispatcherConfig::default()
            .with_max_attempts(2)
            .with_base_delay(Duration::from_millis(5))
            .with_default_timeout(Duration::from_millis(200)),
    );
    let engine = Engine::new(
        Arc::clone(&store) as Arc<dyn SearchStore>,
        Arc::clone(&states),
        dispatcher,
        EngineConfig::new(rules_dir.path()),
    );
    if start_engine {
        engine.start().await.unwrap();
    }

    let state = AppState {
        engine,
        history: states,
        admin_token: Some(ADMIN_TOKEN.to_owned()),
    };

    TestApp {
        app: router(state),
        store,
        rules_dir,
    }
}

async fn get(app: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn post(app: &Router, uri: &str, token: Option<&str>) -> (StatusCode, serde_json::Value) {
    let mut builder = Request::builder().method("POST").uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let response = app
        .clone()
        .oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

// -- Tests ----------------------------------------------------------------

#[tokio::test]
async fn health_is_503_before_start() {
    let test = test_app(false).await;
    let (status, body) = get(&test.app, "/health").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "error");
    assert_eq!(body["error"]["kind"], "not_ready");
}

#[tokio::test]
async fn health_is_ready_after_start() {
    let test = test_app(true).await;
    let (status, body) = get(&test.app, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["data"]["status"], "ready");
    assert!(body["data"]["metrics"]["evaluations"].is_number());
}

#[tokio::test]
async fn list_rules_returns_summaries() {
    let test = test_app(true).await;
    let (status, body) = get(&test.app, "/api/v1/alerts/rules").await;

    assert_eq!(status, StatusCode::OK);
    let rules = body["data"].as_array().unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0]["name"], "high-error-rate");
    assert_eq!(rules[0]["enabled"], false);
    assert_eq!(rules[0]["interval"], "60s");
    assert_eq!(rules[0]["state"], "OK");
}

#[tokio::test]
async fn unknown_rule_status_is_404_envelope() {
    let test = test_app(true).await;
    let (status, body) = get(&test.app, "/api/v1/alerts/rules/nope/status").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], "error");
    assert_eq!(body["error"]["kind"], "not_found");
}

#[tokio::test]
async fn rule_status_includes_definition_and_state() {
    let test = test_app(true).await;
    let (status, body) = get(&test.app, "/api/v1/alerts/rules/high-error-rate/status").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["rule"]["name"], "high-error-rate");
    assert_eq!(body["data"]["rule"]["condition"]["operator"], "gt");
    assert_eq!(body["data"]["state"]["state"], "OK");
    assert_eq!(body["data"]["state"]["consecutive_errors"], 0);
}

#[tokio::test]
async fn trigger_requires_admin_identity() {
    let test = test_app(true).await;

    let (status, body) = post(
        &test.app,
        "/api/v1/alerts/rules/high-error-rate/trigger",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["kind"], "unauthorized");

    let (status, body) = post(
        &test.app,
        "/api/v1/alerts/rules/high-error-rate/trigger",
        Some("wrong-token"),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["kind"], "forbidden");
}

#[tokio::test]
async fn trigger_runs_one_evaluation() {
    let test = test_app(true).await;
    test.store.push_totals(&[150]);

    let (status, body) = post(
        &test.app,
        "/api/v1/alerts/rules/high-error-rate/trigger",
        Some(ADMIN_TOKEN),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["state"], "FIRING");
    assert_eq!(body["data"]["result"]["value"], 150.0);
    assert_eq!(body["data"]["result"]["condition_met"], true);
}

#[tokio::test]
async fn trigger_unknown_rule_is_404() {
    let test = test_app(true).await;
    let (status, body) = post(
        &test.app,
        "/api/v1/alerts/rules/nope/trigger",
        Some(ADMIN_TOKEN),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["kind"], "not_found");
}

#[tokio::test]
async fn reload_returns_counts() {
    let test = test_app(true).await;

    fs::write(
        test.rules_dir.path().join("b.json"),
        serde_json::to_vec_pretty(&rule_json("second-rule")).unwrap(),
    )
    .unwrap();

    let (status, body) = post(&test.app, "/api/v1/alerts/rules/reload", Some(ADMIN_TOKEN)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["added"], 1);
    assert_eq!(body["data"]["removed"], 0);
    assert_eq!(body["data"]["updated"], 0);
    assert_eq!(body["data"]["errored"], 0);

    let (_, body) = get(&test.app, "/api/v1/alerts/rules").await;
    assert_eq!(body["data"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn reload_requires_admin_identity() {
    let test = test_app(true).await;
    let (status, _) = post(&test.app, "/api/v1/alerts/rules/reload", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn history_endpoint_queries_the_store() {
    let test = test_app(true).await;

    let event = serde_json::json!({
        "id": "0195f2a0-5b7a-7000-8000-000000000000",
        "rule_name": "high-error-rate",
        "kind": "transition",
        "prior_state": "OK",
        "new_state": "FIRING",
        "timestamp": "2026-03-14T09:26:53Z",
        "observed_value": 150.0,
        "threshold": 100.0,
        "operator": "gt"
    });
    test.store.push_search(Ok(SearchResult {
        hit_total: 1,
        documents: vec![event],
        aggregations: None,
        took_ms: 1,
    }));

    let (status, body) = get(
        &test.app,
        "/api/v1/alerts/history?rule=high-error-rate&limit=10",
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let events = body["data"].as_array().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["new_state"], "FIRING");

    // The search carried the filters through to the store.
    let (indices, search_body) = test.store.searches().pop().unwrap();
    assert_eq!(indices, vec!["vaultize-alerts-history"]);
    assert_eq!(search_body["size"], 10);
}
