use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use crate::config::TokenEntry;
use crate::search::QueryOrchestrator;
use crate::web::{router, SharedState, PARTIAL_HEADER};

use super::fixtures;

const ALICE_TOKEN: &str = "alice-token";
const BOB_TOKEN: &str = "bob-token";

fn tokens() -> Vec<TokenEntry> {
    vec![
        TokenEntry {
            token: ALICE_TOKEN.to_string(),
            owner: fixtures::ALICE.to_string(),
        },
        TokenEntry {
            token: BOB_TOKEN.to_string(),
            owner: fixtures::BOB.to_string(),
        },
    ]
}

fn app_with(orchestrator: QueryOrchestrator) -> Router {
    let state = SharedState {
        orchestrator: Arc::new(orchestrator),
        tokens: Arc::new(tokens()),
    };
    router(state, &[]).unwrap()
}

fn search_request(token: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/v1/search")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn hit_ids(body: &Value) -> Vec<u64> {
    body.as_array()
        .unwrap()
        .iter()
        .map(|hit| hit["id"].as_u64().unwrap())
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_health() {
    let (store, _tmp) = fixtures::fixture_store();
    let app = app_with(fixtures::hybrid_orchestrator(store));

    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({"status": "healthy"}));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_search_requires_valid_token() {
    let (store, _tmp) = fixtures::fixture_store();
    let app = app_with(fixtures::hybrid_orchestrator(store));

    for token in [None, Some("wrong-token")] {
        let response = app
            .clone()
            .oneshot(search_request(token, r#"{"query": "rust"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{token:?}");
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Bearer"
        );
        let body = json_body(response).await;
        assert!(body["detail"].is_string());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_auth_checked_before_body() {
    let (store, _tmp) = fixtures::fixture_store();
    let app = app_with(fixtures::hybrid_orchestrator(store));

    let response = app
        .oneshot(search_request(None, "not json"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_invalid_requests_rejected() {
    let (store, _tmp) = fixtures::fixture_store();
    let app = app_with(fixtures::hybrid_orchestrator(store));

    let bodies = [
        "not json",
        r#"{"mode": "hybrid"}"#,
        r#"{"query": ""}"#,
        r#"{"query": "   "}"#,
        r#"{"query": "rust", "limit": 0}"#,
        r#"{"query": "rust", "limit": -3}"#,
        r#"{"query": "rust", "limit": 101}"#,
        r#"{"query": "rust", "threshold": 1.5}"#,
        r#"{"query": "rust", "threshold": -0.1}"#,
        r#"{"query": "rust", "mode": "fuzzy"}"#,
    ];

    for body in bodies {
        let response = app
            .clone()
            .oneshot(search_request(Some(ALICE_TOKEN), body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{body}");
        let body = json_body(response).await;
        assert!(body["detail"].is_string());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_search_returns_ranked_hits() {
    let (store, _tmp) = fixtures::fixture_store();
    let app = app_with(fixtures::hybrid_orchestrator(store));

    let response = app
        .oneshot(search_request(
            Some(ALICE_TOKEN),
            r#"{"query": "rust tokio", "mode": "hybrid", "limit": 5, "threshold": 0.0}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get(PARTIAL_HEADER).unwrap(), "false");

    let body = json_body(response).await;
    assert_eq!(hit_ids(&body), vec![0, 2]);

    let hit = &body[0];
    assert_eq!(hit["title"], "Rust Async Programming");
    assert_eq!(hit["url"], "https://example.com/rust-async-programming");
    assert_eq!(hit["matched_categories"], json!(["Programming"]));
    assert!(hit["semantic_score"].as_f64().unwrap() > 0.0);
    assert!(hit["category_score"].as_f64().unwrap() > 0.0);
    assert!(hit["rrf_score"].as_f64().unwrap() > 0.0);
    assert!(hit["created_at"].is_string());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_search_defaults() {
    let (store, _tmp) = fixtures::fixture_store();
    let app = app_with(fixtures::hybrid_orchestrator(store));

    let response = app
        .oneshot(search_request(Some(ALICE_TOKEN), r#"{"query": "rust"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(hit_ids(&body), vec![0]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_token_selects_owner() {
    let (store, _tmp) = fixtures::fixture_store();
    let app = app_with(fixtures::hybrid_orchestrator(store));

    let response = app
        .oneshot(search_request(Some(BOB_TOKEN), r#"{"query": "rust"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(hit_ids(&body), vec![4]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unavailable_retriever_is_503() {
    let (store, _tmp) = fixtures::fixture_store();
    let orchestrator = fixtures::orchestrator_with(
        store,
        Arc::new(fixtures::FailingEmbedder),
        None,
        fixtures::search_config(),
    );
    let app = app_with(orchestrator);

    let response = app
        .oneshot(search_request(
            Some(ALICE_TOKEN),
            r#"{"query": "rust", "mode": "semantic"}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "1");
    let body = json_body(response).await;
    assert!(body["detail"].is_string());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_degraded_hybrid_sets_partial_header() {
    let (store, _tmp) = fixtures::fixture_store();
    let orchestrator = fixtures::orchestrator_with(
        store,
        Arc::new(fixtures::FailingEmbedder),
        None,
        fixtures::search_config(),
    );
    let app = app_with(orchestrator);

    let response = app
        .oneshot(search_request(Some(ALICE_TOKEN), r#"{"query": "rust"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get(PARTIAL_HEADER).unwrap(), "true");
    let body = json_body(response).await;
    assert_eq!(hit_ids(&body), vec![0]);
    assert_eq!(body[0]["semantic_score"].as_f64(), Some(0.0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unknown_route() {
    let (store, _tmp) = fixtures::fixture_store();
    let app = app_with(fixtures::hybrid_orchestrator(store));

    let response = app
        .oneshot(Request::get("/api/v1/nope").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = json_body(response).await;
    assert_eq!(body["detail"], "not found");
}
