use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use cmdgate::{
    commands::CommandRegistry, config::Config, create_app, store::InMemoryStore, Throttler,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn test_app(max_requests: u32) -> (Router, Arc<Throttler>, Arc<InMemoryStore>) {
    let config = Config {
        rate_limit_max_requests: max_requests,
        queue_interval_ms: 10,
        ..Config::default()
    };
    let store = Arc::new(InMemoryStore::new());
    let throttler = Arc::new(Throttler::with_store(
        config,
        store.clone(),
        CommandRegistry::with_builtins(),
    )
    .unwrap());
    (create_app(throttler.clone()), throttler, store)
}

fn command(name: &str, user: &str, args: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/commands/{}", name))
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-user-id", user)
        .body(Body::from(json!({ "args": args }).to_string()))
        .unwrap()
}

fn message(user: &str, content: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/messages")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-user-id", user)
        .header("x-scope-id", "guild-1")
        .body(Body::from(json!({ "content": content }).to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_command_succeeds() {
    let (app, _, store) = test_app(10);

    let response = app.oneshot(command("ping", "alice", "")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));

    let body = body_json(response).await;
    assert_eq!(body, json!({ "success": true, "reply": "pong" }));

    let usage = store.usage_records().await;
    assert_eq!(usage.len(), 1);
    assert_eq!(usage[0].identity, "alice");
    assert_eq!(usage[0].command_name, "ping");
    assert!(usage[0].success);
}

#[tokio::test]
async fn test_alias_resolves_to_command() {
    let (app, _, store) = test_app(10);

    let response = app.oneshot(command("SAY", "alice", "hello  world")).await.unwrap();
    let body = body_json(response).await;
    assert_eq!(body["reply"], "hello world");

    assert_eq!(store.usage_records().await[0].command_name, "say");
}

#[tokio::test]
async fn test_unknown_command_is_not_found_and_costs_nothing() {
    let (app, throttler, store) = test_app(1);

    let response = app.oneshot(command("nope", "alice", "")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"], "unknown_command");

    assert!(store.usage_records().await.is_empty());
    assert_eq!(throttler.rate_limiter().remaining_for("alice").await.remaining, 1);
}

#[tokio::test]
async fn test_denied_after_quota_with_retry_after() {
    let (app, _, store) = test_app(2);

    for _ in 0..2 {
        let response = app.clone().oneshot(command("ping", "bob", "")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app.clone().oneshot(command("ping", "bob", "")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = response
        .headers()
        .get(header::RETRY_AFTER)
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=60).contains(&retry_after));
    assert_eq!(body_json(response).await["error"], "admission_denied");

    // Denials are not logged as usage
    assert_eq!(store.usage_records().await.len(), 2);

    // Other identities are unaffected
    let response = app.oneshot(command("ping", "carol", "")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_handler_failure_is_folded_into_result() {
    let (app, _, store) = test_app(10);

    let response = app.oneshot(command("echo", "alice", "")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "Give me something to say");

    let usage = store.usage_records().await;
    assert_eq!(usage.len(), 1);
    assert!(!usage[0].success);
    assert!(usage[0].error_summary.is_some());
}

#[tokio::test]
async fn test_missing_identity_header_rejected() {
    let (app, _, _) = test_app(10);

    let request = Request::builder()
        .method("POST")
        .uri("/commands/ping")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"args":""}"#))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body_json(response).await["error"], "validation_failed");
}

#[tokio::test]
async fn test_message_with_prefix_dispatches() {
    let (app, _, store) = test_app(10);

    let response = app.oneshot(message("dave", "!say hi there")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["reply"], "hi there");

    let usage = store.usage_records().await;
    assert_eq!(usage[0].scope_id.as_deref(), Some("guild-1"));
    assert_eq!(usage[0].argument_summary.as_deref(), Some("hi there"));
}

#[tokio::test]
async fn test_message_without_prefix_rejected() {
    let (app, throttler, _) = test_app(10);

    let response = app.oneshot(message("dave", "just chatting")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(throttler.rate_limiter().remaining_for("dave").await.remaining, 10);
}

#[tokio::test]
async fn test_quota_endpoint_is_read_only() {
    let (app, _, _) = test_app(3);

    app.clone().oneshot(command("ping", "erin", "")).await.unwrap();

    for _ in 0..3 {
        let response = app.clone().oneshot(get("/rate-limit/erin")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["limit"], 3);
        assert_eq!(body["remaining"], 2);
    }
}

#[tokio::test]
async fn test_reset_clears_window() {
    let (app, _, _) = test_app(1);

    app.clone().oneshot(command("ping", "frank", "")).await.unwrap();
    let response = app.clone().oneshot(command("ping", "frank", "")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    let request = Request::builder()
        .method("DELETE")
        .uri("/rate-limit/frank")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(body_json(response).await["cleared"], true);

    let response = app.oneshot(command("ping", "frank", "")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_health_and_config_endpoints() {
    let (app, _, _) = test_app(10);

    let response = app.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["dependencies"]["store"]["backend"], "memory");

    let response = app.clone().oneshot(get("/ready")).await.unwrap();
    assert_eq!(body_json(response).await["status"], "ready");

    let response = app.oneshot(get("/config")).await.unwrap();
    let body = body_json(response).await;
    assert_eq!(body["rate_limit"]["window"], "1m");
    assert_eq!(body["command_prefix"], "!");
}

#[tokio::test]
async fn test_metrics_count_outcomes() {
    let (app, _, _) = test_app(2);

    app.clone().oneshot(command("ping", "gina", "")).await.unwrap();
    app.clone().oneshot(command("echo", "gina", "")).await.unwrap();
    app.clone().oneshot(command("ping", "gina", "")).await.unwrap();

    let body = body_json(app.oneshot(get("/metrics")).await.unwrap()).await;
    assert_eq!(body["global"]["succeeded"], 1);
    assert_eq!(body["global"]["failed"], 1);
    assert_eq!(body["global"]["denied"], 1);
    assert_eq!(body["identities"], 1);
}

#[tokio::test]
async fn test_not_ready_after_shutdown() {
    let (app, throttler, _) = test_app(10);
    throttler.shutdown().await;

    let response = app.oneshot(get("/ready")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}
