//! HTTP boundary tests driven through the router with `oneshot`.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use alpaca_serve::auth::TokenStore;
use alpaca_serve::engine::{
    GatewayConfig, InferenceGateway, MockEngine, MockLauncher, SupervisorState,
};
use alpaca_serve::server::{build_router, serve_and_stop};
use alpaca_serve::AppContext;

const TOKEN: &str = "test-token-1";

fn context() -> Arc<AppContext> {
    let gateway = InferenceGateway::spawn(
        Box::new(MockLauncher::new(MockEngine::default())),
        GatewayConfig::default(),
    );
    Arc::new(AppContext::new(
        gateway,
        TokenStore::from_tokens([TOKEN, "test-token-2"]),
    ))
}

async fn started() -> (Arc<AppContext>, Router) {
    let ctx = context();
    ctx.start().await.unwrap();
    let router = build_router(Arc::clone(&ctx));
    (ctx, router)
}

fn post(uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn missing_token_is_unauthorized() {
    let (ctx, app) = started().await;

    let response = app
        .oneshot(post("/advertisement", None, json!({"input_text": "tv"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers()[header::WWW_AUTHENTICATE], "Bearer");
    assert_eq!(json_body(response).await["detail"], "missing_credentials");
    assert_eq!(ctx.gateway.stats().completed, 0);
}

#[tokio::test]
async fn unknown_token_is_forbidden_and_not_counted() {
    let (ctx, app) = started().await;
    let before = ctx.tokens.snapshot();

    let response = app
        .oneshot(post("/custom-prompt", Some("intruder"), json!({"input_text": "hi"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(json_body(response).await["detail"], "invalid_token");
    assert_eq!(ctx.tokens.snapshot(), before);
}

#[tokio::test]
async fn advertisement_runs_engine_and_counts_token() {
    let (ctx, app) = started().await;

    let response = app
        .oneshot(post(
            "/advertisement",
            Some(TOKEN),
            json!({"input_text": "4k oled tv", "n_predict": 8}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    let body = json_body(response).await;
    let output = body["output"].as_str().unwrap();
    assert!(output.starts_with("echo: Below is an instruction"));
    assert!(body["input_token_length"].as_i64().unwrap() > 0);

    assert_eq!(ctx.tokens.usage(TOKEN).unwrap().num_of_requests, 1);
    assert_eq!(ctx.tokens.usage("test-token-2").unwrap().num_of_requests, 0);
}

#[tokio::test]
async fn custom_prompt_accepts_wire_temperature_name() {
    let (_ctx, app) = started().await;

    let response = app
        .oneshot(post(
            "/custom-prompt",
            Some(TOKEN),
            json!({"input_text": "name three colors", "temp": 0.7, "seed": 7}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn engine_error_is_unprocessable() {
    let (ctx, app) = started().await;

    let response = app
        .oneshot(post("/custom-prompt", Some(TOKEN), json!({"input_text": "[error:oom]"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = json_body(response).await;
    assert_eq!(body["detail"], "engine_error");
    assert_eq!(body["message"], "oom");
    assert!(ctx.gateway.state().is_ready());
}

#[tokio::test]
async fn malformed_body_is_invalid_parameters() {
    let (_ctx, app) = started().await;

    let response = app
        .oneshot(post("/custom-prompt", Some(TOKEN), json!({"n_predict": "many"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json_body(response).await["detail"], "invalid_parameters");
}

#[tokio::test]
async fn engine_not_started_is_unavailable() {
    let ctx = context();
    let app = build_router(Arc::clone(&ctx));

    let response = app
        .clone()
        .oneshot(post("/advertisement", Some(TOKEN), json!({"input_text": "tv"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_body(response).await["detail"], "engine_not_ready");

    let response = app.oneshot(get("/health/ready")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn mock_route_needs_no_token() {
    let ctx = context();
    let app = build_router(ctx);

    let response = app
        .oneshot(post("/advertisement-mock", None, json!({"input_text": "ignored"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["input_token_length"], 55);
    assert_eq!(body["output_token_length"], 41);
    assert_eq!(body["total_token_length"], 96);
    assert_eq!(body["total_predict_time_us"], 24_023_165);
    assert!(body["output"].as_str().unwrap().contains("4K OLED TV"));
}

#[tokio::test]
async fn stats_reports_every_token() {
    let (_ctx, app) = started().await;

    let response = app
        .clone()
        .oneshot(post("/advertisement", Some(TOKEN), json!({"input_text": "tv"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(get("/stats")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await,
        json!({
            TOKEN: {"num_of_requests": 1},
            "test-token-2": {"num_of_requests": 0},
        })
    );
}

#[tokio::test]
async fn health_reports_engine_state() {
    let (_ctx, app) = started().await;

    let response = app.clone().oneshot(get("/health/ready")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(get("/health")).await.unwrap();
    let body = json_body(response).await;
    assert_eq!(body["state"], "healthy");
    assert_eq!(body["engine_state"], "ready");
    assert_eq!(body["system_info"]["ctx_size"], 2048);
}

#[tokio::test]
async fn bind_failure_still_stops_engine() {
    let (ctx, _app) = started().await;
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = taken.local_addr().unwrap();

    let result = serve_and_stop(Arc::clone(&ctx), addr, CancellationToken::new()).await;

    assert_eq!(result.unwrap_err().kind(), std::io::ErrorKind::AddrInUse);
    assert_eq!(ctx.gateway.state(), SupervisorState::Stopped);
}

#[tokio::test]
async fn cancelled_server_stops_engine() {
    let (ctx, _app) = started().await;
    let shutdown = CancellationToken::new();
    shutdown.cancel();

    let addr = "127.0.0.1:0".parse().unwrap();
    serve_and_stop(Arc::clone(&ctx), addr, shutdown).await.unwrap();

    assert_eq!(ctx.gateway.state(), SupervisorState::Stopped);
}
