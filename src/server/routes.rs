//! Route handlers.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

use super::error::ApiError;
use crate::auth::UsageStats;
use crate::engine::{InferenceRequest, InferenceResult};
use crate::health::HealthReport;
use crate::telemetry::{log_security_event, SecurityEvent};
use crate::AppContext;

fn parse_body(body: Result<Json<InferenceRequest>, JsonRejection>) -> Result<InferenceRequest, ApiError> {
    match body {
        Ok(Json(request)) => Ok(request),
        Err(rejection) => {
            let message = rejection.body_text();
            log_security_event(
                SecurityEvent::InputValidationFailure,
                "request body rejected",
                &[("reason", &message)],
            );
            Err(ApiError::InvalidRequest(message))
        }
    }
}

/// `POST /advertisement`: ad copy from keywords.
pub async fn advertisement(
    State(ctx): State<Arc<AppContext>>,
    body: Result<Json<InferenceRequest>, JsonRejection>,
) -> Result<Json<InferenceResult>, ApiError> {
    let request = parse_body(body)?.with_advertisement_template();
    Ok(Json(ctx.gateway.run_request(request).await?))
}

/// `POST /custom-prompt`: free-form instruction.
pub async fn custom_prompt(
    State(ctx): State<Arc<AppContext>>,
    body: Result<Json<InferenceRequest>, JsonRejection>,
) -> Result<Json<InferenceResult>, ApiError> {
    let request = parse_body(body)?.with_instruction_template();
    Ok(Json(ctx.gateway.run_request(request).await?))
}

/// Fixed reply used by front-end demos without an engine.
pub fn canned_advertisement() -> InferenceResult {
    InferenceResult {
        output: "Experience the thrill of watching TV like never before with our 4K OLED TV. \
Get a crystal clear picture and an incredibly thin design, perfect for any home decor!"
            .to_string(),
        input_token_length: 55,
        n_tokens_truncated: 0,
        output_token_length: 41,
        reached_max_content_size: 0,
        total_predict_time_us: 24_023_165,
        total_token_length: 96,
        memory_per_token_bytes: None,
    }
}

/// `POST /advertisement-mock`: unauthenticated, ignores its body.
pub async fn advertisement_mock() -> Json<InferenceResult> {
    Json(canned_advertisement())
}

/// `GET /stats`: per-token request counts. Never touches the engine.
pub async fn stats(State(ctx): State<Arc<AppContext>>) -> Json<BTreeMap<String, UsageStats>> {
    Json(ctx.tokens.snapshot())
}

pub async fn health(State(ctx): State<Arc<AppContext>>) -> Json<HealthReport> {
    Json(ctx.health.report(&ctx.gateway))
}

pub async fn live(State(ctx): State<Arc<AppContext>>) -> impl IntoResponse {
    if ctx.health.is_alive() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not alive")
    }
}

pub async fn ready(State(ctx): State<Arc<AppContext>>) -> impl IntoResponse {
    let state = ctx.gateway.state();
    if ctx.health.is_ready(state) {
        (StatusCode::OK, state.to_string())
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, state.to_string())
    }
}
