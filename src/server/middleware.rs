//! Bearer authentication and request logging.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Request, State};
use axum::http::{header, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::Instrument;

use super::error::ApiError;
use crate::auth::fingerprint;
use crate::telemetry::{self, log_security_event, RequestSpan, SecurityEvent};
use crate::AppContext;

/// Reject the request unless it carries a known bearer token, then count it.
pub async fn require_bearer(
    State(ctx): State<Arc<AppContext>>,
    request: Request,
    next: Next,
) -> Response {
    let header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let path = request.uri().path().to_string();

    match ctx.tokens.authorize(header) {
        Ok(token) => {
            let print = fingerprint(&token);
            tracing::Span::current().record("token", print.as_str());
            log_security_event(
                SecurityEvent::AuthSuccess,
                "bearer token accepted",
                &[("token", &print), ("path", &path)],
            );
            next.run(request).await
        }
        Err(e) => {
            let event = if e.is_forbidden() {
                SecurityEvent::AuthFailure
            } else {
                SecurityEvent::AuthMissing
            };
            let print = header
                .and_then(|h| crate::auth::parse_bearer(Some(h)).ok())
                .filter(|_| e.is_forbidden())
                .map(fingerprint);
            let mut details = vec![("detail", e.detail()), ("path", path.as_str())];
            if let Some(print) = &print {
                details.push(("token", print.as_str()));
            }
            log_security_event(event, &e.to_string(), &details);
            telemetry::record_auth_rejection(e.detail());
            ApiError::from(e).into_response()
        }
    }
}

/// Wrap each request in a span with a fresh request id and log the outcome.
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let span = RequestSpan::http(&request_id, method.as_str(), &path);
    let start = Instant::now();

    let mut response = next.run(request).instrument(span.clone()).await;

    let latency_ms = start.elapsed().as_millis() as u64;
    let status = response.status();
    span.record("http.status", status.as_u16());
    span.record("latency_ms", latency_ms);

    span.in_scope(|| {
        if status.is_server_error() {
            tracing::warn!(%method, %path, status = status.as_u16(), latency_ms, "request failed");
        } else if status.is_client_error() {
            tracing::info!(%method, %path, status = status.as_u16(), latency_ms, "request rejected");
        } else {
            tracing::info!(%method, %path, status = status.as_u16(), latency_ms, "request completed");
        }
    });

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}
