//! Span helpers for gateway requests.

use tracing::{info_span, Span};

/// Record the outcome of an operation on a span.
pub trait SpanExt {
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display;
}

impl SpanExt for Span {
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display,
    {
        match result {
            Ok(_) => {
                self.record("status", "ok");
            }
            Err(e) => {
                self.record("status", "error");
                self.record("error.message", e.to_string().as_str());
            }
        }
    }
}

/// Factory for standard request spans.
pub struct RequestSpan;

impl RequestSpan {
    /// HTTP request span. `status`, `http.status` and `latency_ms` are
    /// filled in when the response is ready.
    pub fn http(request_id: &str, method: &str, path: &str) -> Span {
        info_span!(
            "http_request",
            request_id = %request_id,
            method = %method,
            path = %path,
            token = tracing::field::Empty,
            http.status = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
        )
    }

    /// One serialized engine call.
    pub fn inference(request_id: &str, input_bytes: usize) -> Span {
        info_span!(
            "inference",
            request_id = %request_id,
            input_bytes = input_bytes,
            status = tracing::field::Empty,
            error.message = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
            output_tokens = tracing::field::Empty,
        )
    }
}
