//! Metric names and recorders for the `metrics` facade.
//!
//! No exporter is installed by the gateway; these are no-ops until the
//! embedding binary installs a recorder.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

pub const INFERENCE_REQUESTS: &str = "alpaca_inference_requests_total";
pub const INFERENCE_FAILURES: &str = "alpaca_inference_failures_total";
pub const INFERENCE_LATENCY: &str = "alpaca_inference_latency_ms";
pub const OUTPUT_TOKENS: &str = "alpaca_output_tokens_total";
pub const QUEUE_DEPTH: &str = "alpaca_queue_depth";
pub const ENGINE_READY: &str = "alpaca_engine_ready";
pub const AUTH_REJECTIONS: &str = "alpaca_auth_rejections_total";

/// Register descriptions for every gateway metric.
pub fn init_metrics() {
    describe_counter!(INFERENCE_REQUESTS, "Completed engine round trips");
    describe_counter!(INFERENCE_FAILURES, "Failed inference calls by kind");
    describe_histogram!(INFERENCE_LATENCY, "Engine round trip latency in ms");
    describe_counter!(OUTPUT_TOKENS, "Tokens generated by the engine");
    describe_gauge!(QUEUE_DEPTH, "Calls waiting for the engine");
    describe_gauge!(ENGINE_READY, "1 when the engine accepts requests");
    describe_counter!(AUTH_REJECTIONS, "Rejected requests by auth detail");
}

pub fn record_request_success(latency_ms: u64, output_tokens: i64) {
    counter!(INFERENCE_REQUESTS).increment(1);
    histogram!(INFERENCE_LATENCY).record(latency_ms as f64);
    if output_tokens > 0 {
        counter!(OUTPUT_TOKENS).increment(output_tokens as u64);
    }
}

pub fn record_request_failure(kind: &'static str) {
    counter!(INFERENCE_FAILURES, "kind" => kind).increment(1);
}

pub fn record_queue_depth(depth: usize) {
    gauge!(QUEUE_DEPTH).set(depth as f64);
}

pub fn record_engine_ready(ready: bool) {
    gauge!(ENGINE_READY).set(if ready { 1.0 } else { 0.0 });
}

pub fn record_auth_rejection(detail: &'static str) {
    counter!(AUTH_REJECTIONS, "detail" => detail).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorders_without_exporter() {
        init_metrics();
        record_request_success(12, 41);
        record_request_failure("timeout");
        record_queue_depth(3);
        record_engine_ready(true);
        record_auth_rejection("invalid_token");
    }
}
