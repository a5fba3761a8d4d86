//! Structured logging, audit events, spans and metrics for the gateway.

mod logging;
mod metrics;
pub mod security_log;
mod spans;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use self::metrics::{
    init_metrics, record_auth_rejection, record_engine_ready, record_queue_depth,
    record_request_failure, record_request_success,
};
pub use security_log::{log_security_event, SecurityEvent, SecuritySeverity};
pub use spans::{RequestSpan, SpanExt};
