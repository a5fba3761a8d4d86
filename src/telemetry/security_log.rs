//! Audit logging for authentication and engine-fault events.

use std::time::{SystemTime, UNIX_EPOCH};

/// Security-relevant event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityEvent {
    /// Bearer token accepted.
    AuthSuccess,
    /// Header missing, malformed, or using another scheme.
    AuthMissing,
    /// Well-formed bearer token that is not in the store.
    AuthFailure,
    /// Token file loaded at startup.
    TokensLoaded,
    /// Engine channel closed, failed, or timed out.
    EngineFault,
    /// Request rejected before reaching the engine.
    InputValidationFailure,
    /// Request queue at capacity or request line over the engine's limit.
    ResourceLimitExceeded,
}

impl SecurityEvent {
    pub fn severity(&self) -> SecuritySeverity {
        match self {
            Self::AuthSuccess => SecuritySeverity::Debug,
            Self::AuthMissing => SecuritySeverity::Info,
            Self::AuthFailure => SecuritySeverity::Warning,
            Self::TokensLoaded => SecuritySeverity::Info,
            Self::EngineFault => SecuritySeverity::Error,
            Self::InputValidationFailure => SecuritySeverity::Info,
            Self::ResourceLimitExceeded => SecuritySeverity::Warning,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthSuccess => "auth_success",
            Self::AuthMissing => "auth_missing",
            Self::AuthFailure => "auth_failure",
            Self::TokensLoaded => "tokens_loaded",
            Self::EngineFault => "engine_fault",
            Self::InputValidationFailure => "input_validation_failure",
            Self::ResourceLimitExceeded => "resource_limit_exceeded",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SecuritySeverity {
    Debug,
    Info,
    Warning,
    Error,
}

impl SecuritySeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        }
    }
}

/// Render the audit line for an event. Split out so tests can inspect it.
pub fn format_security_event(
    event: SecurityEvent,
    message: &str,
    details: &[(&str, &str)],
    timestamp: u64,
) -> String {
    let mut line = format!(
        "[{}] SECURITY {} {}: {}",
        timestamp,
        event.severity().as_str(),
        event.as_str(),
        message
    );
    if !details.is_empty() {
        let rendered = details
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(" ");
        line.push_str(" | ");
        line.push_str(&rendered);
    }
    line
}

/// Log a security event at the level implied by its severity.
///
/// ```
/// use alpaca_serve::telemetry::{log_security_event, SecurityEvent};
///
/// log_security_event(
///     SecurityEvent::AuthFailure,
///     "Unknown bearer token",
///     &[("token", "3f1a9c02"), ("path", "/advertisement")],
/// );
/// ```
pub fn log_security_event(event: SecurityEvent, message: &str, details: &[(&str, &str)]) {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let line = format_security_event(event, message, details, timestamp);

    match event.severity() {
        SecuritySeverity::Debug => tracing::debug!(event = event.as_str(), "{}", line),
        SecuritySeverity::Info => tracing::info!(event = event.as_str(), "{}", line),
        SecuritySeverity::Warning => tracing::warn!(event = event.as_str(), "{}", line),
        SecuritySeverity::Error => tracing::error!(event = event.as_str(), "{}", line),
    }
}
