//! Error types for the engine process manager.
//!
//! Per-request failures (`Engine`, `InvalidParams`, `RequestTooLarge`) never
//! poison later calls. Process faults leave the supervisor `Crashed` until
//! the next `start()`.

use thiserror::Error;

use super::process::SupervisorState;
use super::protocol::ProtocolError;

/// Failures while bringing the engine up.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Failed to spawn engine '{executable}': {source}")]
    Spawn {
        executable: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Engine {0} was not captured")]
    MissingStdio(&'static str),

    #[error("Engine exited before sending its handshake")]
    MissingHandshake,

    #[error("Malformed handshake: {0}")]
    MalformedHandshake(#[source] ProtocolError),

    #[error("No handshake within {0}ms")]
    HandshakeTimeout(u64),

    #[error("I/O error during handshake: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by the inference gateway.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Engine startup failed: {0}")]
    Startup(#[from] StartupError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Engine not ready (state: {0})")]
    NotReady(SupervisorState),

    #[error("Engine did not respond within {0}ms")]
    Timeout(u64),

    #[error("Engine channel closed unexpectedly")]
    Crashed,

    #[error("Request queue full: {0} pending requests")]
    QueueFull(usize),

    #[error("Request line is {size} bytes, engine accepts at most {max}")]
    RequestTooLarge { size: usize, max: usize },

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Engine I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Engine worker has shut down")]
    WorkerGone,
}

impl EngineError {
    /// Returns true if the failure is local to one request.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Engine(_)
                | Self::InvalidParams(_)
                | Self::RequestTooLarge { .. }
                | Self::QueueFull(_)
                | Self::NotReady(_)
        )
    }

    /// Returns true if the failure indicates an unhealthy engine process.
    pub fn is_process_fault(&self) -> bool {
        matches!(
            self,
            Self::Crashed | Self::Timeout(_) | Self::Protocol(_) | Self::Io(_)
        )
    }

    /// Short stable label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Startup(_) => "startup",
            Self::Protocol(_) => "protocol",
            Self::Engine(_) => "engine",
            Self::NotReady(_) => "not_ready",
            Self::Timeout(_) => "timeout",
            Self::Crashed => "crashed",
            Self::QueueFull(_) => "queue_full",
            Self::RequestTooLarge { .. } => "request_too_large",
            Self::InvalidParams(_) => "invalid_params",
            Self::Io(_) => "io",
            Self::WorkerGone => "worker_gone",
        }
    }
}
