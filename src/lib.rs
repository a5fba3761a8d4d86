//! Alpaca Serve
//!
//! HTTP gateway in front of a single Alpaca engine subprocess. The engine
//! speaks line-delimited JSON over stdin/stdout and can only handle one
//! prompt at a time, so every call is funnelled through one worker task.
//! Secured routes take a bearer token from a static allow-list and count
//! each use.

pub mod auth;
pub mod cli;
pub mod config;
pub mod engine;
pub mod health;
pub mod server;
pub mod telemetry;

use std::sync::Arc;

use thiserror::Error;

use auth::{AuthError, TokenStore};
use config::{ConfigError, EnvConfig};
use engine::{EngineError, InferenceGateway, StopOutcome, SystemInfo};
use health::{HealthChecker, HealthConfig};

#[derive(Debug, Error)]
pub enum ContextError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Auth(#[from] AuthError),
}

/// Everything a request handler needs, built once at startup.
pub struct AppContext {
    pub gateway: InferenceGateway,
    pub tokens: Arc<TokenStore>,
    pub health: HealthChecker,
}

impl AppContext {
    pub fn new(gateway: InferenceGateway, tokens: TokenStore) -> Self {
        Self {
            gateway,
            tokens: Arc::new(tokens),
            health: HealthChecker::default(),
        }
    }

    pub fn with_health(mut self, health: HealthChecker) -> Self {
        self.health = health;
        self
    }

    /// Validate paths, load tokens and spawn the engine worker. The engine
    /// itself is launched by `start()`.
    pub fn from_config(config: &EnvConfig) -> Result<Self, ContextError> {
        let spec = config.engine_spec()?;
        let tokens = TokenStore::load(config.require_keys_path()?)?;
        telemetry::log_security_event(
            telemetry::SecurityEvent::TokensLoaded,
            "bearer tokens loaded",
            &[("count", &tokens.len().to_string())],
        );

        let gateway = InferenceGateway::for_process(spec, config.gateway_config());
        let health = HealthChecker::new(HealthConfig {
            degraded_queue_depth: config.max_pending,
        });
        Ok(Self::new(gateway, tokens).with_health(health))
    }

    pub async fn start(&self) -> Result<Arc<SystemInfo>, EngineError> {
        self.gateway.start().await
    }

    /// Send the engine its quit sentinel and log how it went.
    pub async fn stop(&self) -> Option<StopOutcome> {
        match self.gateway.stop().await {
            Ok(StopOutcome::TimedOut) => {
                tracing::warn!("engine had to be killed on shutdown");
                Some(StopOutcome::TimedOut)
            }
            Ok(outcome) => {
                tracing::info!(?outcome, "engine stopped");
                Some(outcome)
            }
            Err(e) => {
                tracing::warn!(error = %e, "engine worker already gone");
                None
            }
        }
    }
}
