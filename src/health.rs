//! Liveness, readiness and full health reports derived from engine status.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::{InferenceGateway, SerializerStats, SupervisorState, SystemInfo};

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub state: HealthState,
    pub ready: bool,
    pub engine_state: SupervisorState,
    pub system_info: Option<SystemInfo>,
    pub serializer: SerializerStats,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
}

#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Queue depth at which the gateway reports itself degraded.
    pub degraded_queue_depth: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            degraded_queue_depth: 64,
        }
    }
}

pub struct HealthChecker {
    config: HealthConfig,
    start_time: Instant,
    started_at: DateTime<Utc>,
}

impl HealthChecker {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            start_time: Instant::now(),
            started_at: Utc::now(),
        }
    }

    /// The HTTP server answering is all liveness requires.
    pub fn is_alive(&self) -> bool {
        true
    }

    /// Ready means the engine accepts requests.
    pub fn is_ready(&self, engine_state: SupervisorState) -> bool {
        engine_state.is_ready()
    }

    pub fn report(&self, gateway: &InferenceGateway) -> HealthReport {
        let engine_state = gateway.state();
        let serializer = gateway.stats();

        HealthReport {
            state: self.compute_state(engine_state, &serializer),
            ready: self.is_ready(engine_state),
            engine_state,
            system_info: gateway.system_info().map(|info| info.as_ref().clone()),
            serializer,
            started_at: self.started_at,
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }

    fn compute_state(&self, engine_state: SupervisorState, stats: &SerializerStats) -> HealthState {
        match engine_state {
            SupervisorState::Ready if stats.pending >= self.config.degraded_queue_depth => {
                HealthState::Degraded
            }
            SupervisorState::Ready => HealthState::Healthy,
            SupervisorState::Starting | SupervisorState::Stopping => HealthState::Degraded,
            SupervisorState::NotStarted | SupervisorState::Stopped | SupervisorState::Crashed => {
                HealthState::Unhealthy
            }
        }
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new(HealthConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(pending: usize) -> SerializerStats {
        SerializerStats {
            pending,
            ..Default::default()
        }
    }

    #[test]
    fn test_compute_state() {
        let checker = HealthChecker::new(HealthConfig {
            degraded_queue_depth: 4,
        });
        assert_eq!(checker.compute_state(SupervisorState::Ready, &stats(0)), HealthState::Healthy);
        assert_eq!(checker.compute_state(SupervisorState::Ready, &stats(4)), HealthState::Degraded);
        assert_eq!(checker.compute_state(SupervisorState::Starting, &stats(0)), HealthState::Degraded);
        assert_eq!(checker.compute_state(SupervisorState::Crashed, &stats(0)), HealthState::Unhealthy);
        assert_eq!(checker.compute_state(SupervisorState::NotStarted, &stats(0)), HealthState::Unhealthy);
    }

    #[test]
    fn test_readiness_follows_engine() {
        let checker = HealthChecker::default();
        assert!(checker.is_alive());
        assert!(checker.is_ready(SupervisorState::Ready));
        assert!(!checker.is_ready(SupervisorState::Stopped));
    }

    #[test]
    fn test_health_state_serializes_lowercase() {
        let json = serde_json::to_string(&HealthState::Degraded).unwrap();
        assert_eq!(json, "\"degraded\"");
    }
}
