//! The single owner of the engine channel.
//!
//! Gateways enqueue commands; this task executes them one at a time, so at
//! most one round trip is ever outstanding. Start and stop use the same
//! queue as runs, so a stop waits behind an in-flight run.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::error::EngineError;
use super::process::{ProcessSupervisor, StopOutcome, SupervisorState};
use super::protocol::{decode_response, EngineReply, InferenceResult, SystemInfo};
use crate::telemetry;

pub(crate) type Reply<T> = oneshot::Sender<Result<T, EngineError>>;

pub(crate) enum Command {
    Start {
        reply: Reply<Arc<SystemInfo>>,
    },
    Run {
        request_id: String,
        line: String,
        reply: Reply<InferenceResult>,
    },
    Stop {
        reply: oneshot::Sender<StopOutcome>,
    },
}

/// Counters maintained by the worker. Readable without touching the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SerializerStats {
    /// Commands queued but not yet picked up.
    pub pending: usize,
    pub in_flight: usize,
    /// Highest `in_flight` ever observed. Never above 1.
    pub peak_in_flight: usize,
    pub completed: u64,
    pub failed: u64,
}

/// Engine status shared between the worker and every gateway handle.
pub(crate) struct EngineStatus {
    snapshot: RwLock<(SupervisorState, Option<Arc<SystemInfo>>)>,
    pending: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl EngineStatus {
    pub(crate) fn new() -> Self {
        Self {
            snapshot: RwLock::new((SupervisorState::NotStarted, None)),
            pending: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub(crate) fn state(&self) -> SupervisorState {
        self.snapshot.read().0
    }

    pub(crate) fn system_info(&self) -> Option<Arc<SystemInfo>> {
        self.snapshot.read().1.clone()
    }

    pub(crate) fn stats(&self) -> SerializerStats {
        SerializerStats {
            pending: self.pending.load(Ordering::Acquire),
            in_flight: self.in_flight.load(Ordering::Acquire),
            peak_in_flight: self.peak_in_flight.load(Ordering::Acquire),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn enqueued(&self) {
        let depth = self.pending.fetch_add(1, Ordering::AcqRel) + 1;
        telemetry::record_queue_depth(depth);
    }

    pub(crate) fn dequeued(&self) {
        let depth = self.pending.fetch_sub(1, Ordering::AcqRel).saturating_sub(1);
        telemetry::record_queue_depth(depth);
    }

    fn publish(&self, supervisor: &ProcessSupervisor) {
        let state = supervisor.state();
        *self.snapshot.write() = (state, supervisor.system_info());
        telemetry::record_engine_ready(state.is_ready());
    }

    fn record<T>(&self, result: &Result<T, EngineError>) {
        match result {
            Ok(_) => self.completed.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.failed.fetch_add(1, Ordering::Relaxed),
        };
    }
}

/// RAII marker for the exclusive section around one round trip.
struct SectionGuard<'a> {
    status: &'a EngineStatus,
}

impl<'a> SectionGuard<'a> {
    fn enter(status: &'a EngineStatus) -> Self {
        let now = status.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        status.peak_in_flight.fetch_max(now, Ordering::AcqRel);
        Self { status }
    }
}

impl Drop for SectionGuard<'_> {
    fn drop(&mut self) {
        self.status.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Spawn the worker loop. It exits, stopping the engine, once every
/// sender has been dropped.
pub(crate) fn spawn_worker(
    supervisor: ProcessSupervisor,
    commands: mpsc::Receiver<Command>,
    status: Arc<EngineStatus>,
) -> JoinHandle<()> {
    tokio::spawn(worker_loop(supervisor, commands, status))
}

async fn worker_loop(
    mut supervisor: ProcessSupervisor,
    mut commands: mpsc::Receiver<Command>,
    status: Arc<EngineStatus>,
) {
    while let Some(command) = commands.recv().await {
        status.dequeued();
        match command {
            Command::Start { reply } => {
                let result = supervisor.start().await.map_err(EngineError::from);
                status.publish(&supervisor);
                let _ = reply.send(result);
            }
            Command::Run { request_id, line, reply } => {
                if reply.is_closed() {
                    tracing::debug!(%request_id, "caller went away before its turn, skipping");
                    continue;
                }
                let result = execute_run(&mut supervisor, &status, &request_id, &line).await;
                status.publish(&supervisor);
                status.record(&result);
                let _ = reply.send(result);
            }
            Command::Stop { reply } => {
                let outcome = supervisor.stop().await;
                status.publish(&supervisor);
                let _ = reply.send(outcome);
            }
        }
    }

    tracing::info!("all gateway handles dropped, shutting engine down");
    supervisor.stop().await;
    status.publish(&supervisor);
}

async fn execute_run(
    supervisor: &mut ProcessSupervisor,
    status: &EngineStatus,
    request_id: &str,
    line: &str,
) -> Result<InferenceResult, EngineError> {
    let _section = SectionGuard::enter(status);
    let start = Instant::now();

    let result = match supervisor.round_trip(line).await {
        Ok(response) => match decode_response(&response) {
            Ok(EngineReply::Completed(result)) => Ok(result),
            Ok(EngineReply::Failed(message)) => Err(EngineError::Engine(message)),
            Err(e) => {
                tracing::warn!(%request_id, error = %e, "engine sent a malformed response");
                Err(EngineError::Protocol(e))
            }
        },
        Err(e) => Err(e),
    };

    let latency_ms = start.elapsed().as_millis() as u64;
    match &result {
        Ok(r) => {
            tracing::debug!(%request_id, latency_ms, output_tokens = r.output_token_length, "inference complete");
            telemetry::record_request_success(latency_ms, r.output_token_length);
        }
        Err(e) => {
            tracing::info!(%request_id, latency_ms, error = %e, "inference failed");
            telemetry::record_request_failure(e.kind());
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_guard_tracks_peak() {
        let status = EngineStatus::new();
        {
            let _a = SectionGuard::enter(&status);
            assert_eq!(status.stats().in_flight, 1);
        }
        let _b = SectionGuard::enter(&status);
        let stats = status.stats();
        assert_eq!(stats.in_flight, 1);
        assert_eq!(stats.peak_in_flight, 1);
    }

    #[test]
    fn test_pending_counter() {
        let status = EngineStatus::new();
        status.enqueued();
        status.enqueued();
        status.dequeued();
        assert_eq!(status.stats().pending, 1);
    }

    #[test]
    fn test_initial_state() {
        let status = EngineStatus::new();
        assert_eq!(status.state(), SupervisorState::NotStarted);
        assert!(status.system_info().is_none());
        assert_eq!(status.stats(), SerializerStats::default());
    }
}
