//! `InferenceGateway`: the only entry point callers use to reach the engine.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::Instrument;

use super::error::EngineError;
use super::process::{
    EngineLauncher, EngineSpec, ProcessLauncher, ProcessSupervisor, StopOutcome, SupervisorConfig,
    SupervisorState,
};
use super::protocol::{encode_request, GenerationParams, InferenceRequest, InferenceResult, SystemInfo};
use super::worker::{spawn_worker, Command, EngineStatus, SerializerStats};
use crate::telemetry::{log_security_event, RequestSpan, SecurityEvent, SpanExt};

const INSTRUCTION_PREAMBLE: &str = "Below is an instruction that describes a task. \
Write a response that appropriately completes the request.\n\n### Instruction:\n\n";
const RESPONSE_MARKER: &str = "### Response:\n\n";

/// Wrap `text` in the instruction/response prompt the model was tuned on.
pub fn instruction_prompt(text: &str) -> String {
    format!("{INSTRUCTION_PREAMBLE}{text}{RESPONSE_MARKER}")
}

/// Instruction prompt asking for ad copy built from `keywords`.
pub fn advertisement_prompt(keywords: &str) -> String {
    instruction_prompt(&format!("Write an ad text based one the given keywords: {keywords}"))
}

impl InferenceRequest {
    pub fn with_instruction_template(mut self) -> Self {
        self.input_text = instruction_prompt(&self.input_text);
        self
    }

    pub fn with_advertisement_template(mut self) -> Self {
        self.input_text = advertisement_prompt(&self.input_text);
        self
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub supervisor: SupervisorConfig,
    /// Queue capacity in front of the engine.
    pub max_pending: usize,
    /// Largest encoded request line the engine can read.
    pub max_request_line: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            supervisor: SupervisorConfig::default(),
            max_pending: 64,
            max_request_line: super::protocol::ENGINE_INPUT_BUFFER,
        }
    }
}

/// Cloneable handle to the engine worker.
#[derive(Clone)]
pub struct InferenceGateway {
    commands: mpsc::Sender<Command>,
    status: Arc<EngineStatus>,
    max_pending: usize,
    max_request_line: usize,
}

impl InferenceGateway {
    /// Spawn the worker for `launcher`. The engine is not started yet.
    /// Must be called from within a tokio runtime.
    pub fn spawn(launcher: Box<dyn EngineLauncher>, config: GatewayConfig) -> Self {
        let max_pending = config.max_pending.max(1);
        let (tx, rx) = mpsc::channel(max_pending);
        let status = Arc::new(EngineStatus::new());
        let supervisor = ProcessSupervisor::new(launcher, config.supervisor);
        spawn_worker(supervisor, rx, Arc::clone(&status));

        Self {
            commands: tx,
            status,
            max_pending,
            max_request_line: config.max_request_line,
        }
    }

    /// Gateway over a real engine subprocess.
    pub fn for_process(spec: EngineSpec, config: GatewayConfig) -> Self {
        Self::spawn(Box::new(ProcessLauncher::new(spec)), config)
    }

    /// Launch the engine and wait for its handshake.
    pub async fn start(&self) -> Result<Arc<SystemInfo>, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Start { reply }).await?;
        rx.await.map_err(|_| EngineError::WorkerGone)?
    }

    /// Stop the engine after any queued work ahead of this call.
    pub async fn stop(&self) -> Result<StopOutcome, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stop { reply }).await?;
        rx.await.map_err(|_| EngineError::WorkerGone)
    }

    pub async fn run(
        &self,
        text: impl Into<String>,
        params: GenerationParams,
    ) -> Result<InferenceResult, EngineError> {
        self.run_request(InferenceRequest::with_params(text, params)).await
    }

    pub async fn run_with_instruction_template(
        &self,
        text: &str,
    ) -> Result<InferenceResult, EngineError> {
        self.run_request(InferenceRequest::new(text).with_instruction_template())
            .await
    }

    pub async fn run_request(
        &self,
        request: InferenceRequest,
    ) -> Result<InferenceResult, EngineError> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let span = RequestSpan::inference(&request_id, request.input_text.len());
        let started = std::time::Instant::now();

        let result = self
            .submit_run(request_id, &request)
            .instrument(span.clone())
            .await;

        span.record("latency_ms", started.elapsed().as_millis() as u64);
        if let Ok(r) = &result {
            span.record("output_tokens", r.output_token_length);
        }
        span.record_result(&result);
        result
    }

    async fn submit_run(
        &self,
        request_id: String,
        request: &InferenceRequest,
    ) -> Result<InferenceResult, EngineError> {
        request.params.validate().map_err(EngineError::InvalidParams)?;

        let state = self.status.state();
        if !state.is_ready() {
            return Err(EngineError::NotReady(state));
        }

        let line = encode_request(request)?;
        if line.len() > self.max_request_line {
            log_security_event(
                SecurityEvent::ResourceLimitExceeded,
                "request line over engine input limit",
                &[
                    ("size", &line.len().to_string()),
                    ("max", &self.max_request_line.to_string()),
                ],
            );
            return Err(EngineError::RequestTooLarge {
                size: line.len(),
                max: self.max_request_line,
            });
        }

        let (reply, rx) = oneshot::channel();
        self.status.enqueued();
        if let Err(e) = self.commands.try_send(Command::Run { request_id, line, reply }) {
            self.status.dequeued();
            return Err(match e {
                mpsc::error::TrySendError::Full(_) => {
                    log_security_event(
                        SecurityEvent::ResourceLimitExceeded,
                        "engine queue full",
                        &[("max_pending", &self.max_pending.to_string())],
                    );
                    EngineError::QueueFull(self.max_pending)
                }
                mpsc::error::TrySendError::Closed(_) => EngineError::WorkerGone,
            });
        }
        rx.await.map_err(|_| EngineError::WorkerGone)?
    }

    async fn send(&self, command: Command) -> Result<(), EngineError> {
        self.status.enqueued();
        if self.commands.send(command).await.is_err() {
            self.status.dequeued();
            return Err(EngineError::WorkerGone);
        }
        Ok(())
    }

    pub fn state(&self) -> SupervisorState {
        self.status.state()
    }

    pub fn system_info(&self) -> Option<Arc<SystemInfo>> {
        self.status.system_info()
    }

    pub fn stats(&self) -> SerializerStats {
        self.status.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::{MockEngine, MockLauncher};
    use std::time::Duration;

    fn gateway(engine: MockEngine) -> InferenceGateway {
        let config = GatewayConfig {
            supervisor: SupervisorConfig {
                handshake_timeout: Duration::from_millis(500),
                stop_timeout: Duration::from_millis(200),
                request_timeout: Some(Duration::from_millis(500)),
            },
            ..Default::default()
        };
        InferenceGateway::spawn(Box::new(MockLauncher::new(engine)), config)
    }

    #[test]
    fn test_instruction_prompt() {
        let prompt = instruction_prompt("Name three colors.");
        assert!(prompt.starts_with("Below is an instruction that describes a task."));
        assert!(prompt.contains("### Instruction:\n\nName three colors.### Response:\n\n"));
    }

    #[test]
    fn test_advertisement_template() {
        let request = InferenceRequest::new("4K OLED TV").with_advertisement_template();
        assert!(request
            .input_text
            .contains("Write an ad text based one the given keywords: 4K OLED TV"));
        assert_eq!(request.params, GenerationParams::default());
    }

    #[tokio::test]
    async fn test_run_before_start_fails_fast() {
        let gw = gateway(MockEngine::default());
        let err = gw.run("hi", GenerationParams::default()).await.unwrap_err();
        assert!(matches!(err, EngineError::NotReady(SupervisorState::NotStarted)));
    }

    #[tokio::test]
    async fn test_start_run_stop() {
        let gw = gateway(MockEngine::default());
        let info = gw.start().await.unwrap();
        assert_eq!(info.get("ctx_size"), Some(2048));
        assert_eq!(gw.state(), SupervisorState::Ready);

        let result = gw.run("hi", GenerationParams::default()).await.unwrap();
        assert_eq!(result.output, "echo: hi");

        assert_eq!(gw.stop().await.unwrap(), StopOutcome::Exited { code: None });
        assert_eq!(gw.state(), SupervisorState::Stopped);
        assert!(gw.system_info().is_none());
    }

    #[tokio::test]
    async fn test_engine_error_keeps_engine_ready() {
        let gw = gateway(MockEngine::default());
        gw.start().await.unwrap();

        let err = gw.run("[error:oom]", GenerationParams::default()).await.unwrap_err();
        assert!(matches!(err, EngineError::Engine(ref m) if m == "oom"));
        assert_eq!(gw.state(), SupervisorState::Ready);

        assert!(gw.run("next", GenerationParams::default()).await.is_ok());
        let stats = gw.stats();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test]
    async fn test_protocol_error_does_not_change_state() {
        let gw = gateway(MockEngine::default());
        gw.start().await.unwrap();
        let err = gw.run("[garbage]", GenerationParams::default()).await.unwrap_err();
        assert!(matches!(err, EngineError::Protocol(_)));
        assert_eq!(gw.state(), SupervisorState::Ready);
    }

    #[tokio::test]
    async fn test_invalid_params_rejected() {
        let gw = gateway(MockEngine::default());
        gw.start().await.unwrap();
        let params = GenerationParams {
            top_p: 1.5,
            ..Default::default()
        };
        let err = gw.run("hi", params).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidParams(_)));
    }

    #[tokio::test]
    async fn test_oversized_request_rejected() {
        let gw = gateway(MockEngine::default());
        gw.start().await.unwrap();
        let err = gw
            .run("x".repeat(5000), GenerationParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::RequestTooLarge { max: 4095, .. }));
        assert_eq!(gw.state(), SupervisorState::Ready);
    }

    #[tokio::test]
    async fn test_crash_then_not_ready_until_restart() {
        let gw = gateway(MockEngine::default());
        gw.start().await.unwrap();

        let err = gw.run("[crash]", GenerationParams::default()).await.unwrap_err();
        assert!(matches!(err, EngineError::Crashed));
        let err = gw.run("hi", GenerationParams::default()).await.unwrap_err();
        assert!(matches!(err, EngineError::NotReady(SupervisorState::Crashed)));

        gw.start().await.unwrap();
        assert!(gw.run("hi", GenerationParams::default()).await.is_ok());
    }

    #[tokio::test]
    async fn test_run_with_instruction_template() {
        let gw = gateway(MockEngine::default());
        gw.start().await.unwrap();
        let result = gw.run_with_instruction_template("hello").await.unwrap();
        assert!(result.output.starts_with("echo: Below is an instruction"));
    }
}
