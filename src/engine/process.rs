//! Engine subprocess lifecycle: spawn, handshake, round trips, termination.
//!
//! The supervisor is owned by the request worker, which is the only caller
//! of its `&mut self` methods. That ownership is what keeps the channel in
//! strict write-then-read alternation.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};

use super::error::{EngineError, StartupError};
use super::protocol::{decode_handshake, encode_quit, ProtocolError, SystemInfo, MAX_LINE_SIZE};
use crate::telemetry::{log_security_event, SecurityEvent};

/// Supervisor lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorState {
    NotStarted,
    Starting,
    Ready,
    Stopping,
    Stopped,
    /// Channel closed, I/O failed or a request timed out. Needs `start()`.
    Crashed,
}

impl SupervisorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Crashed => "crashed",
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a `stop()` call. Never an error to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The engine was not running; nothing was sent.
    NotRunning,
    /// The engine exited after the quit sentinel.
    Exited { code: Option<i32> },
    /// The engine outlived the stop timeout and was killed.
    TimedOut,
}

/// What to launch: `<executable> --model <model_path> [extra_args...]`.
#[derive(Debug, Clone)]
pub struct EngineSpec {
    pub executable: PathBuf,
    pub model_path: PathBuf,
    pub extra_args: Vec<String>,
}

impl EngineSpec {
    pub fn new(executable: impl Into<PathBuf>, model_path: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            model_path: model_path.into(),
            extra_args: Vec::new(),
        }
    }
}

/// Timeouts applied by the supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub handshake_timeout: Duration,
    pub stop_timeout: Duration,
    /// Bound on one write/read round trip. None = wait forever.
    pub request_timeout: Option<Duration>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(120),
            stop_timeout: Duration::from_secs(10),
            request_timeout: Some(Duration::from_secs(300)),
        }
    }
}

type EngineWriter = Box<dyn AsyncWrite + Send + Unpin>;
type EngineReader = BufReader<Box<dyn AsyncRead + Send + Unpin>>;

enum LineRead {
    Line(String),
    Eof,
    /// More than `MAX_LINE_SIZE` bytes without a newline. The tail is still
    /// buffered, so the channel is out of step.
    TooLarge(usize),
}

/// Exclusive handle to a running engine's standard streams.
pub struct EngineChannel {
    writer: EngineWriter,
    reader: EngineReader,
    child: Option<Child>,
}

impl EngineChannel {
    pub fn new<W, R>(writer: W, reader: R) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            writer: Box::new(writer),
            reader: BufReader::new(Box::new(reader)),
            child: None,
        }
    }

    /// Attach the OS process so stop and crash handling can reap it.
    pub fn with_child(mut self, child: Child) -> Self {
        self.child = Some(child);
        self
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(|c| c.id())
    }

    async fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await
    }

    /// Read one line without its terminator.
    async fn read_line(&mut self) -> std::io::Result<LineRead> {
        let mut buf = Vec::new();
        let limit = MAX_LINE_SIZE as u64 + 1;
        let n = (&mut self.reader).take(limit).read_until(b'\n', &mut buf).await?;
        if n == 0 {
            return Ok(LineRead::Eof);
        }
        if n as u64 == limit && buf.last() != Some(&b'\n') {
            return Ok(LineRead::TooLarge(n));
        }
        while matches!(buf.last(), Some(b'\n' | b'\r')) {
            buf.pop();
        }
        String::from_utf8(buf)
            .map(LineRead::Line)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Wait for the engine to exit. `None` if it outlives `timeout`.
    async fn wait_exit(&mut self, timeout: Duration) -> Option<Option<i32>> {
        match self.child.as_mut() {
            Some(child) => match tokio::time::timeout(timeout, child.wait()).await {
                Ok(Ok(status)) => Some(status.code()),
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "failed to wait for engine exit");
                    Some(None)
                }
                Err(_) => None,
            },
            None => {
                // No OS process: exit is observed as EOF on the output stream.
                let drain = async {
                    while let Ok(LineRead::Line(_) | LineRead::TooLarge(_)) = self.read_line().await {}
                };
                tokio::time::timeout(timeout, drain).await.ok().map(|_| None)
            }
        }
    }

    async fn kill(&mut self) {
        if let Some(child) = self.child.as_mut() {
            if let Err(e) = child.kill().await {
                tracing::warn!(error = %e, "failed to kill engine process");
            }
        }
    }
}

/// Produces a fresh engine channel for each `start()`.
pub trait EngineLauncher: Send {
    fn launch(&mut self) -> Result<EngineChannel, StartupError>;

    /// Human-readable description for logs.
    fn describe(&self) -> String;
}

/// Launches the engine as an OS subprocess.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    spec: EngineSpec,
}

impl ProcessLauncher {
    pub fn new(spec: EngineSpec) -> Self {
        Self { spec }
    }
}

impl EngineLauncher for ProcessLauncher {
    fn launch(&mut self) -> Result<EngineChannel, StartupError> {
        let mut command = Command::new(&self.spec.executable);
        command
            .arg("--model")
            .arg(&self.spec.model_path)
            .args(&self.spec.extra_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| StartupError::Spawn {
            executable: self.spec.executable.display().to_string(),
            source,
        })?;

        let stdin = child.stdin.take().ok_or(StartupError::MissingStdio("stdin"))?;
        let stdout = child.stdout.take().ok_or(StartupError::MissingStdio("stdout"))?;
        Ok(EngineChannel::new(stdin, stdout).with_child(child))
    }

    fn describe(&self) -> String {
        format!(
            "{} --model {}",
            self.spec.executable.display(),
            self.spec.model_path.display()
        )
    }
}

/// Owns the engine channel and its lifecycle state.
pub struct ProcessSupervisor {
    launcher: Box<dyn EngineLauncher>,
    config: SupervisorConfig,
    state: SupervisorState,
    channel: Option<EngineChannel>,
    system_info: Option<Arc<SystemInfo>>,
}

impl ProcessSupervisor {
    pub fn new(launcher: Box<dyn EngineLauncher>, config: SupervisorConfig) -> Self {
        Self {
            launcher,
            config,
            state: SupervisorState::NotStarted,
            channel: None,
            system_info: None,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn system_info(&self) -> Option<Arc<SystemInfo>> {
        self.system_info.clone()
    }

    /// Spawn the engine and read its handshake. No-op when already ready.
    pub async fn start(&mut self) -> Result<Arc<SystemInfo>, StartupError> {
        if self.state == SupervisorState::Ready {
            if let Some(info) = &self.system_info {
                return Ok(Arc::clone(info));
            }
        }

        if let Some(mut stale) = self.channel.take() {
            stale.kill().await;
        }

        self.state = SupervisorState::Starting;
        tracing::info!(engine = %self.launcher.describe(), "starting engine");

        let mut channel = match self.launcher.launch() {
            Ok(channel) => channel,
            Err(e) => return Err(self.fail_start(e)),
        };

        match handshake(&mut channel, self.config.handshake_timeout).await {
            Ok(info) => {
                let info = Arc::new(info);
                tracing::info!(pid = ?channel.pid(), system_info = %info, "engine ready");
                self.channel = Some(channel);
                self.system_info = Some(Arc::clone(&info));
                self.state = SupervisorState::Ready;
                Ok(info)
            }
            Err(e) => {
                channel.kill().await;
                Err(self.fail_start(e))
            }
        }
    }

    fn fail_start(&mut self, error: StartupError) -> StartupError {
        tracing::error!(error = %error, "engine failed to start");
        self.state = SupervisorState::Stopped;
        self.system_info = None;
        error
    }

    /// Write one request line and read exactly one response line.
    pub async fn round_trip(&mut self, line: &str) -> Result<String, EngineError> {
        if self.state != SupervisorState::Ready {
            return Err(EngineError::NotReady(self.state));
        }
        let Some(channel) = self.channel.as_mut() else {
            return Err(EngineError::NotReady(self.state));
        };

        let outcome = {
            let exchange = async {
                channel.write_line(line).await?;
                channel.read_line().await
            };
            match self.config.request_timeout {
                Some(limit) => tokio::time::timeout(limit, exchange).await.ok(),
                None => Some(exchange.await),
            }
        };

        match outcome {
            Some(Ok(LineRead::Line(response))) => Ok(response),
            Some(Ok(LineRead::TooLarge(size))) => {
                self.mark_crashed("engine reply exceeded the line limit").await;
                Err(EngineError::Protocol(ProtocolError::LineTooLarge {
                    size,
                    max: MAX_LINE_SIZE,
                }))
            }
            Some(Ok(LineRead::Eof)) => {
                self.mark_crashed("engine closed its output").await;
                Err(EngineError::Crashed)
            }
            Some(Err(e)) => {
                self.mark_crashed("engine channel I/O failed").await;
                Err(EngineError::Io(e))
            }
            None => {
                let ms = self
                    .config
                    .request_timeout
                    .map(|d| d.as_millis() as u64)
                    .unwrap_or_default();
                self.mark_crashed("engine response timed out").await;
                Err(EngineError::Timeout(ms))
            }
        }
    }

    async fn mark_crashed(&mut self, reason: &str) {
        log_security_event(
            SecurityEvent::EngineFault,
            reason,
            &[("previous_state", self.state.as_str())],
        );
        if let Some(mut channel) = self.channel.take() {
            channel.kill().await;
        }
        self.state = SupervisorState::Crashed;
        self.system_info = None;
    }

    /// Send the quit sentinel and wait for exit. No-op unless ready.
    pub async fn stop(&mut self) -> StopOutcome {
        if self.state != SupervisorState::Ready {
            tracing::debug!(state = %self.state, "stop ignored: engine not ready");
            return StopOutcome::NotRunning;
        }
        let Some(mut channel) = self.channel.take() else {
            self.state = SupervisorState::Stopped;
            return StopOutcome::NotRunning;
        };

        self.state = SupervisorState::Stopping;
        if let Err(e) = channel.write_line(encode_quit()).await {
            tracing::warn!(error = %e, "failed to send quit sentinel");
        }

        let outcome = match channel.wait_exit(self.config.stop_timeout).await {
            Some(code) => {
                tracing::info!(exit_code = ?code, "engine stopped");
                StopOutcome::Exited { code }
            }
            None => {
                tracing::warn!(
                    timeout_ms = self.config.stop_timeout.as_millis() as u64,
                    "engine still running after stop timeout, killing it"
                );
                channel.kill().await;
                StopOutcome::TimedOut
            }
        };

        self.state = SupervisorState::Stopped;
        self.system_info = None;
        outcome
    }
}

async fn handshake(channel: &mut EngineChannel, timeout: Duration) -> Result<SystemInfo, StartupError> {
    let line = match tokio::time::timeout(timeout, channel.read_line()).await {
        Err(_) => return Err(StartupError::HandshakeTimeout(timeout.as_millis() as u64)),
        Ok(Err(e)) => return Err(StartupError::Io(e)),
        Ok(Ok(LineRead::Eof)) => return Err(StartupError::MissingHandshake),
        Ok(Ok(LineRead::TooLarge(size))) => {
            return Err(StartupError::MalformedHandshake(ProtocolError::LineTooLarge {
                size,
                max: MAX_LINE_SIZE,
            }))
        }
        Ok(Ok(LineRead::Line(line))) => line,
    };
    decode_handshake(&line).map_err(StartupError::MalformedHandshake)
}
