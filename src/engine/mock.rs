//! Scriptable stand-in for the Alpaca engine.
//!
//! Speaks the same line protocol as the real engine. Behaviour is chosen by
//! keywords in the model path (`no-handshake`, `bad-handshake`,
//! `ignore-quit`, `slow`) and by markers in the input text:
//!
//! | marker        | reply                                  |
//! |---------------|----------------------------------------|
//! | `[error:msg]` | `{"error":"msg"}`                      |
//! | `[hang]`      | nothing; keeps reading until EOF       |
//! | `[crash]`     | closes its output                      |
//! | `[garbage]`   | a non-JSON line                        |
//! | `[nested]`    | an object with a nested value          |
//! | `[oversize]`  | a line longer than `MAX_LINE_SIZE`     |
//!
//! Anything else is answered with `echo: <input_text>`.

use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use super::error::StartupError;
use super::process::{EngineChannel, EngineLauncher};
use super::protocol::{
    decode_request, encode_error, encode_result, is_quit_line, InferenceRequest, InferenceResult,
    MAX_LINE_SIZE,
};

pub const DEFAULT_HANDSHAKE: &str = r#"{"ctx_size":"2048","n_threads":"4"}"#;

#[derive(Debug, Clone)]
pub struct MockEngine {
    /// Raw first line. `None` closes the stream without a handshake.
    pub handshake: Option<String>,
    pub exit_on_quit: bool,
    /// Delay before every reply.
    pub latency: Duration,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self {
            handshake: Some(DEFAULT_HANDSHAKE.to_string()),
            exit_on_quit: true,
            latency: Duration::ZERO,
        }
    }
}

enum Reply {
    Line(String),
    Silent,
    Close,
}

impl MockEngine {
    /// Configure from the `--model` argument.
    pub fn from_model_arg(model: &str) -> Self {
        let mut engine = Self::default();
        if model.contains("no-handshake") {
            engine.handshake = None;
        } else if model.contains("bad-handshake") {
            engine.handshake = Some("llama_model_load: loading model".to_string());
        }
        if model.contains("ignore-quit") {
            engine.exit_on_quit = false;
        }
        if model.contains("slow") {
            engine.latency = Duration::from_millis(50);
        }
        engine
    }

    /// Serve one session until EOF, the quit sentinel or a `[crash]`.
    pub async fn serve<R, W>(&self, mut reader: R, mut writer: W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let Some(handshake) = &self.handshake else {
            return Ok(());
        };
        write_line(&mut writer, handshake).await?;

        let mut silent = false;
        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line).await? == 0 {
                return Ok(());
            }
            let line = line.trim_end_matches(['\r', '\n']);
            if is_quit_line(line) {
                if self.exit_on_quit {
                    return Ok(());
                }
                continue;
            }
            if silent {
                continue;
            }

            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            match self.reply(line) {
                Reply::Line(out) => write_line(&mut writer, &out).await?,
                Reply::Silent => silent = true,
                Reply::Close => return Ok(()),
            }
        }
    }

    fn reply(&self, line: &str) -> Reply {
        let request = match decode_request(line) {
            Ok(request) => request,
            Err(e) => return Reply::Line(error_line(&format!("bad request: {e}"))),
        };
        let text = request.input_text.as_str();

        if let Some(rest) = text.split("[error:").nth(1) {
            let message = rest.split(']').next().unwrap_or_default();
            return Reply::Line(error_line(message));
        }
        if text.contains("[hang]") {
            return Reply::Silent;
        }
        if text.contains("[crash]") {
            return Reply::Close;
        }
        if text.contains("[garbage]") {
            return Reply::Line("main: seed = 1679952842".to_string());
        }
        if text.contains("[oversize]") {
            let output = "x".repeat(MAX_LINE_SIZE + 10);
            return Reply::Line(format!(r#"{{"output":"{output}","input_token_length":"1"}}"#));
        }
        if text.contains("[nested]") {
            return Reply::Line(r#"{"output":{"text":"x"},"input_token_length":"1"}"#.to_string());
        }

        Reply::Line(
            encode_result(&echo_result(&request, self.latency))
                .unwrap_or_else(|e| error_line(&e.to_string())),
        )
    }
}

fn echo_result(request: &InferenceRequest, latency: Duration) -> InferenceResult {
    let input_tokens = request.input_text.split_whitespace().count() as i64;
    let words: Vec<&str> = request
        .input_text
        .split_whitespace()
        .take(request.params.n_predict.max(0) as usize)
        .collect();
    let output = format!("echo: {}", words.join(" "));
    let output_tokens = output.split_whitespace().count() as i64;

    InferenceResult {
        output,
        input_token_length: input_tokens,
        n_tokens_truncated: 0,
        output_token_length: output_tokens,
        reached_max_content_size: 0,
        total_predict_time_us: latency.as_micros() as i64,
        total_token_length: input_tokens + output_tokens,
        memory_per_token_bytes: None,
    }
}

fn error_line(message: &str) -> String {
    encode_error(message).unwrap_or_else(|_| r#"{"error":"internal"}"#.to_string())
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

/// Runs a `MockEngine` on an in-memory duplex pipe instead of a process.
#[derive(Debug, Clone, Default)]
pub struct MockLauncher {
    engine: MockEngine,
    launches: usize,
}

impl MockLauncher {
    pub fn new(engine: MockEngine) -> Self {
        Self { engine, launches: 0 }
    }
}

impl EngineLauncher for MockLauncher {
    fn launch(&mut self) -> Result<EngineChannel, StartupError> {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client);
        let (server_read, server_write) = tokio::io::split(server);

        let engine = self.engine.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.serve(BufReader::new(server_read), server_write).await {
                tracing::debug!(error = %e, "mock engine session ended with error");
            }
        });

        self.launches += 1;
        Ok(EngineChannel::new(client_write, client_read))
    }

    fn describe(&self) -> String {
        format!("in-memory mock engine (launch #{})", self.launches + 1)
    }
}
