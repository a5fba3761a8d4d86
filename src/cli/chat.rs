// Copyright 2024-2026 alpaca-serve Contributors
// SPDX-License-Identifier: Apache-2.0

//! Interactive terminal chat against a local engine.
//!
//! Each line is wrapped in the instruction template and sent through the
//! same gateway the HTTP server uses.

use std::path::PathBuf;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::config;
use crate::engine::{EngineSpec, InferenceGateway};

/// Inputs that end the session.
pub const EXIT_COMMANDS: &[&str] = &["q", "quit", "exit", "quit()", "exit()", "quit();", "exit();"];

pub fn is_exit_command(input: &str) -> bool {
    EXIT_COMMANDS.contains(&input.trim())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatOptions {
    pub cli_path: PathBuf,
    pub model_path: PathBuf,
}

/// Parse `--cli-path` / `--model-path`, falling back to the environment.
pub fn parse_chat_args(args: &[String]) -> Result<ChatOptions, String> {
    let mut cli_path = None;
    let mut model_path = None;

    let mut i = 0;
    while i < args.len() {
        let slot = match args[i].as_str() {
            "--cli-path" => &mut cli_path,
            "--model-path" => &mut model_path,
            other => return Err(format!("Unknown argument: {other}")),
        };
        let Some(value) = args.get(i + 1) else {
            return Err(format!("Missing value for {}", args[i]));
        };
        *slot = Some(PathBuf::from(value));
        i += 2;
    }

    let env = config::load().ok();
    let cli_path = cli_path
        .or_else(|| env.as_ref().and_then(|c| c.cli_path.clone()))
        .ok_or("Missing --cli-path (or ALPACA_CLI_PATH)")?;
    let model_path = model_path
        .or_else(|| env.as_ref().and_then(|c| c.model_path.clone()))
        .ok_or("Missing --model-path (or ALPACA_MODEL_PATH)")?;

    Ok(ChatOptions {
        cli_path,
        model_path,
    })
}

/// Read prompts until EOF or an exit command. Returns the number of
/// prompts answered. Engine errors are printed and the loop continues.
pub async fn chat_loop<R, W>(gateway: &InferenceGateway, input: R, mut output: W) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    let mut answered = 0;

    loop {
        output.write_all(b"> ").await?;
        output.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let prompt = line.trim();
        if is_exit_command(prompt) {
            break;
        }
        if prompt.is_empty() {
            continue;
        }

        match gateway.run_with_instruction_template(prompt).await {
            Ok(result) => {
                output.write_all(result.output.as_bytes()).await?;
                output.write_all(b"\n").await?;
                answered += 1;
            }
            Err(e) => {
                output.write_all(format!("error: {e}\n").as_bytes()).await?;
            }
        }
    }
    Ok(answered)
}

/// `alpaca-serve chat`: returns the process exit code.
pub async fn run_chat(args: &[String]) -> i32 {
    let options = match parse_chat_args(args) {
        Ok(options) => options,
        Err(msg) => {
            eprintln!("{msg}");
            eprintln!("Usage: alpaca-serve chat --cli-path <PATH> --model-path <PATH>");
            return 1;
        }
    };

    let gateway_config = config::load()
        .map(|c| c.gateway_config())
        .unwrap_or_default();
    let gateway = InferenceGateway::for_process(
        EngineSpec::new(options.cli_path, options.model_path),
        gateway_config,
    );

    if let Err(e) = gateway.start().await {
        eprintln!("Failed to start engine: {e}");
        return 1;
    }

    let session = chat_loop(&gateway, BufReader::new(tokio::io::stdin()), tokio::io::stdout());
    let code = tokio::select! {
        result = session => match result {
            Ok(_) => 0,
            Err(e) => {
                eprintln!("I/O error: {e}");
                1
            }
        },
        _ = tokio::signal::ctrl_c() => 0,
    };

    let _ = gateway.stop().await;
    code
}
