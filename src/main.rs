//! alpaca-serve entry point.
//!
//! ## Subcommands
//!
//! - `alpaca-serve` or `alpaca-serve serve` - Run the HTTP gateway (default)
//! - `alpaca-serve chat` - Interactive terminal session
//! - `alpaca-serve config show|defaults|validate` - Inspect configuration
//! - `alpaca-serve version` - Print version

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use alpaca_serve::cli::{self, config_cmd};
use alpaca_serve::{config, server, telemetry, AppContext};

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("serve");

    match command {
        "serve" | "" => match run_server().await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("Server error: {e:#}");
                ExitCode::FAILURE
            }
        },
        "chat" => exit_code(cli::run_chat(&args[2..]).await),
        "config" => {
            let sub = args.get(2).map(|s| s.as_str()).unwrap_or("show");
            match sub {
                "show" => exit_code(config_cmd::run_show()),
                "defaults" => {
                    config_cmd::run_defaults();
                    ExitCode::SUCCESS
                }
                "validate" => exit_code(config_cmd::run_validate()),
                other => {
                    eprintln!("Unknown config subcommand: {other}");
                    eprintln!("Usage: alpaca-serve config [show|defaults|validate]");
                    ExitCode::FAILURE
                }
            }
        }
        "version" | "--version" | "-V" => {
            println!("alpaca-serve {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        "help" | "--help" | "-h" => {
            print_usage();
            ExitCode::SUCCESS
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            ExitCode::FAILURE
        }
    }
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(code.clamp(0, 255) as u8)
}

fn print_usage() {
    eprintln!("alpaca-serve {}", env!("CARGO_PKG_VERSION"));
    eprintln!("HTTP gateway for a local Alpaca engine");
    eprintln!();
    eprintln!("USAGE:");
    eprintln!("    alpaca-serve [COMMAND]");
    eprintln!();
    eprintln!("COMMANDS:");
    eprintln!("    serve       Run the HTTP gateway (default)");
    eprintln!("    chat        Chat with the engine in the terminal");
    eprintln!("                  --cli-path <PATH> --model-path <PATH>");
    eprintln!("    config      show | defaults | validate");
    eprintln!("    version     Print version");
    eprintln!("    help        Print this message");
    eprintln!();
    eprintln!("ENVIRONMENT:");
    eprintln!("    ALPACA_CLI_PATH, ALPACA_MODEL_PATH, KEYS_PATH (required)");
    eprintln!("    See `alpaca-serve config defaults` for the rest.");
}

async fn run_server() -> anyhow::Result<()> {
    let env = config::load().context("loading configuration")?;
    telemetry::init_logging(&env.log_config()).context("initializing logging")?;
    telemetry::init_metrics();

    let ctx = Arc::new(AppContext::from_config(&env).context("building application context")?);
    let info = ctx.start().await.context("starting engine")?;
    tracing::info!(system_info = %info, "engine handshake complete");

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("shutdown signal received, draining");
                signal.cancel();
            }
            Err(e) => tracing::warn!(error = %e, "cannot listen for ctrl-c, serving until killed"),
        }
    });

    server::serve_and_stop(ctx, env.bind_addr, shutdown)
        .await
        .context("HTTP server")
}
