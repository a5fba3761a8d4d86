//! `alpaca-mock-engine --model <path>`: a line-protocol engine for tests and demos.

use std::process::ExitCode;

use alpaca_serve::engine::MockEngine;
use tokio::io::BufReader;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let model = match args.iter().position(|a| a == "--model") {
        Some(i) => args.get(i + 1).cloned(),
        None => None,
    };
    let Some(model) = model else {
        eprintln!("usage: alpaca-mock-engine --model <path>");
        return ExitCode::from(2);
    };

    let engine = MockEngine::from_model_arg(&model);
    match engine
        .serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await
    {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("alpaca-mock-engine: {e}");
            ExitCode::FAILURE
        }
    }
}
