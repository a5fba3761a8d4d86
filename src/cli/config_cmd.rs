// Copyright 2024-2026 alpaca-serve Contributors
// SPDX-License-Identifier: Apache-2.0

//! Config CLI subcommands: show, defaults, validate.
//!
//! Read the environment (and `ALPACA_CONFIG_FILE`) directly; no server needed.

use crate::config::{self, EffectiveConfig, DEFAULT_BIND_ADDR};
use crate::engine::protocol::ENGINE_INPUT_BUFFER;

/// Print effective config as key-value pairs to stdout.
pub fn run_show() -> i32 {
    match config::load() {
        Ok(cfg) => {
            print_config(&cfg.effective_config());
            0
        }
        Err(e) => {
            eprintln!("ERROR: {e}");
            1
        }
    }
}

/// Print documented defaults, ignoring the environment.
pub fn run_defaults() {
    for (key, value) in default_pairs() {
        println!("{key}={value}");
    }
}

fn default_pairs() -> Vec<(&'static str, String)> {
    vec![
        ("ALPACA_CLI_PATH", "<required>".to_string()),
        ("ALPACA_MODEL_PATH", "<required>".to_string()),
        ("KEYS_PATH", "<required>".to_string()),
        ("ALPACA_BIND_ADDR", DEFAULT_BIND_ADDR.to_string()),
        ("ALPACA_HANDSHAKE_TIMEOUT", "120".to_string()),
        ("ALPACA_REQUEST_TIMEOUT", "300".to_string()),
        ("ALPACA_STOP_TIMEOUT", "10".to_string()),
        ("ALPACA_MAX_PENDING", "64".to_string()),
        ("ALPACA_MAX_REQUEST_LINE", ENGINE_INPUT_BUFFER.to_string()),
        ("ALPACA_LOG_FORMAT", "json".to_string()),
        ("ALPACA_LOG_LEVEL", "info".to_string()),
    ]
}

/// Check everything `serve` needs. Returns 0 if valid, 1 otherwise.
pub fn run_validate() -> i32 {
    let cfg = match config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("ERROR: {e}");
            return 1;
        }
    };

    let problems = cfg.problems();
    for problem in &problems {
        eprintln!("ERROR: {problem}");
    }
    if cfg.request_timeout.is_none() {
        eprintln!("WARNING: ALPACA_REQUEST_TIMEOUT is 0; a hung engine blocks every caller");
    }

    if problems.is_empty() {
        println!("Configuration is valid.");
        0
    } else {
        1
    }
}

fn print_config(cfg: &EffectiveConfig) {
    println!("ALPACA_CLI_PATH={}", cfg.cli_path);
    println!("ALPACA_MODEL_PATH={}", cfg.model_path);
    println!("KEYS_PATH={}", cfg.keys_path);
    println!("ALPACA_BIND_ADDR={}", cfg.bind_addr);
    println!("ALPACA_HANDSHAKE_TIMEOUT={}", cfg.handshake_timeout_secs);
    println!("ALPACA_REQUEST_TIMEOUT={}", cfg.request_timeout_secs);
    println!("ALPACA_STOP_TIMEOUT={}", cfg.stop_timeout_secs);
    println!("ALPACA_MAX_PENDING={}", cfg.max_pending);
    println!("ALPACA_MAX_REQUEST_LINE={}", cfg.max_request_line);
    println!("ALPACA_LOG_FORMAT={}", cfg.log_format);
    println!("ALPACA_LOG_LEVEL={}", cfg.log_level);
}
