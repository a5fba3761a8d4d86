// Copyright 2024-2026 alpaca-serve Contributors
// SPDX-License-Identifier: Apache-2.0

//! CLI subcommands for alpaca-serve.
//!
//! ## Usage
//!
//! ```bash
//! alpaca-serve serve                 # HTTP gateway (default)
//! alpaca-serve chat --cli-path ./chat --model-path ggml-alpaca-7b-q4.bin
//! alpaca-serve config show           # Effective configuration
//! alpaca-serve config validate       # Exit 0 if serve would start
//! ```

pub mod chat;
pub mod config_cmd;

pub use chat::{chat_loop, is_exit_command, run_chat, ChatOptions, EXIT_COMMANDS};
