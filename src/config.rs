//! Gateway configuration from environment variables and an optional TOML file.
//!
//! Environment variables win over the file. Invalid numeric values fall back
//! to defaults; the three paths are required and must exist before `serve`.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `ALPACA_CLI_PATH` | required | Engine executable |
//! | `ALPACA_MODEL_PATH` | required | Model file passed as `--model` |
//! | `KEYS_PATH` | required | Newline-delimited bearer tokens |
//! | `ALPACA_BIND_ADDR` | 0.0.0.0:8080 | HTTP listen address |
//! | `ALPACA_HANDSHAKE_TIMEOUT` | 120 | Seconds to wait for the handshake |
//! | `ALPACA_REQUEST_TIMEOUT` | 300 | Seconds per round trip (0 = unbounded) |
//! | `ALPACA_STOP_TIMEOUT` | 10 | Seconds to wait for exit after `quit();` |
//! | `ALPACA_MAX_PENDING` | 64 | Requests queued in front of the engine |
//! | `ALPACA_MAX_REQUEST_LINE` | 4095 | Max encoded request bytes |
//! | `ALPACA_LOG_FORMAT` | json | `json` or `pretty` |
//! | `ALPACA_LOG_LEVEL` | info | Filter directive (`RUST_LOG` wins) |
//! | `ALPACA_CONFIG_FILE` | unset | TOML file with the same keys in snake_case |

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::protocol::{ENGINE_INPUT_BUFFER, MAX_LINE_SIZE};
use crate::engine::{EngineSpec, GatewayConfig, SupervisorConfig};
use crate::telemetry::{LogConfig, LogFormat};

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_HANDSHAKE_SECS: u64 = 120;
const DEFAULT_REQUEST_SECS: u64 = 300;
const DEFAULT_STOP_SECS: u64 = 10;
const DEFAULT_MAX_PENDING: usize = 64;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("{key} points to '{path}', which does not exist")]
    NotFound { key: &'static str, path: PathBuf },

    #[error("Invalid value for {key}: '{value}'")]
    InvalidValue { key: &'static str, value: String },

    #[error("Failed to read config file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {source}")]
    FileParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Keys accepted in the TOML file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    cli_path: Option<PathBuf>,
    model_path: Option<PathBuf>,
    keys_path: Option<PathBuf>,
    bind_addr: Option<String>,
    handshake_timeout: Option<u64>,
    request_timeout: Option<u64>,
    stop_timeout: Option<u64>,
    max_pending: Option<usize>,
    max_request_line: Option<usize>,
    log_format: Option<String>,
    log_level: Option<String>,
}

/// Everything the gateway reads at startup.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub cli_path: Option<PathBuf>,
    pub model_path: Option<PathBuf>,
    pub keys_path: Option<PathBuf>,
    pub bind_addr: SocketAddr,
    pub handshake_timeout: Duration,
    /// None disables the per-request bound.
    pub request_timeout: Option<Duration>,
    pub stop_timeout: Duration,
    pub max_pending: usize,
    pub max_request_line: usize,
    pub log_format: LogFormat,
    pub log_level: String,
}

/// Flat view of the effective values for `config show`.
#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub cli_path: String,
    pub model_path: String,
    pub keys_path: String,
    pub bind_addr: String,
    pub handshake_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub stop_timeout_secs: u64,
    pub max_pending: usize,
    pub max_request_line: usize,
    pub log_format: String,
    pub log_level: String,
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse a `usize` env var, returning `default` on missing or invalid.
fn parse_usize(key: &str, default: usize) -> usize {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<usize>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a `u64` env var, returning `default` on missing or invalid.
fn parse_u64(key: &str, default: u64) -> u64 {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<u64>().unwrap_or(default),
        Err(_) => default,
    }
}

fn read_file_config() -> Result<FileConfig, ConfigError> {
    let Some(path) = env_string("ALPACA_CONFIG_FILE").map(PathBuf::from) else {
        return Ok(FileConfig::default());
    };
    let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::FileRead {
        path: path.clone(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::FileParse { path, source })
}

/// Load configuration. Only an unreadable config file or an unparseable
/// address or log format is an error here; path checks happen on use.
pub fn load() -> Result<EnvConfig, ConfigError> {
    let file = read_file_config()?;

    let bind_raw = env_string("ALPACA_BIND_ADDR")
        .or(file.bind_addr)
        .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
    let bind_addr = bind_raw.parse::<SocketAddr>().map_err(|_| ConfigError::InvalidValue {
        key: "ALPACA_BIND_ADDR",
        value: bind_raw.clone(),
    })?;

    let format_raw = env_string("ALPACA_LOG_FORMAT").or(file.log_format);
    let log_format = match format_raw {
        Some(raw) => raw.parse::<LogFormat>().map_err(|_| ConfigError::InvalidValue {
            key: "ALPACA_LOG_FORMAT",
            value: raw.clone(),
        })?,
        None => LogFormat::default(),
    };

    let handshake_secs = parse_u64(
        "ALPACA_HANDSHAKE_TIMEOUT",
        file.handshake_timeout.unwrap_or(DEFAULT_HANDSHAKE_SECS),
    );
    let request_secs = parse_u64(
        "ALPACA_REQUEST_TIMEOUT",
        file.request_timeout.unwrap_or(DEFAULT_REQUEST_SECS),
    );
    let stop_secs = parse_u64(
        "ALPACA_STOP_TIMEOUT",
        file.stop_timeout.unwrap_or(DEFAULT_STOP_SECS),
    );
    let max_pending = parse_usize(
        "ALPACA_MAX_PENDING",
        file.max_pending.unwrap_or(DEFAULT_MAX_PENDING),
    );
    let max_request_line = parse_usize(
        "ALPACA_MAX_REQUEST_LINE",
        file.max_request_line.unwrap_or(ENGINE_INPUT_BUFFER),
    );

    Ok(EnvConfig {
        cli_path: env_string("ALPACA_CLI_PATH").map(PathBuf::from).or(file.cli_path),
        model_path: env_string("ALPACA_MODEL_PATH").map(PathBuf::from).or(file.model_path),
        keys_path: env_string("KEYS_PATH").map(PathBuf::from).or(file.keys_path),
        bind_addr,
        handshake_timeout: Duration::from_secs(handshake_secs.max(1)),
        request_timeout: (request_secs > 0).then(|| Duration::from_secs(request_secs)),
        stop_timeout: Duration::from_secs(stop_secs.max(1)),
        max_pending: max_pending.max(1),
        max_request_line: max_request_line.clamp(1, MAX_LINE_SIZE),
        log_format,
        log_level: env_string("ALPACA_LOG_LEVEL")
            .or(file.log_level)
            .unwrap_or_else(|| "info".to_string()),
    })
}

fn require_existing<'a>(
    key: &'static str,
    path: Option<&'a PathBuf>,
) -> Result<&'a Path, ConfigError> {
    let path = path.ok_or(ConfigError::Missing(key))?;
    if !path.exists() {
        return Err(ConfigError::NotFound {
            key,
            path: path.clone(),
        });
    }
    Ok(path)
}

impl EnvConfig {
    /// Engine executable and model, both required to exist.
    pub fn engine_spec(&self) -> Result<EngineSpec, ConfigError> {
        let cli = require_existing("ALPACA_CLI_PATH", self.cli_path.as_ref())?;
        let model = require_existing("ALPACA_MODEL_PATH", self.model_path.as_ref())?;
        Ok(EngineSpec::new(cli, model))
    }

    pub fn require_keys_path(&self) -> Result<&Path, ConfigError> {
        require_existing("KEYS_PATH", self.keys_path.as_ref())
    }

    /// Every problem that would stop `serve`, in variable order.
    pub fn problems(&self) -> Vec<ConfigError> {
        [
            ("ALPACA_CLI_PATH", self.cli_path.as_ref()),
            ("ALPACA_MODEL_PATH", self.model_path.as_ref()),
            ("KEYS_PATH", self.keys_path.as_ref()),
        ]
        .into_iter()
        .filter_map(|(key, path)| require_existing(key, path).err())
        .collect()
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            supervisor: SupervisorConfig {
                handshake_timeout: self.handshake_timeout,
                stop_timeout: self.stop_timeout,
                request_timeout: self.request_timeout,
            },
            max_pending: self.max_pending,
            max_request_line: self.max_request_line,
        }
    }

    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            format: self.log_format,
            level: self.log_level.clone(),
            output_path: None,
        }
    }

    pub fn effective_config(&self) -> EffectiveConfig {
        let show = |p: &Option<PathBuf>| {
            p.as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "<unset>".to_string())
        };
        EffectiveConfig {
            cli_path: show(&self.cli_path),
            model_path: show(&self.model_path),
            keys_path: show(&self.keys_path),
            bind_addr: self.bind_addr.to_string(),
            handshake_timeout_secs: self.handshake_timeout.as_secs(),
            request_timeout_secs: self.request_timeout.map(|d| d.as_secs()).unwrap_or(0),
            stop_timeout_secs: self.stop_timeout.as_secs(),
            max_pending: self.max_pending,
            max_request_line: self.max_request_line,
            log_format: self.log_format.as_str().to_string(),
            log_level: self.log_level.clone(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;

    // Serialize env-mutating tests to avoid cross-test pollution.
    pub(crate) static ENV_LOCK: Mutex<()> = Mutex::new(());

    pub(crate) const ENV_KEYS: &[&str] = &[
        "ALPACA_CLI_PATH",
        "ALPACA_MODEL_PATH",
        "KEYS_PATH",
        "ALPACA_BIND_ADDR",
        "ALPACA_HANDSHAKE_TIMEOUT",
        "ALPACA_REQUEST_TIMEOUT",
        "ALPACA_STOP_TIMEOUT",
        "ALPACA_MAX_PENDING",
        "ALPACA_MAX_REQUEST_LINE",
        "ALPACA_LOG_FORMAT",
        "ALPACA_LOG_LEVEL",
        "ALPACA_CONFIG_FILE",
    ];

    pub(crate) fn clear_env_vars() {
        for k in ENV_KEYS {
            std::env::remove_var(k);
        }
    }

    #[test]
    fn test_defaults_are_sensible() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        let cfg = load().unwrap();
        assert!(cfg.cli_path.is_none());
        assert_eq!(cfg.bind_addr, DEFAULT_BIND_ADDR.parse().unwrap());
        assert_eq!(cfg.handshake_timeout.as_secs(), 120);
        assert_eq!(cfg.request_timeout, Some(Duration::from_secs(300)));
        assert_eq!(cfg.stop_timeout.as_secs(), 10);
        assert_eq!(cfg.max_pending, 64);
        assert_eq!(cfg.max_request_line, 4095);
        assert_eq!(cfg.log_format, LogFormat::Json);
        assert_eq!(cfg.log_level, "info");
    }

    #[test]
    fn test_env_vars_override_defaults() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("ALPACA_BIND_ADDR", "127.0.0.1:9000");
        std::env::set_var("ALPACA_REQUEST_TIMEOUT", "0");
        std::env::set_var("ALPACA_MAX_PENDING", "8");
        std::env::set_var("ALPACA_LOG_FORMAT", "pretty");
        let cfg = load().unwrap();
        assert_eq!(cfg.bind_addr.port(), 9000);
        assert_eq!(cfg.request_timeout, None);
        assert_eq!(cfg.max_pending, 8);
        assert_eq!(cfg.log_format, LogFormat::Pretty);
        clear_env_vars();
    }

    #[test]
    fn test_invalid_numbers_fall_back_to_default() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("ALPACA_HANDSHAKE_TIMEOUT", "soon");
        std::env::set_var("ALPACA_MAX_PENDING", "0");
        let cfg = load().unwrap();
        assert_eq!(cfg.handshake_timeout.as_secs(), 120);
        assert_eq!(cfg.max_pending, 1, "max_pending must have a floor");
        clear_env_vars();
    }

    #[test]
    fn test_invalid_bind_addr_is_an_error() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("ALPACA_BIND_ADDR", "localhost");
        let err = load().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "ALPACA_BIND_ADDR", .. }));
        clear_env_vars();
    }

    #[test]
    fn test_file_values_with_env_override() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "model_path = \"/models/7B/ggml-model-q4_0.bin\"").unwrap();
        writeln!(file, "max_pending = 16").unwrap();
        writeln!(file, "stop_timeout = 3").unwrap();
        std::env::set_var("ALPACA_CONFIG_FILE", file.path());
        std::env::set_var("ALPACA_MAX_PENDING", "32");

        let cfg = load().unwrap();
        assert_eq!(
            cfg.model_path.as_deref(),
            Some(Path::new("/models/7B/ggml-model-q4_0.bin"))
        );
        assert_eq!(cfg.max_pending, 32);
        assert_eq!(cfg.stop_timeout.as_secs(), 3);
        clear_env_vars();
    }

    #[test]
    fn test_unknown_file_key_rejected() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_queue = 16").unwrap();
        std::env::set_var("ALPACA_CONFIG_FILE", file.path());
        assert!(matches!(load(), Err(ConfigError::FileParse { .. })));
        clear_env_vars();
    }

    #[test]
    fn test_required_paths() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        let dir = tempfile::tempdir().unwrap();
        let cli = dir.path().join("chat");
        std::fs::write(&cli, b"").unwrap();
        std::env::set_var("ALPACA_CLI_PATH", &cli);
        std::env::set_var("ALPACA_MODEL_PATH", dir.path().join("missing.bin"));

        let cfg = load().unwrap();
        assert!(matches!(
            cfg.engine_spec(),
            Err(ConfigError::NotFound { key: "ALPACA_MODEL_PATH", .. })
        ));
        assert!(matches!(cfg.require_keys_path(), Err(ConfigError::Missing("KEYS_PATH"))));
        assert_eq!(cfg.problems().len(), 2);
        clear_env_vars();
    }

    #[test]
    fn test_existing_keys_path_is_borrowed_from_config() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        let keys = tempfile::NamedTempFile::new().unwrap();
        std::env::set_var("KEYS_PATH", keys.path());

        let cfg = load().unwrap();
        let path = cfg.require_keys_path().unwrap();
        assert_eq!(path, keys.path());
        assert_eq!(Some(path), cfg.keys_path.as_deref());
        clear_env_vars();
    }

    #[test]
    fn test_effective_config_roundtrips_values() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        let eff = load().unwrap().effective_config();
        assert_eq!(eff.cli_path, "<unset>");
        assert_eq!(eff.request_timeout_secs, 300);
        assert_eq!(eff.log_format, "json");
    }
}
