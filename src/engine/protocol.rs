//! Line protocol spoken with the engine over its stdin/stdout.
//!
//! Every message is one newline-terminated line. Requests and responses are
//! flat JSON objects whose numeric values travel as decimal text; the quit
//! sentinel is the only non-JSON line.
//!
//! # Safety limits
//! - Lines read from the engine are capped at [`MAX_LINE_SIZE`].
//! - Encoded requests are checked against the engine's input buffer before
//!   they are written, so an oversized prompt never desynchronizes the channel.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Line that asks the engine to exit.
pub const QUIT_SENTINEL: &str = "quit();";

/// Alternative exit line the engine also honours.
pub const EXIT_SENTINEL: &str = "exit();";

/// Maximum size of a single line read from the engine.
pub const MAX_LINE_SIZE: usize = 16 * 1024 * 1024; // 16 MB

/// Size of the engine's request input buffer, minus the terminator.
pub const ENGINE_INPUT_BUFFER: usize = 4095;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Expected a JSON object")]
    NotAnObject,

    #[error("Nested value for key '{0}' (only scalars allowed)")]
    NestedValue(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Field '{key}' is not an integer: {value}")]
    InvalidInteger { key: String, value: String },

    #[error("Field '{key}' is not a number: {value}")]
    InvalidNumber { key: String, value: String },

    #[error("Field '{0}' must be a string")]
    ExpectedString(String),

    #[error("Line too large: {size} bytes (max {max})")]
    LineTooLarge { size: usize, max: usize },

    #[error("Line contains an embedded newline")]
    EmbeddedNewline,
}

/// Sampling parameters forwarded to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    pub n_predict: i32,
    pub top_k: i32,
    pub top_p: f32,
    #[serde(rename = "temp")]
    pub temperature: f32,
    pub repeat_last_n: i32,
    pub repeat_penalty: f32,
    /// Sampler seed. The engine picks one from the clock when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i32>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            n_predict: 128,
            top_k: 40,
            top_p: 0.95,
            temperature: 0.1,
            repeat_last_n: 64,
            repeat_penalty: 1.3,
            seed: None,
        }
    }
}

impl GenerationParams {
    pub fn validate(&self) -> Result<(), String> {
        if self.n_predict <= 0 {
            return Err("n_predict must be > 0".into());
        }
        if self.top_k <= 0 {
            return Err("top_k must be > 0".into());
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err("top_p must be in (0, 1]".into());
        }
        if !self.temperature.is_finite() || self.temperature < 0.0 {
            return Err("temp must be >= 0".into());
        }
        if self.repeat_last_n < 0 {
            return Err("repeat_last_n must be >= 0".into());
        }
        if !self.repeat_penalty.is_finite() || self.repeat_penalty <= 0.0 {
            return Err("repeat_penalty must be > 0".into());
        }
        Ok(())
    }
}

/// Prompt text plus sampling parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceRequest {
    pub input_text: String,
    #[serde(flatten)]
    pub params: GenerationParams,
}

impl InferenceRequest {
    pub fn new(input_text: impl Into<String>) -> Self {
        Self {
            input_text: input_text.into(),
            params: GenerationParams::default(),
        }
    }

    pub fn with_params(input_text: impl Into<String>, params: GenerationParams) -> Self {
        Self {
            input_text: input_text.into(),
            params,
        }
    }
}

/// Completed generation as reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferenceResult {
    pub output: String,
    pub input_token_length: i64,
    pub n_tokens_truncated: i64,
    pub output_token_length: i64,
    pub reached_max_content_size: i64,
    pub total_predict_time_us: i64,
    pub total_token_length: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_per_token_bytes: Option<i64>,
}

impl InferenceResult {
    pub fn reached_max_context(&self) -> bool {
        self.reached_max_content_size != 0
    }
}

/// Outcome of a decoded response line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineReply {
    Completed(InferenceResult),
    /// The engine rejected the request. No other field is trustworthy.
    Failed(String),
}

/// Capabilities reported by the engine in its handshake line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SystemInfo(BTreeMap<String, i64>);

impl SystemInfo {
    pub fn new(values: BTreeMap<String, i64>) -> Self {
        Self(values)
    }

    pub fn get(&self, capability: &str) -> Option<i64> {
        self.0.get(capability).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for SystemInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (k, v) in &self.0 {
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "{k}={v}")?;
            first = false;
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct WireRequest<'a> {
    input_text: &'a str,
    n_predict: String,
    top_k: String,
    top_p: String,
    temp: String,
    repeat_last_n: String,
    repeat_penalty: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<String>,
}

/// Encode a request into a single protocol line (without the terminator).
pub fn encode_request(request: &InferenceRequest) -> Result<String, ProtocolError> {
    let p = &request.params;
    let wire = WireRequest {
        input_text: &request.input_text,
        n_predict: p.n_predict.to_string(),
        top_k: p.top_k.to_string(),
        top_p: p.top_p.to_string(),
        temp: p.temperature.to_string(),
        repeat_last_n: p.repeat_last_n.to_string(),
        repeat_penalty: p.repeat_penalty.to_string(),
        seed: p.seed.map(|s| s.to_string()),
    };
    let line = serde_json::to_string(&wire)?;
    ensure_single_line(&line)?;
    Ok(line)
}

/// The quit sentinel line.
pub fn encode_quit() -> &'static str {
    QUIT_SENTINEL
}

/// Whether a line read by the engine asks it to terminate.
pub fn is_quit_line(line: &str) -> bool {
    let line = line.trim_end_matches(['\r', '\n']);
    line == QUIT_SENTINEL || line == EXIT_SENTINEL
}

/// Decode one response line from the engine.
pub fn decode_response(line: &str) -> Result<EngineReply, ProtocolError> {
    let fields = decode_flat_object(line)?;

    if let Some(error) = fields.get("error") {
        return Ok(EngineReply::Failed(scalar_to_text(error)));
    }

    let output = match fields.get("output") {
        Some(Value::String(s)) => s.clone(),
        Some(_) => return Err(ProtocolError::ExpectedString("output".into())),
        None => return Err(ProtocolError::MissingField("output".into())),
    };

    let required = |key: &str| -> Result<i64, ProtocolError> {
        let value = fields
            .get(key)
            .ok_or_else(|| ProtocolError::MissingField(key.to_string()))?;
        scalar_to_int(key, value)
    };

    let memory_per_token_bytes = fields
        .get("memory_per_token_bytes")
        .map(|v| scalar_to_int("memory_per_token_bytes", v))
        .transpose()?;

    Ok(EngineReply::Completed(InferenceResult {
        output,
        input_token_length: required("input_token_length")?,
        n_tokens_truncated: required("n_tokens_truncated")?,
        output_token_length: required("output_token_length")?,
        reached_max_content_size: required("reached_max_content_size")?,
        total_predict_time_us: required("total_predict_time_us")?,
        total_token_length: required("total_token_length")?,
        memory_per_token_bytes,
    }))
}

/// Decode the handshake line into engine capabilities.
pub fn decode_handshake(line: &str) -> Result<SystemInfo, ProtocolError> {
    let fields = decode_flat_object(line)?;
    let mut values = BTreeMap::new();
    for (key, value) in &fields {
        values.insert(key.clone(), scalar_to_int(key, value)?);
    }
    Ok(SystemInfo(values))
}

// Engine-side half of the codec, used by the mock engine.

/// Encode capabilities as a handshake line.
pub fn encode_handshake(info: &SystemInfo) -> Result<String, ProtocolError> {
    let wire: BTreeMap<&str, String> = info.0.iter().map(|(k, v)| (k.as_str(), v.to_string())).collect();
    Ok(serde_json::to_string(&wire)?)
}

/// Decode a request line as the engine would.
pub fn decode_request(line: &str) -> Result<InferenceRequest, ProtocolError> {
    let fields = decode_flat_object(line)?;
    let defaults = GenerationParams::default();

    let input_text = match fields.get("input_text") {
        Some(Value::String(s)) => s.clone(),
        Some(_) => return Err(ProtocolError::ExpectedString("input_text".into())),
        None => String::new(),
    };

    let int_or = |key: &str, default: i32| -> Result<i32, ProtocolError> {
        match fields.get(key) {
            None => Ok(default),
            Some(v) => {
                let n = scalar_to_int(key, v)?;
                i32::try_from(n).map_err(|_| ProtocolError::InvalidInteger {
                    key: key.to_string(),
                    value: n.to_string(),
                })
            }
        }
    };
    let float_or = |key: &str, default: f32| -> Result<f32, ProtocolError> {
        match fields.get(key) {
            None => Ok(default),
            Some(v) => scalar_to_float(key, v),
        }
    };

    let seed = match fields.get("seed") {
        None => None,
        Some(_) => Some(int_or("seed", 0)?),
    };

    Ok(InferenceRequest {
        input_text,
        params: GenerationParams {
            n_predict: int_or("n_predict", defaults.n_predict)?,
            top_k: int_or("top_k", defaults.top_k)?,
            top_p: float_or("top_p", defaults.top_p)?,
            temperature: float_or("temp", defaults.temperature)?,
            repeat_last_n: int_or("repeat_last_n", defaults.repeat_last_n)?,
            repeat_penalty: float_or("repeat_penalty", defaults.repeat_penalty)?,
            seed,
        },
    })
}

/// Encode a successful result the way the engine does: every value as text.
pub fn encode_result(result: &InferenceResult) -> Result<String, ProtocolError> {
    let mut wire = BTreeMap::new();
    wire.insert("output", result.output.clone());
    wire.insert("input_token_length", result.input_token_length.to_string());
    wire.insert("n_tokens_truncated", result.n_tokens_truncated.to_string());
    wire.insert("output_token_length", result.output_token_length.to_string());
    wire.insert(
        "reached_max_content_size",
        result.reached_max_content_size.to_string(),
    );
    wire.insert("total_predict_time_us", result.total_predict_time_us.to_string());
    wire.insert("total_token_length", result.total_token_length.to_string());
    if let Some(bytes) = result.memory_per_token_bytes {
        wire.insert("memory_per_token_bytes", bytes.to_string());
    }
    Ok(serde_json::to_string(&wire)?)
}

/// Encode an engine-side failure line.
pub fn encode_error(message: &str) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(&serde_json::json!({ "error": message }))?)
}

fn ensure_single_line(line: &str) -> Result<(), ProtocolError> {
    if line.contains('\n') || line.contains('\r') {
        return Err(ProtocolError::EmbeddedNewline);
    }
    Ok(())
}

fn decode_flat_object(line: &str) -> Result<Map<String, Value>, ProtocolError> {
    // Check size BEFORE parsing.
    if line.len() > MAX_LINE_SIZE {
        return Err(ProtocolError::LineTooLarge {
            size: line.len(),
            max: MAX_LINE_SIZE,
        });
    }
    let value: Value = serde_json::from_str(line.trim())?;
    let Value::Object(fields) = value else {
        return Err(ProtocolError::NotAnObject);
    };
    if let Some((key, _)) = fields
        .iter()
        .find(|(_, v)| matches!(v, Value::Array(_) | Value::Object(_)))
    {
        return Err(ProtocolError::NestedValue(key.clone()));
    }
    Ok(fields)
}

fn scalar_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Coerce a scalar to an integer.
///
/// The engine pads some numbers with spaces and reports flags as
/// `"true"`/`"false"`.
fn scalar_to_int(key: &str, value: &Value) -> Result<i64, ProtocolError> {
    let invalid = || ProtocolError::InvalidInteger {
        key: key.to_string(),
        value: value.to_string(),
    };
    match value {
        Value::Number(n) => n.as_i64().ok_or_else(invalid),
        Value::Bool(b) => Ok(i64::from(*b)),
        Value::String(s) => match s.trim() {
            "true" => Ok(1),
            "false" => Ok(0),
            t => t.parse::<i64>().map_err(|_| invalid()),
        },
        _ => Err(invalid()),
    }
}

fn scalar_to_float(key: &str, value: &Value) -> Result<f32, ProtocolError> {
    let invalid = || ProtocolError::InvalidNumber {
        key: key.to_string(),
        value: value.to_string(),
    };
    match value {
        Value::Number(n) => n.as_f64().map(|f| f as f32).ok_or_else(invalid),
        Value::String(s) => s.trim().parse::<f32>().map_err(|_| invalid()),
        _ => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_result() -> InferenceResult {
        InferenceResult {
            output: "hello".into(),
            input_token_length: 2,
            n_tokens_truncated: 0,
            output_token_length: 1,
            reached_max_content_size: 0,
            total_predict_time_us: 1500,
            total_token_length: 3,
            memory_per_token_bytes: None,
        }
    }

    #[test]
    fn test_encode_request_uses_text_numbers() {
        let line = encode_request(&InferenceRequest::new("hi")).unwrap();
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["input_text"], "hi");
        assert_eq!(value["n_predict"], "128");
        assert_eq!(value["top_k"], "40");
        assert_eq!(value["top_p"], "0.95");
        assert_eq!(value["temp"], "0.1");
        assert_eq!(value["repeat_last_n"], "64");
        assert_eq!(value["repeat_penalty"], "1.3");
        assert!(value.get("seed").is_none());
    }

    #[test]
    fn test_encode_request_escapes_newlines() {
        let line = encode_request(&InferenceRequest::new("line one\nline two")).unwrap();
        assert!(!line.contains('\n'));
        let decoded = decode_request(&line).unwrap();
        assert_eq!(decoded.input_text, "line one\nline two");
    }

    #[test]
    fn test_request_roundtrip_normalizes_numbers() {
        let request = InferenceRequest::with_params(
            "prompt",
            GenerationParams {
                n_predict: 16,
                top_p: 0.5,
                temperature: 0.75,
                seed: Some(7),
                ..Default::default()
            },
        );
        let decoded = decode_request(&encode_request(&request).unwrap()).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_decode_success_response() {
        let line = r#"{"output": "hello", "input_token_length": "2", "n_tokens_truncated": "0",
            "output_token_length": "1", "reached_max_content_size": "false",
            "total_predict_time_us": "1500", "total_token_length": "3"}"#
            .replace('\n', " ");
        let reply = decode_response(&line).unwrap();
        assert_eq!(reply, EngineReply::Completed(sample_result()));
    }

    #[test]
    fn test_decode_padded_and_boolean_fields() {
        let mut result = sample_result();
        result.reached_max_content_size = 1;
        result.memory_per_token_bytes = Some(14434);
        let line = encode_result(&result)
            .unwrap()
            .replace("\"14434\"", "\"   14434\"")
            .replace("\"reached_max_content_size\":\"1\"", "\"reached_max_content_size\":\"true\"");
        match decode_response(&line).unwrap() {
            EngineReply::Completed(r) => {
                assert!(r.reached_max_context());
                assert_eq!(r.memory_per_token_bytes, Some(14434));
            }
            other => panic!("Expected completion, got {other:?}"),
        }
    }

    #[test]
    fn test_error_field_supersedes_everything() {
        let reply = decode_response(r#"{"error": "oom", "output": "partial"}"#).unwrap();
        assert_eq!(reply, EngineReply::Failed("oom".into()));
    }

    #[test]
    fn test_decode_rejects_invalid_json() {
        assert!(matches!(
            decode_response("not json"),
            Err(ProtocolError::InvalidJson(_))
        ));
    }

    #[test]
    fn test_decode_rejects_non_object() {
        assert!(matches!(decode_response("[1, 2]"), Err(ProtocolError::NotAnObject)));
        assert!(matches!(decode_response("\"text\""), Err(ProtocolError::NotAnObject)));
    }

    #[test]
    fn test_decode_rejects_nested_values() {
        let result = decode_response(r#"{"output": {"text": "x"}}"#);
        assert!(matches!(result, Err(ProtocolError::NestedValue(key)) if key == "output"));
    }

    #[test]
    fn test_decode_rejects_missing_field() {
        let result = decode_response(r#"{"output": "x", "input_token_length": "1"}"#);
        assert!(matches!(result, Err(ProtocolError::MissingField(_))));
    }

    #[test]
    fn test_decode_rejects_non_integer() {
        let line = encode_result(&sample_result())
            .unwrap()
            .replace("\"1500\"", "\"fast\"");
        assert!(matches!(
            decode_response(&line),
            Err(ProtocolError::InvalidInteger { key, .. }) if key == "total_predict_time_us"
        ));
    }

    #[test]
    fn test_decode_line_too_large() {
        let line = "x".repeat(MAX_LINE_SIZE + 1);
        assert!(matches!(
            decode_response(&line),
            Err(ProtocolError::LineTooLarge { .. })
        ));
    }

    #[test]
    fn test_handshake_coerces_integers() {
        let info = decode_handshake(r#"{"ctx_size": "2048", "n_threads": 4}"#).unwrap();
        assert_eq!(info.get("ctx_size"), Some(2048));
        assert_eq!(info.get("n_threads"), Some(4));
        assert_eq!(info.len(), 2);
    }

    #[test]
    fn test_handshake_rejects_non_integer() {
        assert!(decode_handshake(r#"{"ctx_size": "big"}"#).is_err());
        assert!(decode_handshake("").is_err());
    }

    #[test]
    fn test_handshake_roundtrip() {
        let info = decode_handshake(r#"{"ctx_size": "512"}"#).unwrap();
        let line = encode_handshake(&info).unwrap();
        assert_eq!(decode_handshake(&line).unwrap(), info);
    }

    #[test]
    fn test_quit_sentinel() {
        assert_eq!(encode_quit(), "quit();");
        assert!(is_quit_line("quit();\n"));
        assert!(is_quit_line("exit();"));
        assert!(!is_quit_line("{\"input_text\": \"quit();\"}"));
    }

    #[test]
    fn test_params_validation() {
        assert!(GenerationParams::default().validate().is_ok());
        let bad = GenerationParams {
            top_p: 1.5,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let bad = GenerationParams {
            n_predict: 0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_http_body_defaults() {
        let req: InferenceRequest = serde_json::from_str(r#"{"input_text": "hi"}"#).unwrap();
        assert_eq!(req.params, GenerationParams::default());

        let req: InferenceRequest = serde_json::from_str(r#"{"input_text": "hi", "temp": 0.2}"#).unwrap();
        assert_eq!(req.params.temperature, 0.2);
    }
}
