//! The executor wire contract, ported from
//! `original_source/app/llmctl-executor/src/llmctl_executor/{contracts,payload,runtime}.py`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DispatchError, Result};

pub const CONTRACT_VERSION: &str = "v1";
pub const START_MARKER_LITERAL: &str = "LLMCTL_EXECUTOR_STARTED";
pub const RESULT_PREFIX: &str = "LLMCTL_EXECUTOR_RESULT_JSON=";

pub const DEFAULT_TIMEOUT_SECONDS: u64 = 1800;
pub const DEFAULT_CAPTURE_LIMIT_BYTES: u64 = 1_000_000;
pub const TIMEOUT_RANGE: std::ops::RangeInclusive<u64> = 1..=86_400;
pub const CAPTURE_LIMIT_RANGE: std::ops::RangeInclusive<u64> = 1024..=10_000_000;

pub fn clamp_timeout_seconds(v: u64) -> u64 {
    v.clamp(*TIMEOUT_RANGE.start(), *TIMEOUT_RANGE.end())
}

pub fn clamp_capture_limit_bytes(v: u64) -> u64 {
    v.clamp(*CAPTURE_LIMIT_RANGE.start(), *CAPTURE_LIMIT_RANGE.end())
}

/// Reject empty keys, coerce values to strings (`payload.py::_normalize_env`).
pub fn normalize_env(raw: HashMap<String, Value>) -> Result<HashMap<String, String>> {
    let mut out = HashMap::with_capacity(raw.len());
    for (key, value) in raw {
        if key.is_empty() {
            return Err(DispatchError::InvalidPayload("env key must not be empty".to_string()));
        }
        let coerced = match value {
            Value::String(s) => s,
            Value::Null => String::new(),
            other => other.to_string(),
        };
        out.insert(key, coerced);
    }
    Ok(out)
}

/// `{entrypoint, request, request_context}` — dispatches back into an
/// in-process handler rather than an arbitrary shell command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeExecution {
    pub entrypoint: String,
    pub request: Value,
    #[serde(default)]
    pub request_context: Value,
}

/// The only provider is `kubernetes` — no workspace or docker fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Kubernetes,
}

impl Default for Provider {
    fn default() -> Self {
        Provider::Kubernetes
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Work {
    Command(Vec<String>),
    ShellCommand(String),
    NodeExecution(NodeExecution),
}

impl Work {
    /// Resolved argv, mirroring `payload.py::_resolve_command`: a `command`
    /// list is used verbatim; a `shell_command` string is wrapped as
    /// `/bin/bash -lc <script>`; a bare `node_execution` has no shell
    /// command at all (it dispatches in-process).
    pub fn resolved_command(&self) -> Option<Vec<String>> {
        match self {
            Work::Command(argv) => Some(argv.clone()),
            Work::ShellCommand(script) => Some(vec!["/bin/bash".to_string(), "-lc".to_string(), script.clone()]),
            Work::NodeExecution(_) => None,
        }
    }
}

/// The payload the dispatcher packages for one node execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPayload {
    pub contract_version: String,
    pub request_id: String,
    pub provider: Provider,
    pub work: Work,
    pub env: HashMap<String, String>,
    pub cwd: String,
    pub stdin: Option<String>,
    pub timeout_seconds: u64,
    pub capture_limit_bytes: u64,
    pub emit_start_markers: bool,
    pub metadata: Option<Value>,
}

impl ExecutionPayload {
    pub fn new(request_id: impl Into<String>, work: Work, cwd: impl Into<String>) -> Self {
        Self {
            contract_version: CONTRACT_VERSION.to_string(),
            request_id: request_id.into(),
            provider: Provider::Kubernetes,
            work,
            env: HashMap::new(),
            cwd: cwd.into(),
            stdin: None,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            capture_limit_bytes: DEFAULT_CAPTURE_LIMIT_BYTES,
            emit_start_markers: true,
            metadata: None,
        }
    }

    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = clamp_timeout_seconds(seconds);
        self
    }

    pub fn with_capture_limit_bytes(mut self, bytes: u64) -> Self {
        self.capture_limit_bytes = clamp_capture_limit_bytes(bytes);
        self
    }

    pub fn with_env(mut self, env: HashMap<String, Value>) -> Result<Self> {
        self.env = normalize_env(env)?;
        Ok(self)
    }

    /// A version mismatch on either side is treated as `infra_error` before
    /// execution begins.
    pub fn validate_contract_version(&self) -> Result<()> {
        if self.contract_version != CONTRACT_VERSION {
            return Err(DispatchError::ContractVersionMismatch {
                expected: CONTRACT_VERSION.to_string(),
                received: self.contract_version.clone(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Success,
    Failed,
    Cancelled,
    Timeout,
    DispatchFailed,
    DispatchUncertain,
    InfraError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    ValidationError,
    ProviderError,
    DispatchError,
    Timeout,
    Cancelled,
    ExecutionError,
    InfraError,
    Unknown,
}

impl ErrorCode {
    /// The retryability table, reproduced verbatim from
    /// `contracts.py::RETRYABLE_BY_ERROR_CODE`.
    pub fn default_retryable(&self) -> bool {
        match self {
            ErrorCode::ValidationError => false,
            ErrorCode::ProviderError => true,
            ErrorCode::DispatchError => true,
            ErrorCode::Timeout => true,
            ErrorCode::Cancelled => false,
            ErrorCode::ExecutionError => false,
            ErrorCode::InfraError => true,
            ErrorCode::Unknown => true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultError {
    pub code: ErrorCode,
    pub message: String,
    pub retryable: bool,
    pub details: Option<Value>,
}

impl ResultError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, retryable: code.default_retryable(), message: message.into(), details: None }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub contract_version: String,
    pub status: ResultStatus,
    pub exit_code: i32,
    pub started_at: String,
    pub finished_at: String,
    pub stdout: String,
    pub stderr: String,
    pub error: Option<ResultError>,
    pub provider_metadata: Value,
    pub usage: Option<Value>,
    pub metrics: Option<Value>,
    #[serde(default)]
    pub warnings: Vec<String>,
    pub output_state: Option<Value>,
    pub routing_state: Option<Value>,
}

impl ExecutionResult {
    pub fn validate_contract_version(&self) -> Result<()> {
        if self.contract_version != CONTRACT_VERSION {
            return Err(DispatchError::ContractVersionMismatch {
                expected: CONTRACT_VERSION.to_string(),
                received: self.contract_version.clone(),
            });
        }
        Ok(())
    }
}

/// Truncate to `max_bytes` (UTF-8 boundary safe) and append the literal
/// trailing marker from `runtime.py::_truncate_text`.
pub fn truncate_text(raw: &str, max_bytes: usize) -> String {
    if raw.len() <= max_bytes {
        return raw.to_string();
    }
    let mut cut = max_bytes;
    while cut > 0 && !raw.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}\n[llmctl-executor] output truncated to {} bytes.", &raw[..cut], max_bytes)
}

/// Maps a process exit status to a `(status, error)` pair per the
/// result-normalization rule: 0 success; negative SIGTERM/SIGINT
/// (encoded here as `signal: Some(15|2)`) cancelled; distinct exit codes
/// 124/130 map to `timeout`/`cancelled` respectively (§4.3, §6.1); anything
/// else failed with `execution_error`.
pub fn classify_exit(exit_code: i32, signal: Option<i32>) -> (ResultStatus, Option<ResultError>) {
    if matches!(signal, Some(15) | Some(2)) {
        return (ResultStatus::Cancelled, Some(ResultError::new(ErrorCode::Cancelled, "terminated by signal")));
    }
    match exit_code {
        0 => (ResultStatus::Success, None),
        124 => (ResultStatus::Timeout, Some(ResultError::new(ErrorCode::Timeout, "execution exceeded timeout_seconds"))),
        130 => (ResultStatus::Cancelled, Some(ResultError::new(ErrorCode::Cancelled, "terminated by signal"))),
        _ => (
            ResultStatus::Failed,
            Some(ResultError::new(ErrorCode::ExecutionError, "non-zero exit").with_details(serde_json::json!({ "returncode": exit_code }))),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_and_capture_limit_clamp_to_spec_bounds() {
        assert_eq!(clamp_timeout_seconds(0), 1);
        assert_eq!(clamp_timeout_seconds(999_999), 86_400);
        assert_eq!(clamp_capture_limit_bytes(1), 1024);
        assert_eq!(clamp_capture_limit_bytes(99_999_999), 10_000_000);
    }

    #[test]
    fn normalize_env_rejects_empty_keys_and_coerces_values() {
        let mut raw = HashMap::new();
        raw.insert("FOO".to_string(), Value::Number(1.into()));
        let out = normalize_env(raw).unwrap();
        assert_eq!(out.get("FOO"), Some(&"1".to_string()));

        let mut bad = HashMap::new();
        bad.insert(String::new(), Value::String("x".into()));
        assert!(normalize_env(bad).is_err());
    }

    #[test]
    fn shell_command_is_wrapped_in_bash_lc() {
        let work = Work::ShellCommand("echo hi".to_string());
        assert_eq!(work.resolved_command(), Some(vec!["/bin/bash".to_string(), "-lc".to_string(), "echo hi".to_string()]));
    }

    #[test]
    fn truncate_text_appends_marker_past_limit() {
        let out = truncate_text(&"x".repeat(20), 10);
        assert!(out.starts_with(&"x".repeat(10)));
        assert!(out.ends_with("truncated to 10 bytes."));
    }

    #[test]
    fn classify_exit_maps_signals_and_codes() {
        assert_eq!(classify_exit(0, None).0, ResultStatus::Success);
        assert_eq!(classify_exit(1, None).0, ResultStatus::Failed);
        assert_eq!(classify_exit(-15, Some(15)).0, ResultStatus::Cancelled);
    }

    #[test]
    fn classify_exit_maps_124_to_timeout_and_130_to_cancelled() {
        let (status, error) = classify_exit(124, None);
        assert_eq!(status, ResultStatus::Timeout);
        assert_eq!(error.unwrap().code, ErrorCode::Timeout);

        let (status, error) = classify_exit(130, None);
        assert_eq!(status, ResultStatus::Cancelled);
        assert_eq!(error.unwrap().code, ErrorCode::Cancelled);
    }

    #[test]
    fn retryable_defaults_match_spec_table() {
        assert!(!ErrorCode::ValidationError.default_retryable());
        assert!(ErrorCode::ProviderError.default_retryable());
        assert!(ErrorCode::DispatchError.default_retryable());
        assert!(ErrorCode::Timeout.default_retryable());
        assert!(!ErrorCode::Cancelled.default_retryable());
        assert!(!ErrorCode::ExecutionError.default_retryable());
        assert!(ErrorCode::InfraError.default_retryable());
        assert!(ErrorCode::Unknown.default_retryable());
    }
}
