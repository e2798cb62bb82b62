//! Executor wire contract and Kubernetes Job dispatcher.

pub mod contract;
pub mod dispatcher;
pub mod error;

pub use contract::{
    clamp_capture_limit_bytes, clamp_timeout_seconds, classify_exit, normalize_env, truncate_text, ErrorCode,
    ExecutionPayload, ExecutionResult, NodeExecution, Provider, ResultError, ResultStatus, Work,
    CAPTURE_LIMIT_RANGE, CONTRACT_VERSION, DEFAULT_CAPTURE_LIMIT_BYTES, DEFAULT_TIMEOUT_SECONDS, RESULT_PREFIX,
    START_MARKER_LITERAL, TIMEOUT_RANGE,
};
pub use dispatcher::{
    parse_result_line, provider_metadata, ApiFailureCategory, DispatchStatus, Dispatcher, JobProvider, KubeJobProvider,
    RuntimeEvidence,
};
pub use error::{DispatchError, Result};
