use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("contract version mismatch: expected {expected}, received {received}")]
    ContractVersionMismatch { expected: String, received: String },

    #[error("kubernetes job create failed: {0}")]
    JobCreateFailed(String),

    #[error("kubernetes API call was ambiguous or timed out: {0:?}")]
    Uncertain(crate::dispatcher::ApiFailureCategory),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DispatchError>;
