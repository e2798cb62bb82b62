use serde_json::{json, Value};
use thiserror::Error;

pub const REASON_UNAVAILABLE_FOR_SELECTED_COLLECTIONS: &str = "RAG_UNAVAILABLE_FOR_SELECTED_COLLECTIONS";
pub const REASON_RETRIEVAL_EXECUTION_FAILED: &str = "RAG_RETRIEVAL_EXECUTION_FAILED";

#[derive(Debug, Error)]
#[error("{message}")]
pub struct RagContractError {
    pub reason_code: String,
    pub status_code: u16,
    pub message: String,
    pub metadata: Value,
}

impl RagContractError {
    pub fn new(reason_code: impl Into<String>, status_code: u16, message: impl Into<String>) -> Self {
        Self { reason_code: reason_code.into(), status_code, message: message.into(), metadata: json!({}) }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn as_payload(&self) -> Value {
        json!({
            "error": {
                "reason_code": self.reason_code,
                "message": self.message,
                "metadata": self.metadata,
            }
        })
    }
}

pub type Result<T> = std::result::Result<T, RagContractError>;
