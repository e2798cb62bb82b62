use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeEngineError {
    #[error("missing required config key '{0}'")]
    MissingConfig(String),

    #[error("node_ref_id is required for {0} nodes")]
    MissingRefId(&'static str),

    #[error("decision_no_match")]
    DecisionNoMatch,

    #[error("memory backend error: {0}")]
    Memory(String),

    #[error("retrieval contract error: {0}")]
    Rag(#[from] rag_contract::RagContractError),

    #[error("llm request failed: {0}")]
    Llm(#[from] llm::LlmError),

    #[error("executor dispatch failed: {0}")]
    Dispatch(String),

    #[error("node execution ended in {status}: {message}")]
    Execution { status: String, message: String, retryable: bool },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, NodeEngineError>;
