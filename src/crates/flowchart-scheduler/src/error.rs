use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("flowchart {0} not found")]
    FlowchartNotFound(String),

    #[error("flowchart {0} failed validation with {1} blocking error(s)")]
    ValidationFailed(String, usize),

    #[error("retrieval contract store is unavailable: {0}")]
    RagUnavailable(String),

    #[error("node {node_id} exceeded max_node_executions ({limit})")]
    MaxExecutionsExceeded { node_id: String, limit: u32 },

    #[error("run {0} was canceled")]
    Canceled(String),

    #[error("graph error: {0}")]
    Graph(#[from] flowchart_core::error::GraphError),

    #[error("store error: {0}")]
    Store(#[from] flowchart_store::error::StoreError),

    #[error("node engine error: {0}")]
    NodeEngine(#[from] node_engine::error::NodeEngineError),

    #[error("config error: {0}")]
    Config(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
