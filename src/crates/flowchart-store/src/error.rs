use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("malformed JSON column: {0}")]
    MalformedJson(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("graph error: {0}")]
    Graph(#[from] flowchart_core::error::GraphError),
}

pub type Result<T> = std::result::Result<T, StoreError>;
