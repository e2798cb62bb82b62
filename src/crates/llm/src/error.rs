use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("provider request failed: {0}")]
    Provider(String),

    #[error("response contained no text content")]
    EmptyResponse,

    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, LlmError>;
