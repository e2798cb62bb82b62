//! Provider-agnostic chat-model contract.
//!
//! The flowchart runtime never performs inference itself: it
//! calls out through a provider-adapter interface"). This crate is that
//! interface: a minimal `ChatModel` trait plus the request/response/message
//! types the `task` node handler in `node-engine` builds against. Concrete
//! provider SDK adapters (OpenAI, Gemini, Anthropic, local runners) are
//! are out of scope for this crate and are not implemented here — callers
//! supply their own `Arc<dyn ChatModel>`.

pub mod error;
pub mod message;
pub mod request;
pub mod response;
pub mod traits;

pub use error::{LlmError, Result};
pub use message::{Message, MessageContent, MessageRole};
pub use request::ChatRequest;
pub use response::{ChatResponse, ChatStreamResponse, MessageChunk, UsageMetadata};
pub use traits::ChatModel;
