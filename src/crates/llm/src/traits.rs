use async_trait::async_trait;

use crate::error::Result;
use crate::request::ChatRequest;
use crate::response::{ChatResponse, ChatStreamResponse};

/// Minimal provider-agnostic chat interface. Implementations must be
/// `Send + Sync` to live behind `Arc<dyn ChatModel>` across node handlers.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse>;

    async fn stream(&self, request: ChatRequest) -> Result<ChatStreamResponse>;

    async fn is_available(&self) -> Result<bool> {
        Ok(true)
    }

    fn clone_box(&self) -> Box<dyn ChatModel>;
}

impl Clone for Box<dyn ChatModel> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use std::sync::Arc;

    #[derive(Clone)]
    struct MockModel {
        response_text: String,
    }

    #[async_trait]
    impl ChatModel for MockModel {
        async fn chat(&self, _request: ChatRequest) -> Result<ChatResponse> {
            Ok(ChatResponse { message: Message::ai(self.response_text.clone()), usage: None })
        }

        async fn stream(&self, _request: ChatRequest) -> Result<ChatStreamResponse> {
            unimplemented!("mock does not stream")
        }

        fn clone_box(&self) -> Box<dyn ChatModel> {
            Box::new(self.clone())
        }
    }

    #[tokio::test]
    async fn trait_object_dispatches_chat() {
        let model: Arc<dyn ChatModel> = Arc::new(MockModel { response_text: "hi".into() });
        let response = model.chat(ChatRequest::new(vec![Message::human("hello")])).await.unwrap();
        assert_eq!(response.message.text(), Some("hi"));
    }
}
