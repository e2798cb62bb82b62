//! `plan` node: asks the model to decompose the upstream context into an
//! ordered list of steps. Runs the chat call in-process rather than
//! through C3 — a plan is cheap, has no filesystem/workspace needs, and
//! doesn't warrant an isolated executor job.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use llm::{ChatModel, ChatRequest, Message, MessageRole};

use crate::error::Result;
use crate::handler::{envelope, NodeHandler, NodeHandlerOutput, NodeHandlerRequest};

pub struct PlanHandler {
    chat_model: Arc<dyn ChatModel>,
}

impl PlanHandler {
    pub fn new(chat_model: Arc<dyn ChatModel>) -> Self {
        Self { chat_model }
    }
}

#[async_trait]
impl NodeHandler for PlanHandler {
    async fn handle(&self, req: NodeHandlerRequest<'_>) -> Result<NodeHandlerOutput> {
        let goal = req.config_str("goal").unwrap_or("Plan the next steps.");
        let messages = vec![
            Message::new(MessageRole::System, "You decompose a goal into an ordered JSON array of short step descriptions. Respond with JSON only."),
            Message::new(MessageRole::Human, format!("Goal: {goal}\n\nContext:\n{}", req.input_context)),
        ];
        let request = ChatRequest::new(messages).with_temperature(0.2);
        let response = self.chat_model.chat(request).await?;
        let text = response.message.text().unwrap_or_default();
        let steps: Value = serde_json::from_str(text).unwrap_or_else(|_| json!([text]));

        let body = envelope("plan", json!({ "goal": goal, "steps": steps }), vec![]);
        Ok(NodeHandlerOutput::new(body))
    }
}
