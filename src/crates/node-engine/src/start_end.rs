//! `start`, `end` and `milestone` handlers: no side effects, pure
//! markers that pass the input context through as their output.

use serde_json::json;

use crate::error::Result;
use crate::handler::{envelope, NodeHandler, NodeHandlerOutput, NodeHandlerRequest};

pub struct StartHandler;

#[async_trait::async_trait]
impl NodeHandler for StartHandler {
    async fn handle(&self, req: NodeHandlerRequest<'_>) -> Result<NodeHandlerOutput> {
        let body = envelope("start", json!({ "started_at_execution_index": req.execution_index }), vec![]);
        Ok(NodeHandlerOutput::new(body))
    }
}

pub struct EndHandler;

#[async_trait::async_trait]
impl NodeHandler for EndHandler {
    async fn handle(&self, req: NodeHandlerRequest<'_>) -> Result<NodeHandlerOutput> {
        let body = envelope("end", json!({ "final_input_context": req.input_context }), vec![]);
        Ok(NodeHandlerOutput::new(body))
    }
}

/// A checkpoint marker. Carries an optional `note` from config forward
/// so a run's timeline shows where milestones were reached, but performs
/// no retrieval, dispatch, or routing logic of its own.
pub struct MilestoneHandler;

#[async_trait::async_trait]
impl NodeHandler for MilestoneHandler {
    async fn handle(&self, req: NodeHandlerRequest<'_>) -> Result<NodeHandlerOutput> {
        let note = req.config_str("note").map(str::to_string);
        let body = envelope("milestone", json!({ "note": note }), vec![]);
        Ok(NodeHandlerOutput::new(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowchart_core::model::NodeType;
    use std::collections::HashMap;

    fn req<'a>(config: &'a HashMap<String, serde_json::Value>) -> NodeHandlerRequest<'a> {
        NodeHandlerRequest {
            node_id: "n1",
            node_type: NodeType::Start,
            node_ref_id: None,
            node_config: config,
            input_context: json!({}),
            execution_id: "run-1",
            execution_task_id: None,
            execution_index: 0,
            enabled_providers: &[],
            default_model_id: None,
            mcp_server_keys: &[],
            skill_ids: &[],
            execution_timeout_seconds: 30,
            log_collection_timeout_seconds: 10,
        }
    }

    #[tokio::test]
    async fn start_handler_is_infallible() {
        let config = HashMap::new();
        let out = StartHandler.handle(req(&config)).await.unwrap();
        assert_eq!(out.output_state["task_current_stage"], "start");
    }

    #[tokio::test]
    async fn milestone_carries_note_forward() {
        let mut config = HashMap::new();
        config.insert("note".to_string(), json!("reached checkpoint A"));
        let out = MilestoneHandler.handle(req(&config)).await.unwrap();
        assert_eq!(out.output_state["note"], "reached checkpoint A");
    }
}
