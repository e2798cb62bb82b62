//! `flowchart` node: a reference to a nested sub-flowchart by
//! `node_ref_id`. Running that sub-flowchart is the scheduler's job
//! (C6, which already owns run-queuing and concurrency); this handler
//! only validates the reference and emits a dispatch request the
//! scheduler picks up after this node's run-node record lands.

use serde_json::json;

use crate::error::{NodeEngineError, Result};
use crate::handler::{envelope, NodeHandler, NodeHandlerOutput, NodeHandlerRequest};

pub struct FlowchartRefHandler;

#[async_trait::async_trait]
impl NodeHandler for FlowchartRefHandler {
    async fn handle(&self, req: NodeHandlerRequest<'_>) -> Result<NodeHandlerOutput> {
        let sub_flowchart_id = req.node_ref_id.ok_or(NodeEngineError::MissingRefId("flowchart"))?;
        let body = envelope(
            "flowchart",
            json!({
                "sub_flowchart_id": sub_flowchart_id,
                "dispatch_requested": true,
            }),
            vec![],
        );
        Ok(NodeHandlerOutput::new(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowchart_core::model::NodeType;
    use std::collections::HashMap;

    #[tokio::test]
    async fn missing_ref_id_is_an_error() {
        let config = HashMap::new();
        let req = NodeHandlerRequest {
            node_id: "n1",
            node_type: NodeType::Flowchart,
            node_ref_id: None,
            node_config: &config,
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
        };
        assert!(FlowchartRefHandler.handle(req).await.is_err());
    }
}
