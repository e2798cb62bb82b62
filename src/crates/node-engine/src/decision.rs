//! `decision` node: produces `routing_state = {matched_connector_ids[],
//! route_key?, no_match}` from either an upstream-supplied signal or an
//! internal rule comparing a value pulled out of the input context
//! against `decision_conditions`.
//!
//! `flowchart_core::routing::resolve_outgoing` does the actual edge
//! selection from this routing state; this handler only decides which
//! `condition_key`s matched.

use serde_json::json;

use flowchart_core::routing::RoutingState;

use crate::error::Result;
use crate::handler::{envelope, NodeHandler, NodeHandlerOutput, NodeHandlerRequest};

/// Walks a dotted path (`"a.b.c"`) through an `input_context` JSON value,
/// returning the leaf as a string if present.
fn lookup_path<'a>(value: &'a serde_json::Value, path: &str) -> Option<&'a str> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    current.as_str()
}

pub struct DecisionHandler;

#[async_trait::async_trait]
impl NodeHandler for DecisionHandler {
    async fn handle(&self, req: NodeHandlerRequest<'_>) -> Result<NodeHandlerOutput> {
        let decision_conditions = req.config_str_vec("decision_conditions");

        // An upstream task may directly supply the chosen route under
        // `decision_signal` in its output_state, surfaced here under
        // `input_context.upstream_nodes[-1].output_state.decision_signal`.
        // `signal_path` overrides the default lookup location.
        let signal_path = req.config_str("signal_path").unwrap_or("decision_signal");
        let signal = lookup_path(&req.input_context, signal_path);

        let matched: Vec<String> = match signal {
            Some(value) if decision_conditions.iter().any(|c| c == value) => vec![value.to_string()],
            _ => Vec::new(),
        };
        let no_match = matched.is_empty();

        let routing_state = RoutingState { matched_connector_ids: matched.clone(), route_key: signal.map(str::to_string), no_match };

        let body = envelope(
            "decision",
            json!({
                "decision_conditions": decision_conditions,
                "matched_connector_ids": matched,
                "no_match": no_match,
            }),
            vec![],
        );
        Ok(NodeHandlerOutput::new(body).with_routing(routing_state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowchart_core::model::NodeType;
    use serde_json::json;
    use std::collections::HashMap;

    fn req<'a>(config: &'a HashMap<String, serde_json::Value>, input_context: serde_json::Value) -> NodeHandlerRequest<'a> {
        NodeHandlerRequest {
            node_id: "n1",
            node_type: NodeType::Decision,
            node_ref_id: None,
            node_config: config,
            input_context,
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
    async fn matches_a_signaled_route() {
        let mut config = HashMap::new();
        config.insert("decision_conditions".to_string(), json!(["route_1", "route_2", "route_3"]));
        let input_context = json!({"decision_signal": "route_1"});
        let out = DecisionHandler.handle(req(&config, input_context)).await.unwrap();
        assert_eq!(out.routing_state.matched_connector_ids, vec!["route_1".to_string()]);
        assert!(!out.routing_state.no_match);
    }

    #[tokio::test]
    async fn no_signal_yields_no_match() {
        let mut config = HashMap::new();
        config.insert("decision_conditions".to_string(), json!(["route_1"]));
        let out = DecisionHandler.handle(req(&config, json!({}))).await.unwrap();
        assert!(out.routing_state.no_match);
        assert!(out.routing_state.matched_connector_ids.is_empty());
    }
}
