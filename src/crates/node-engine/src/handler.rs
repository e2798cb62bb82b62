//! The dispatch contract every node-type handler implements.
//!
//! One call per node execution. Every handler receives the same shape of
//! request (even if most fields go unused for a given node type) and
//! returns `(output_state, routing_state)` as two independent JSON
//! documents — `output_state` is what downstream nodes read through
//! `input_context.upstream_nodes`, `routing_state` is what
//! `flowchart_core::routing::resolve_outgoing` consumes to pick emitted
//! edges.

use std::collections::HashMap;

use serde_json::Value;

use flowchart_core::model::NodeType;
use flowchart_core::routing::RoutingState;

use crate::error::Result;

/// Everything a handler needs to run one node execution. Borrowed, not
/// owned — the caller (the scheduler) retains the data for persistence.
pub struct NodeHandlerRequest<'a> {
    pub node_id: &'a str,
    pub node_type: NodeType,
    pub node_ref_id: Option<&'a str>,
    pub node_config: &'a HashMap<String, Value>,
    pub input_context: Value,
    pub execution_id: &'a str,
    pub execution_task_id: Option<&'a str>,
    pub execution_index: u32,
    pub enabled_providers: &'a [String],
    pub default_model_id: Option<&'a str>,
    pub mcp_server_keys: &'a [String],
    pub skill_ids: &'a [String],
    /// Whole-job bound for `task` node executor dispatch; tracks
    /// `RuntimeContext::execution_timeout_seconds`. Unused by non-`task`
    /// node types.
    pub execution_timeout_seconds: u64,
    /// Bounds only the post-terminal log fetch; tracks
    /// `RuntimeContext::log_collection_timeout_seconds`.
    pub log_collection_timeout_seconds: u64,
}

impl<'a> NodeHandlerRequest<'a> {
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.node_config.get(key).and_then(|v| v.as_str())
    }

    pub fn config_u64(&self, key: &str) -> Option<u64> {
        self.node_config.get(key).and_then(|v| v.as_u64())
    }

    pub fn config_f64(&self, key: &str) -> Option<f64> {
        self.node_config.get(key).and_then(|v| v.as_f64())
    }

    pub fn config_str_vec(&self, key: &str) -> Vec<String> {
        self.node_config
            .get(key)
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|e| e.as_str().map(str::to_string)).collect())
            .unwrap_or_default()
    }
}

/// What a handler hands back. Merged by the caller into the persisted
/// `FlowchartRunNode` row.
#[derive(Debug, Clone, Default)]
pub struct NodeHandlerOutput {
    pub output_state: Value,
    pub routing_state: RoutingState,
}

impl NodeHandlerOutput {
    pub fn new(output_state: Value) -> Self {
        Self { output_state, routing_state: RoutingState::default() }
    }

    pub fn with_routing(mut self, routing_state: RoutingState) -> Self {
        self.routing_state = routing_state;
        self
    }
}

#[async_trait::async_trait]
pub trait NodeHandler: Send + Sync {
    async fn handle(&self, req: NodeHandlerRequest<'_>) -> Result<NodeHandlerOutput>;
}

/// Merges the common output keys (`task_current_stage`,
/// `task_stage_logs`, `runtime_evidence`, `warnings`) into a stage-tagged
/// envelope shared by every handler so downstream consumers don't need
/// to special-case per node type.
pub fn envelope(stage: &str, mut body: Value, warnings: Vec<String>) -> Value {
    if let Value::Object(ref mut map) = body {
        map.insert("task_current_stage".to_string(), Value::String(stage.to_string()));
        map.entry("task_stage_logs").or_insert_with(|| Value::Array(vec![]));
        if !warnings.is_empty() {
            map.insert("warnings".to_string(), serde_json::to_value(warnings).unwrap_or(Value::Null));
        }
        body
    } else {
        let mut map = serde_json::Map::new();
        map.insert("task_current_stage".to_string(), Value::String(stage.to_string()));
        map.insert("result".to_string(), body);
        if !warnings.is_empty() {
            map.insert("warnings".to_string(), serde_json::to_value(warnings).unwrap_or(Value::Null));
        }
        Value::Object(map)
    }
}
