//! Building `input_context` for an admitted node.
//!
//! Solid parents contribute to `upstream_nodes[]` / `trigger_sources[]`;
//! dotted parents are *pulled* at admission time — the gate reads the most
//! recent `output_state` of every dotted parent and merges it into
//! `dotted_upstream_nodes[]`. The pull is expressed against a trait so this
//! crate stays I/O-free; `flowchart-store` supplies the real lookup backed
//! by the persisted node-run history.

use serde_json::{json, Value};

use crate::graph::FlowchartGraph;
use crate::model::FlowchartNode;

/// Looks up the most recent `output_state` recorded for a node id within a
/// run. Returns `None` if the node has never executed in this run.
pub trait LatestOutputLookup {
    fn latest_output_state(&self, node_id: &str) -> Option<Value>;
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct UpstreamNode {
    pub node_id: String,
    pub output_state: Value,
}

/// Assemble the `input_context` passed to a node handler on admission.
pub fn build_input_context(
    graph: &FlowchartGraph,
    node: &FlowchartNode,
    consumed_parent_ids: &[String],
    outputs: &dyn LatestOutputLookup,
) -> Value {
    let upstream_nodes: Vec<UpstreamNode> = consumed_parent_ids
        .iter()
        .map(|id| UpstreamNode {
            node_id: id.clone(),
            output_state: outputs.latest_output_state(id).unwrap_or(Value::Null),
        })
        .collect();

    let dotted_upstream_nodes: Vec<UpstreamNode> = graph
        .dotted_incoming(&node.id)
        .into_iter()
        .map(|edge| edge.source_node_id.clone())
        .map(|id| UpstreamNode {
            output_state: outputs.latest_output_state(&id).unwrap_or(Value::Null),
            node_id: id,
        })
        .collect();

    json!({
        "upstream_nodes": upstream_nodes,
        "trigger_sources": consumed_parent_ids,
        "dotted_upstream_nodes": dotted_upstream_nodes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EdgeMode, Flowchart, FlowchartEdge, NodeType};
    use std::collections::HashMap;

    struct FakeOutputs(HashMap<String, Value>);
    impl LatestOutputLookup for FakeOutputs {
        fn latest_output_state(&self, node_id: &str) -> Option<Value> {
            self.0.get(node_id).cloned()
        }
    }

    #[test]
    fn dotted_parents_never_gate_but_are_pulled() {
        let flowchart = Flowchart::new("t", 10);
        let solid_parent = FlowchartNode::new(&flowchart.id, NodeType::Task);
        let dotted_parent = FlowchartNode::new(&flowchart.id, NodeType::Memory);
        let target = FlowchartNode::new(&flowchart.id, NodeType::Task);
        let solid = FlowchartEdge::new(&flowchart.id, &solid_parent.id, &target.id, EdgeMode::Solid);
        let dotted = FlowchartEdge::new(&flowchart.id, &dotted_parent.id, &target.id, EdgeMode::Dotted);
        let graph = FlowchartGraph::build(
            flowchart,
            vec![solid_parent.clone(), dotted_parent.clone(), target.clone()],
            vec![solid, dotted],
        );

        let mut outputs = HashMap::new();
        outputs.insert(dotted_parent.id.clone(), json!({"memory": "hi"}));
        let lookup = FakeOutputs(outputs);

        let ctx = build_input_context(&graph, &target, &[solid_parent.id.clone()], &lookup);
        assert_eq!(ctx["trigger_sources"].as_array().unwrap().len(), 1);
        assert_eq!(ctx["dotted_upstream_nodes"].as_array().unwrap().len(), 1);
        assert_eq!(ctx["dotted_upstream_nodes"][0]["output_state"]["memory"], "hi");
    }
}
