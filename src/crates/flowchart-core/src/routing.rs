//! Routing resolution.
//!
//! Decides which outgoing edges of a just-succeeded node emit tokens.

use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};
use crate::graph::FlowchartGraph;
use crate::model::{FlowchartEdge, FlowchartNode, NodeType, NoMatchPolicy};

/// `routing_state` produced by a decision node's handler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingState {
    #[serde(default)]
    pub matched_connector_ids: Vec<String>,
    #[serde(default)]
    pub route_key: Option<String>,
    #[serde(default)]
    pub no_match: bool,
}

/// Error raised when a decision node has no matching route and its
/// `no_match_policy` is `fail`, surfaced as an `execution_error`.
#[derive(Debug, thiserror::Error)]
#[error("decision_no_match")]
pub struct DecisionNoMatch;

/// Resolve which outgoing edges of `node` emit a token after it succeeds.
///
/// Non-decision nodes emit on every solid outgoing edge (at most one is
/// permitted by validation). Decision nodes select solid outgoing edges
/// whose `condition_key` is in `routing_state.matched_connector_ids`,
/// falling back to the edge whose `condition_key` equals
/// `fallback_condition_key` when `no_match` is set. Dotted outgoing edges
/// never emit — they are excluded up front.
pub fn resolve_outgoing<'g>(
    graph: &'g FlowchartGraph,
    node: &FlowchartNode,
    routing_state: &RoutingState,
) -> Result<Vec<&'g FlowchartEdge>> {
    let solid_outgoing = graph.solid_outgoing(&node.id);

    if node.node_type != NodeType::Decision {
        return Ok(solid_outgoing);
    }

    if routing_state.no_match {
        return match node.no_match_policy() {
            NoMatchPolicy::Fail => Err(GraphError::General("decision_no_match".to_string())),
            NoMatchPolicy::Fallback => {
                let fallback_key = node.fallback_condition_key();
                Ok(solid_outgoing
                    .into_iter()
                    .filter(|e| e.condition_key.as_deref() == fallback_key)
                    .collect())
            }
        };
    }

    Ok(solid_outgoing
        .into_iter()
        .filter(|e| {
            e.condition_key
                .as_deref()
                .map(|k| routing_state.matched_connector_ids.iter().any(|m| m == k))
                .unwrap_or(false)
        })
        .collect())
}
