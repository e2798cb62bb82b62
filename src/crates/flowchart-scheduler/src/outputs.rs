//! Prefetches the `output_state` of every node a handler call needs
//! before dispatch, since [`flowchart_core::context::LatestOutputLookup`]
//! is a synchronous trait and the run-node history lives behind an
//! async sqlx pool.

use std::collections::HashMap;

use serde_json::Value;

use flowchart_core::context::LatestOutputLookup;
use flowchart_core::graph::FlowchartGraph;
use flowchart_core::model::FlowchartNode;
use flowchart_store::connection::DatabasePool;
use flowchart_store::repositories::RunNodeRepository;

use crate::error::Result;

pub struct PrefetchedOutputs(HashMap<String, Value>);

impl LatestOutputLookup for PrefetchedOutputs {
    fn latest_output_state(&self, node_id: &str) -> Option<Value> {
        self.0.get(node_id).cloned()
    }
}

/// Pulls the most recent succeeded `output_state` for every consumed
/// solid parent plus every dotted parent of `node`, within one run.
pub async fn prefetch_outputs(
    pool: &DatabasePool,
    flowchart_run_id: &str,
    graph: &FlowchartGraph,
    node: &FlowchartNode,
    consumed_parent_ids: &[String],
) -> Result<PrefetchedOutputs> {
    let mut node_ids: Vec<String> = consumed_parent_ids.to_vec();
    for edge in graph.dotted_incoming(&node.id) {
        node_ids.push(edge.source_node_id.clone());
    }
    node_ids.sort();
    node_ids.dedup();

    let mut map = HashMap::with_capacity(node_ids.len());
    for id in node_ids {
        if let Some(run_node) = RunNodeRepository::latest_succeeded(pool, flowchart_run_id, &id).await? {
            map.insert(id, run_node.output_state);
        }
    }
    Ok(PrefetchedOutputs(map))
}
