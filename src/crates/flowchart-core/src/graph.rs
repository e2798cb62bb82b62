//! The adjacency index.
//!
//! The graph is inherently
//! cyclic, so traversal never relies on object identity or recursive
//! structures — nodes and edges are kept as flat maps keyed by id, and a
//! per-node solid-outgoing / solid-incoming / dotted-incoming index is
//! rebuilt every time a flowchart is loaded for a run.

use std::collections::HashMap;

use crate::error::{GraphError, Result};
use crate::model::{EdgeMode, Flowchart, FlowchartEdge, FlowchartNode, NodeType};

#[derive(Debug, Default)]
struct Adjacency {
    solid_outgoing: HashMap<String, Vec<String>>,
    solid_incoming: HashMap<String, Vec<String>>,
    dotted_incoming: HashMap<String, Vec<String>>,
}

/// An in-memory, validated view of one flowchart: its nodes, its edges, and
/// the adjacency index derived from them. Build once per run load.
#[derive(Debug)]
pub struct FlowchartGraph {
    pub flowchart: Flowchart,
    nodes: HashMap<String, FlowchartNode>,
    edges: HashMap<String, FlowchartEdge>,
    adjacency: Adjacency,
}

impl FlowchartGraph {
    /// Build the adjacency index from a flat node/edge list. Does not
    /// validate structural invariants — call [`crate::validation::validate`]
    /// before using the graph to run a flowchart.
    pub fn build(flowchart: Flowchart, nodes: Vec<FlowchartNode>, edges: Vec<FlowchartEdge>) -> Self {
        let mut adjacency = Adjacency::default();
        for edge in &edges {
            match edge.edge_mode {
                EdgeMode::Solid => {
                    adjacency
                        .solid_outgoing
                        .entry(edge.source_node_id.clone())
                        .or_default()
                        .push(edge.id.clone());
                    adjacency
                        .solid_incoming
                        .entry(edge.target_node_id.clone())
                        .or_default()
                        .push(edge.id.clone());
                }
                EdgeMode::Dotted => {
                    adjacency
                        .dotted_incoming
                        .entry(edge.target_node_id.clone())
                        .or_default()
                        .push(edge.id.clone());
                }
            }
        }
        let nodes = nodes.into_iter().map(|n| (n.id.clone(), n)).collect();
        let edges = edges.into_iter().map(|e| (e.id.clone(), e)).collect();
        Self { flowchart, nodes, edges, adjacency }
    }

    pub fn node(&self, id: &str) -> Option<&FlowchartNode> {
        self.nodes.get(id)
    }

    pub fn edge(&self, id: &str) -> Option<&FlowchartEdge> {
        self.edges.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &FlowchartNode> {
        self.nodes.values()
    }

    pub fn edges(&self) -> impl Iterator<Item = &FlowchartEdge> {
        self.edges.values()
    }

    pub fn start_node(&self) -> Result<&FlowchartNode> {
        let starts: Vec<&FlowchartNode> = self.nodes.values().filter(|n| n.node_type == NodeType::Start).collect();
        match starts.len() {
            0 => Err(GraphError::MissingStartNode),
            1 => Ok(starts[0]),
            n => Err(GraphError::MultipleStartNodes(n)),
        }
    }

    fn resolve(&self, ids: &[String]) -> Vec<&FlowchartEdge> {
        ids.iter().filter_map(|id| self.edges.get(id)).collect()
    }

    pub fn solid_outgoing(&self, node_id: &str) -> Vec<&FlowchartEdge> {
        self.adjacency
            .solid_outgoing
            .get(node_id)
            .map(|ids| self.resolve(ids))
            .unwrap_or_default()
    }

    pub fn solid_incoming(&self, node_id: &str) -> Vec<&FlowchartEdge> {
        self.adjacency
            .solid_incoming
            .get(node_id)
            .map(|ids| self.resolve(ids))
            .unwrap_or_default()
    }

    pub fn dotted_incoming(&self, node_id: &str) -> Vec<&FlowchartEdge> {
        self.adjacency
            .dotted_incoming
            .get(node_id)
            .map(|ids| self.resolve(ids))
            .unwrap_or_default()
    }

    /// Distinct solid parent node ids of `node_id` (fan-in counts
    /// distinct solid parents, not edges).
    pub fn solid_parent_ids(&self, node_id: &str) -> Vec<String> {
        let mut parents: Vec<String> = self
            .solid_incoming(node_id)
            .into_iter()
            .map(|e| e.source_node_id.clone())
            .collect();
        parents.sort();
        parents.dedup();
        parents
    }
}
