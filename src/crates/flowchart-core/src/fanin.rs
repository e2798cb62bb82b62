//! Fan-in admission.
//!
//! Counts distinct **solid** parent node ids per target node and admits the
//! node according to its `fan_in_mode`. Dotted edges never contribute to
//! admission; the gate pulls their most recent `output_state` separately
//! (see [`crate::dotted`]).

use std::collections::{HashMap, HashSet};

use crate::graph::FlowchartGraph;
use crate::model::{FanInMode, FlowchartNode};

/// A token emitted by a solid parent admitting into `target_node_id`.
/// Tokens are keyed by `(source_parent_node_id, run_cycle)`; arriving more
/// than once from the same parent within the same open cycle coalesces.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AdmissionToken {
    pub source_parent_node_id: String,
}

#[derive(Debug)]
pub enum AdmissionDecision {
    NotReady,
    Admit { consumed_parent_ids: Vec<String> },
}

/// Per-target-node pending-token accumulator. One `FanInGate` is owned by
/// the scheduler for the lifetime of a run; each node id gets its own open
/// "cycle" of pending tokens, which closes (and resets) the moment an
/// admission fires.
#[derive(Debug, Default)]
pub struct FanInGate {
    pending: HashMap<String, HashSet<String>>,
}

impl FanInGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one arriving solid token for `target_node_id` and decide
    /// whether the node is now admitted.
    pub fn offer(
        &mut self,
        graph: &FlowchartGraph,
        node: &FlowchartNode,
        token: AdmissionToken,
    ) -> AdmissionDecision {
        let solid_parents: HashSet<String> = graph.solid_parent_ids(&node.id).into_iter().collect();
        if !solid_parents.contains(&token.source_parent_node_id) {
            // Not a solid parent of this node; ignore (defensive — the
            // scheduler should never offer such a token).
            return AdmissionDecision::NotReady;
        }

        match node.fan_in_mode() {
            FanInMode::Any => AdmissionDecision::Admit {
                consumed_parent_ids: vec![token.source_parent_node_id],
            },
            FanInMode::All => {
                let pending = self.pending.entry(node.id.clone()).or_default();
                pending.insert(token.source_parent_node_id);
                if pending.is_superset(&solid_parents) && !solid_parents.is_empty() {
                    let consumed: Vec<String> = self.pending.remove(&node.id).unwrap().into_iter().collect();
                    AdmissionDecision::Admit { consumed_parent_ids: consumed }
                } else {
                    AdmissionDecision::NotReady
                }
            }
            FanInMode::Custom => {
                let required = node.fan_in_custom_count().unwrap_or(1).max(1) as usize;
                let pending = self.pending.entry(node.id.clone()).or_default();
                pending.insert(token.source_parent_node_id);
                if pending.len() >= required {
                    let consumed: Vec<String> = self.pending.remove(&node.id).unwrap().into_iter().collect();
                    AdmissionDecision::Admit { consumed_parent_ids: consumed }
                } else {
                    AdmissionDecision::NotReady
                }
            }
        }
    }
}
