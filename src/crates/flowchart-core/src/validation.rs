//! Validation & migration.
//!
//! Two phases: `transform` normalizes a graph (fills defaults, generates
//! missing decision `condition_key`s, de-dupes connector lists, drops empty
//! legacy config values) and `validate` checks structural and policy
//! invariants with an error/warning severity gate. Migration hashing is
//! sha256 over a canonical (sorted-key) JSON serialization, giving an
//! idempotent `before_hash == after_hash` check when no writes are needed.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::model::{EdgeMode, FlowchartEdge, FlowchartNode, NodeType};
use crate::graph::FlowchartGraph;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationIssue {
    pub code: String,
    pub message: String,
    pub severity: Severity,
    pub node_id: Option<String>,
    pub edge_id: Option<String>,
}

impl ValidationIssue {
    fn error(code: &str, message: impl Into<String>) -> Self {
        Self { code: code.to_string(), message: message.into(), severity: Severity::Error, node_id: None, edge_id: None }
    }

    fn warning(code: &str, message: impl Into<String>) -> Self {
        Self { code: code.to_string(), message: message.into(), severity: Severity::Warning, node_id: None, edge_id: None }
    }

    fn with_node(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    fn with_edge(mut self, edge_id: impl Into<String>) -> Self {
        self.edge_id = Some(edge_id.into());
        self
    }
}

#[derive(Debug, Default)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    /// The compatibility gate: `error` severity blocks a migration write;
    /// `warning` is recorded but passes.
    pub fn has_blocking_errors(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::Error)
    }
}

/// Structural checks: nodes referenced by edges exist, exactly one start
/// node, end nodes have no outgoing edges of any mode.
pub fn validate_structural(graph: &FlowchartGraph) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    let node_ids: HashSet<&str> = graph.nodes().map(|n| n.id.as_str()).collect();
    for edge in graph.edges() {
        if !node_ids.contains(edge.source_node_id.as_str()) || !node_ids.contains(edge.target_node_id.as_str()) {
            issues.push(ValidationIssue::error("dangling_edge", "edge references a node not in this flowchart").with_edge(edge.id.clone()));
        }
    }

    let start_count = graph.nodes().filter(|n| n.node_type == NodeType::Start).count();
    if start_count == 0 {
        issues.push(ValidationIssue::error("missing_start_node", "flowchart has no start node"));
    } else if start_count > 1 {
        issues.push(ValidationIssue::error("multiple_start_nodes", format!("flowchart has {start_count} start nodes, expected exactly one")));
    }

    for node in graph.nodes().filter(|n| n.node_type == NodeType::End) {
        let outgoing_any: Vec<&FlowchartEdge> = graph.edges().filter(|e| e.source_node_id == node.id).collect();
        if !outgoing_any.is_empty() {
            issues.push(ValidationIssue::error("end_node_has_outgoing_edges", "end node must not have outgoing edges").with_node(node.id.clone()));
        }
    }

    issues
}

/// The fixed per-`node_type` binding-compatibility table (spec.md §4.7):
/// which of the four binding lists a node of this type may carry.
fn allowed_binding_lists(node_type: NodeType) -> &'static [&'static str] {
    match node_type {
        NodeType::Task => &["mcp_server_ids", "script_ids", "skill_ids", "attachment_ids"],
        NodeType::Memory => &["mcp_server_ids"],
        NodeType::Rag => &["attachment_ids"],
        NodeType::Plan => &["skill_ids", "attachment_ids"],
        NodeType::Decision | NodeType::Start | NodeType::End | NodeType::Milestone | NodeType::Flowchart => &[],
    }
}

fn binding_list<'a>(node: &'a FlowchartNode, list_name: &str) -> &'a [String] {
    match list_name {
        "mcp_server_ids" => &node.mcp_server_ids,
        "script_ids" => &node.script_ids,
        "skill_ids" => &node.skill_ids,
        _ => &node.attachment_ids,
    }
}

/// Policy checks: `condition_key` only meaningful on decision nodes'
/// solid outgoing edges (unique, non-empty); fan-in bounds; mixed
/// solid/dotted between the same `(source, target)` pair is rejected;
/// outgoing solid edge-count bounds (1 for non-decision, 3 for decision);
/// memory-node MCP binding; binding-type compatibility per node_type.
pub fn validate_policy(graph: &FlowchartGraph) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    let mut pair_modes: HashMap<(String, String), HashSet<EdgeMode>> = HashMap::new();
    for edge in graph.edges() {
        pair_modes
            .entry((edge.source_node_id.clone(), edge.target_node_id.clone()))
            .or_default()
            .insert(edge.edge_mode);
    }
    for ((source, target), modes) in &pair_modes {
        if modes.len() > 1 {
            issues.push(ValidationIssue::error(
                "mixed_edge_mode_for_pair",
                format!("edge pair ({source}, {target}) mixes solid and dotted edge_mode"),
            ));
        }
    }

    for node in graph.nodes() {
        let solid_out = graph.solid_outgoing(&node.id);

        if node.node_type != NodeType::Decision {
            for edge in graph.edges().filter(|e| e.source_node_id == node.id && e.condition_key.is_some()) {
                issues.push(
                    ValidationIssue::error("condition_key_on_non_decision", "condition_key is only meaningful on decision-node solid outgoing edges")
                        .with_node(node.id.clone())
                        .with_edge(edge.id.clone()),
                );
            }
            let max_allowed = 1;
            if solid_out.len() > max_allowed {
                issues.push(ValidationIssue::error(
                    "too_many_outgoing_solid_edges",
                    format!("node has {} solid outgoing edges, at most {} permitted", solid_out.len(), max_allowed),
                ).with_node(node.id.clone()));
            }
        } else {
            let max_allowed = 3;
            if solid_out.len() > max_allowed {
                issues.push(ValidationIssue::error(
                    "too_many_outgoing_solid_edges",
                    format!("decision node has {} solid outgoing edges, at most {} permitted", solid_out.len(), max_allowed),
                ).with_node(node.id.clone()));
            }
            let mut keys: HashSet<&str> = HashSet::new();
            for edge in &solid_out {
                match edge.condition_key.as_deref() {
                    None | Some("") => {
                        issues.push(ValidationIssue::error("decision_edge_missing_condition_key", "decision node's solid outgoing edge must have a non-empty condition_key").with_node(node.id.clone()).with_edge(edge.id.clone()));
                    }
                    Some(key) => {
                        if !keys.insert(key) {
                            issues.push(ValidationIssue::error("duplicate_condition_key", format!("duplicate condition_key '{key}' on decision node's solid outgoing edges")).with_node(node.id.clone()));
                        }
                    }
                }
            }
        }

        if node.node_type == NodeType::Memory && node.mcp_server_ids.is_empty() {
            issues.push(ValidationIssue::error("memory_node_missing_mcp_binding", "memory node requires at least one bound mcp_server_id").with_node(node.id.clone()));
        }

        let allowed = allowed_binding_lists(node.node_type);
        for list_name in ["mcp_server_ids", "script_ids", "skill_ids", "attachment_ids"] {
            if !binding_list(node, list_name).is_empty() && !allowed.contains(&list_name) {
                issues.push(
                    ValidationIssue::error(
                        "incompatible_binding_type",
                        format!("{} nodes may not carry a {list_name} binding", node.node_type.as_str()),
                    )
                    .with_node(node.id.clone()),
                );
            }
        }

        if node.fan_in_mode() == crate::model::FanInMode::Custom {
            let parent_count = graph.solid_parent_ids(&node.id).len();
            match node.fan_in_custom_count() {
                None => issues.push(ValidationIssue::error("missing_fan_in_custom_count", "fan_in_mode=custom requires fan_in_custom_count").with_node(node.id.clone())),
                Some(count) => {
                    if count == 0 || count as usize > parent_count.max(1) {
                        issues.push(ValidationIssue::error("fan_in_custom_count_out_of_range", format!("fan_in_custom_count {count} out of range [1, {parent_count}]")).with_node(node.id.clone()));
                    }
                }
            }
        }
    }

    issues
}

pub fn validate(graph: &FlowchartGraph) -> ValidationReport {
    let mut issues = validate_structural(graph);
    issues.extend(validate_policy(graph));
    ValidationReport { issues }
}

/// Transform phase: fills in defaults and normalizes legacy shapes before
/// validation runs. Returns the transformed node/edge lists plus the notes
/// describing what changed (for audit/log purposes).
pub fn transform(mut nodes: Vec<FlowchartNode>, mut edges: Vec<FlowchartEdge>) -> (Vec<FlowchartNode>, Vec<FlowchartEdge>, Vec<String>) {
    let mut notes = Vec::new();

    for node in nodes.iter_mut() {
        for list_name in ["mcp_server_ids", "script_ids", "skill_ids", "attachment_ids"] {
            let list = match list_name {
                "mcp_server_ids" => &mut node.mcp_server_ids,
                "script_ids" => &mut node.script_ids,
                "skill_ids" => &mut node.skill_ids,
                _ => &mut node.attachment_ids,
            };
            let before = list.len();
            let mut seen = HashSet::new();
            list.retain(|id| seen.insert(id.clone()));
            if list.len() != before {
                notes.push(format!("node {} de-duplicated {}", node.id, list_name));
            }
        }
        node.config.retain(|_, v| !matches!(v, serde_json::Value::String(s) if s.is_empty()));
    }

    // Generate missing decision condition_keys deterministically so a
    // later validate() pass does not re-flag them.
    let decision_ids: HashSet<String> = nodes.iter().filter(|n| n.node_type == NodeType::Decision).map(|n| n.id.clone()).collect();
    for edge in edges.iter_mut() {
        if decision_ids.contains(&edge.source_node_id) && edge.edge_mode == EdgeMode::Solid && edge.condition_key.as_deref().unwrap_or("").is_empty() {
            edge.condition_key = Some(format!("route_{}", &edge.id[..8.min(edge.id.len())]));
            notes.push(format!("edge {} generated condition_key", edge.id));
        }
    }

    (nodes, edges, notes)
}

#[derive(Serialize)]
struct CanonicalSnapshot<'a> {
    flowchart: &'a crate::model::Flowchart,
    nodes: Vec<&'a FlowchartNode>,
    edges: Vec<&'a FlowchartEdge>,
}

/// sha256 over the canonical (sorted-key, since `serde_json`'s default
/// `Map` is a `BTreeMap` without the `preserve_order` feature) JSON
/// serialization of a flowchart snapshot.
pub fn snapshot_hash(graph: &FlowchartGraph) -> String {
    let mut nodes: Vec<&FlowchartNode> = graph.nodes().collect();
    nodes.sort_by(|a, b| a.id.cmp(&b.id));
    let mut edges: Vec<&FlowchartEdge> = graph.edges().collect();
    edges.sort_by(|a, b| a.id.cmp(&b.id));
    let snapshot = CanonicalSnapshot { flowchart: &graph.flowchart, nodes, edges };
    let json = serde_json::to_string(&snapshot).expect("canonical snapshot is always serializable");
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug)]
pub struct MigrationResult {
    pub before_hash: String,
    pub after_hash: String,
    pub report: ValidationReport,
    pub notes: Vec<String>,
}

impl MigrationResult {
    /// `before_hash == after_hash` implies no writes were needed.
    pub fn is_idempotent(&self) -> bool {
        self.before_hash == self.after_hash
    }

    pub fn should_rollback(&self) -> bool {
        self.report.has_blocking_errors()
    }
}

/// Run transform + validate over a loaded graph. Does not mutate storage;
/// the caller applies the transformed node/edge lists only when
/// `!should_rollback()`.
pub fn migrate(graph: &FlowchartGraph) -> (Vec<FlowchartNode>, Vec<FlowchartEdge>, MigrationResult) {
    let before_hash = snapshot_hash(graph);
    let nodes: Vec<FlowchartNode> = graph.nodes().cloned().collect();
    let edges: Vec<FlowchartEdge> = graph.edges().cloned().collect();
    let (nodes, edges, notes) = transform(nodes, edges);
    let transformed_graph = FlowchartGraph::build(graph.flowchart.clone(), nodes.clone(), edges.clone());
    let report = validate(&transformed_graph);
    let after_hash = snapshot_hash(&transformed_graph);
    (nodes, edges, MigrationResult { before_hash, after_hash, report, notes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EdgeMode, Flowchart};

    #[test]
    fn unchanged_graph_migration_is_idempotent() {
        let flowchart = Flowchart::new("t", 10);
        let start = FlowchartNode::new(&flowchart.id, NodeType::Start);
        let end = FlowchartNode::new(&flowchart.id, NodeType::End);
        let edge = FlowchartEdge::new(&flowchart.id, &start.id, &end.id, EdgeMode::Solid);
        let graph = FlowchartGraph::build(flowchart, vec![start, end], vec![edge]);

        let (_, _, result) = migrate(&graph);
        assert!(result.is_idempotent());
        assert!(!result.should_rollback());
    }

    #[test]
    fn missing_start_node_blocks_migration() {
        let flowchart = Flowchart::new("t", 10);
        let a = FlowchartNode::new(&flowchart.id, NodeType::Task);
        let graph = FlowchartGraph::build(flowchart, vec![a], vec![]);
        let (_, _, result) = migrate(&graph);
        assert!(result.should_rollback());
    }

    #[test]
    fn memory_node_without_mcp_binding_is_rejected() {
        let flowchart = Flowchart::new("t", 10);
        let memory = FlowchartNode::new(&flowchart.id, NodeType::Memory);
        let graph = FlowchartGraph::build(flowchart, vec![memory], vec![]);
        let issues = validate_policy(&graph);
        assert!(issues.iter().any(|i| i.code == "memory_node_missing_mcp_binding"));
    }

    #[test]
    fn memory_node_with_mcp_binding_passes() {
        let flowchart = Flowchart::new("t", 10);
        let mut memory = FlowchartNode::new(&flowchart.id, NodeType::Memory);
        memory.mcp_server_ids.push("mem-backend".to_string());
        let graph = FlowchartGraph::build(flowchart, vec![memory], vec![]);
        let issues = validate_policy(&graph);
        assert!(!issues.iter().any(|i| i.code == "memory_node_missing_mcp_binding"));
    }

    #[test]
    fn decision_node_cannot_carry_skill_bindings() {
        let flowchart = Flowchart::new("t", 10);
        let mut decision = FlowchartNode::new(&flowchart.id, NodeType::Decision);
        decision.skill_ids.push("some-skill".to_string());
        let graph = FlowchartGraph::build(flowchart, vec![decision], vec![]);
        let issues = validate_policy(&graph);
        assert!(issues.iter().any(|i| i.code == "incompatible_binding_type"));
    }

    #[test]
    fn task_node_skill_binding_is_compatible() {
        let flowchart = Flowchart::new("t", 10);
        let mut task = FlowchartNode::new(&flowchart.id, NodeType::Task);
        task.skill_ids.push("reviewer".to_string());
        let graph = FlowchartGraph::build(flowchart, vec![task], vec![]);
        let issues = validate_policy(&graph);
        assert!(!issues.iter().any(|i| i.code == "incompatible_binding_type"));
    }

    #[test]
    fn validate_is_idempotent_on_its_own_output() {
        let flowchart = Flowchart::new("t", 10);
        let start = FlowchartNode::new(&flowchart.id, NodeType::Start);
        let end = FlowchartNode::new(&flowchart.id, NodeType::End);
        let edge = FlowchartEdge::new(&flowchart.id, &start.id, &end.id, EdgeMode::Solid);
        let graph = FlowchartGraph::build(flowchart, vec![start, end], vec![edge]);
        let first = validate(&graph).issues.len();
        let second = validate(&graph).issues.len();
        assert_eq!(first, second);
    }
}
