//! The persisted data model (flowchart definitions and flowchart runs).
//!
//! Timestamps are RFC3339 strings rather than a SQLite-native datetime
//! type, so rows round-trip through JSON without a driver-specific codec.

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The closed set of node-type handlers: a discriminated union, no
/// open-world extension at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Start,
    End,
    Task,
    Decision,
    Memory,
    Rag,
    Flowchart,
    Plan,
    Milestone,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Start => "start",
            NodeType::End => "end",
            NodeType::Task => "task",
            NodeType::Decision => "decision",
            NodeType::Memory => "memory",
            NodeType::Rag => "rag",
            NodeType::Flowchart => "flowchart",
            NodeType::Plan => "plan",
            NodeType::Milestone => "milestone",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeMode {
    Solid,
    Dotted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FanInMode {
    All,
    Any,
    Custom,
}

impl Default for FanInMode {
    fn default() -> Self {
        FanInMode::All
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoMatchPolicy {
    Fail,
    Fallback,
}

impl Default for NoMatchPolicy {
    fn default() -> Self {
        NoMatchPolicy::Fail
    }
}

/// A persisted flowchart (directed graph of nodes and edges).
///
/// Mutated only through the validated graph write path; a flowchart
/// owns its nodes and edges with referential integrity enforced by
/// [`crate::validation`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flowchart {
    pub id: String,
    pub name: String,
    /// Loop guardrail: max executions of a single node id within one run.
    pub max_node_executions: u32,
    pub created_at: String,
    pub updated_at: String,
}

impl Flowchart {
    pub fn new(name: impl Into<String>, max_node_executions: u32) -> Self {
        let now = Utc::now().to_rfc3339();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            max_node_executions,
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowchartNode {
    pub id: String,
    pub flowchart_id: String,
    pub node_type: NodeType,
    pub ref_id: Option<String>,
    pub title: Option<String>,
    pub x: f64,
    pub y: f64,
    pub config: HashMap<String, Value>,
    pub model_id: Option<String>,
    pub mcp_server_ids: Vec<String>,
    pub script_ids: Vec<String>,
    pub skill_ids: Vec<String>,
    pub attachment_ids: Vec<String>,
}

impl FlowchartNode {
    pub fn new(flowchart_id: impl Into<String>, node_type: NodeType) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            flowchart_id: flowchart_id.into(),
            node_type,
            ref_id: None,
            title: None,
            x: 0.0,
            y: 0.0,
            config: HashMap::new(),
            model_id: None,
            mcp_server_ids: Vec::new(),
            script_ids: Vec::new(),
            skill_ids: Vec::new(),
            attachment_ids: Vec::new(),
        }
    }

    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(|v| v.as_str())
    }

    pub fn config_u32(&self, key: &str) -> Option<u32> {
        self.config.get(key).and_then(|v| v.as_u64()).map(|v| v as u32)
    }

    pub fn fan_in_mode(&self) -> FanInMode {
        match self.config_str("fan_in_mode") {
            Some("any") => FanInMode::Any,
            Some("custom") => FanInMode::Custom,
            _ => FanInMode::All,
        }
    }

    pub fn fan_in_custom_count(&self) -> Option<u32> {
        self.config_u32("fan_in_custom_count")
    }

    pub fn no_match_policy(&self) -> NoMatchPolicy {
        match self.config_str("no_match_policy") {
            Some("fallback") => NoMatchPolicy::Fallback,
            _ => NoMatchPolicy::Fail,
        }
    }

    pub fn fallback_condition_key(&self) -> Option<&str> {
        self.config_str("fallback_condition_key")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowchartEdge {
    pub id: String,
    pub flowchart_id: String,
    pub source_node_id: String,
    pub target_node_id: String,
    pub edge_mode: EdgeMode,
    pub condition_key: Option<String>,
    pub source_handle_id: Option<String>,
    pub target_handle_id: Option<String>,
    pub label: Option<String>,
}

impl FlowchartEdge {
    pub fn new(
        flowchart_id: impl Into<String>,
        source_node_id: impl Into<String>,
        target_node_id: impl Into<String>,
        edge_mode: EdgeMode,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            flowchart_id: flowchart_id.into(),
            source_node_id: source_node_id.into(),
            target_node_id: target_node_id.into(),
            edge_mode,
            condition_key: None,
            source_handle_id: None,
            target_handle_id: None,
            label: None,
        }
    }

    pub fn is_solid(&self) -> bool {
        matches!(self.edge_mode, EdgeMode::Solid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Canceled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed | RunStatus::Canceled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Canceled => "canceled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowchartRun {
    pub id: String,
    pub flowchart_id: String,
    pub status: RunStatus,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub error: Option<String>,
}

impl FlowchartRun {
    pub fn new(flowchart_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            flowchart_id: flowchart_id.into(),
            status: RunStatus::Queued,
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    /// Terminal states are final: once reached, no further transition is
    /// accepted.
    pub fn transition(&mut self, next: RunStatus) -> Result<(), crate::error::GraphError> {
        if self.status.is_terminal() {
            return Err(crate::error::GraphError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }
        if next == RunStatus::Running {
            self.started_at = Some(Utc::now().to_rfc3339());
        }
        if next.is_terminal() {
            self.finished_at = Some(Utc::now().to_rfc3339());
        }
        self.status = next;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRunStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl NodeRunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NodeRunStatus::Succeeded | NodeRunStatus::Failed | NodeRunStatus::Canceled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRunStatus::Queued => "queued",
            NodeRunStatus::Running => "running",
            NodeRunStatus::Succeeded => "succeeded",
            NodeRunStatus::Failed => "failed",
            NodeRunStatus::Canceled => "canceled",
        }
    }
}

/// One execution instance of a node within a run. Identified by
/// `(flowchart_run_id, flowchart_node_id, execution_index)`; `execution_index`
/// increases monotonically per node id per run so loops reuse node ids
/// without colliding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowchartRunNode {
    pub id: String,
    pub flowchart_run_id: String,
    pub flowchart_node_id: String,
    pub execution_index: u32,
    pub status: NodeRunStatus,
    pub input_context: Value,
    pub output_state: Value,
    pub routing_state: Value,
    pub provider_dispatch_id: Option<String>,
    pub runtime_evidence: Value,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub error: Option<String>,
}

impl FlowchartRunNode {
    pub fn new(flowchart_run_id: impl Into<String>, flowchart_node_id: impl Into<String>, execution_index: u32) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            flowchart_run_id: flowchart_run_id.into(),
            flowchart_node_id: flowchart_node_id.into(),
            execution_index,
            status: NodeRunStatus::Queued,
            input_context: Value::Object(Default::default()),
            output_state: Value::Object(Default::default()),
            routing_state: Value::Object(Default::default()),
            provider_dispatch_id: None,
            runtime_evidence: Value::Object(Default::default()),
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn transition(&mut self, next: NodeRunStatus) -> Result<(), crate::error::GraphError> {
        if self.status.is_terminal() {
            return Err(crate::error::GraphError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }
        if next == NodeRunStatus::Running {
            self.started_at = Some(Utc::now().to_rfc3339());
        }
        if next.is_terminal() {
            self.finished_at = Some(Utc::now().to_rfc3339());
        }
        self.status = next;
        Ok(())
    }
}

/// `provider_dispatch_id` format, validated against this invariant:
/// `^kubernetes:[A-Za-z0-9][A-Za-z0-9_.:/-]{0,511}$`.
pub fn is_valid_provider_dispatch_id(id: &str) -> bool {
    let Some(rest) = id.strip_prefix("kubernetes:") else {
        return false;
    };
    if rest.is_empty() || rest.len() > 512 {
        return false;
    }
    let mut chars = rest.chars();
    let first_ok = chars.next().map(|c| c.is_ascii_alphanumeric()).unwrap_or(false);
    let rest_ok = rest
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':' | '/' | '-'));
    first_ok && rest_ok
}
