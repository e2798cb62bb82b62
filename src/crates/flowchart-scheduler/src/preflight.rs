//! Pre-run checks (C7 structural/policy validation, plus the retrieval
//! store reachability probe for any `rag` node in query mode) run once
//! before a flowchart's first node is admitted. A failure here aborts
//! the run before any `FlowchartRun` row is even created.

use flowchart_core::graph::FlowchartGraph;
use flowchart_core::model::NodeType;
use flowchart_core::validation::validate;
use rag_contract::{rag_health_snapshot, TcpProbe};

use crate::error::{Result, SchedulerError};

/// Runs structural/policy validation over the loaded graph; returns the
/// blocking-error count as a [`SchedulerError::ValidationFailed`] if any
/// `Severity::Error` issue is present.
pub fn validate_graph(flowchart_id: &str, graph: &FlowchartGraph) -> Result<()> {
    let report = validate(graph);
    if report.has_blocking_errors() {
        let blocking = report.issues.iter().filter(|i| i.severity == flowchart_core::validation::Severity::Error).count();
        return Err(SchedulerError::ValidationFailed(flowchart_id.to_string(), blocking));
    }
    Ok(())
}

/// A graph containing a `rag` node configured for `mode: query` cannot
/// run if the retrieval store is unreachable — probed once up front
/// rather than discovered mid-run at the first rag node's dispatch.
pub async fn check_rag_reachability(graph: &FlowchartGraph, host: Option<String>, port: Option<u16>, probe: &dyn TcpProbe) -> Result<()> {
    let needs_rag = graph.nodes().any(|n| n.node_type == NodeType::Rag && n.config_str("mode").unwrap_or("query") == "query");
    if !needs_rag {
        return Ok(());
    }

    let snapshot = rag_health_snapshot(host, port, probe).await;
    if !snapshot.is_healthy() {
        return Err(SchedulerError::RagUnavailable(snapshot.error.unwrap_or_else(|| "retrieval store unhealthy".to_string())));
    }
    Ok(())
}
