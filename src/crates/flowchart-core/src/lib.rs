//! Flowchart data model, adjacency index, fan-in gate, routing resolver and
//! graph validation/migration.
//!
//! This crate is I/O-free: it owns the graph/run data types and the pure
//! logic that walks them. Persistence lives in `flowchart-store`; dispatch
//! and node-type handlers live in `executor-dispatch` and `node-engine`.

pub mod context;
pub mod error;
pub mod fanin;
pub mod graph;
pub mod model;
pub mod routing;
pub mod validation;

pub use context::{build_input_context, LatestOutputLookup};
pub use error::{GraphError, Result};
pub use fanin::{AdmissionDecision, AdmissionToken, FanInGate};
pub use graph::FlowchartGraph;
pub use model::{
    is_valid_provider_dispatch_id, EdgeMode, FanInMode, Flowchart, FlowchartEdge, FlowchartNode, FlowchartRun,
    FlowchartRunNode, NodeRunStatus, NodeType, NoMatchPolicy, RunStatus,
};
pub use routing::{resolve_outgoing, DecisionNoMatch, RoutingState};
pub use validation::{migrate, snapshot_hash, transform, validate, MigrationResult, Severity, ValidationIssue, ValidationReport};
