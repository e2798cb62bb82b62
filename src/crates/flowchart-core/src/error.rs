use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("node {0} not found in flowchart {1}")]
    NodeNotFound(String, String),

    #[error("edge {0} references unknown node(s)")]
    DanglingEdge(String),

    #[error("flowchart has no start node")]
    MissingStartNode,

    #[error("flowchart has {0} start nodes, expected exactly one")]
    MultipleStartNodes(usize),

    #[error("end node {0} has outgoing edges")]
    EndNodeHasOutgoingEdges(String),

    #[error("decision node {0} has duplicate or empty condition_key on solid outgoing edges")]
    InvalidConditionKeys(String),

    #[error("edge pair ({0}, {1}) mixes solid and dotted edge_mode")]
    MixedEdgeModeForPair(String, String),

    #[error("condition_key set on non-decision node {0}")]
    ConditionKeyOnNonDecision(String),

    #[error("node {0} exceeds permitted outgoing solid edge count ({1} > {2})")]
    TooManyOutgoingSolidEdges(String, usize, usize),

    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("validation failed with {0} blocking error(s)")]
    ValidationFailed(usize),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    General(String),
}

pub type Result<T> = std::result::Result<T, GraphError>;
