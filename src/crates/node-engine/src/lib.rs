//! Per-node-type dispatch (C4): the handler contract every node type
//! implements, plus one module per node type.

pub mod decision;
pub mod dispatch;
pub mod error;
pub mod flowchart;
pub mod handler;
pub mod memory;
pub mod plan;
pub mod rag;
pub mod start_end;
pub mod task;

pub use decision::DecisionHandler;
pub use dispatch::NodeEngine;
pub use error::{NodeEngineError, Result};
pub use flowchart::FlowchartRefHandler;
pub use handler::{envelope, NodeHandler, NodeHandlerOutput, NodeHandlerRequest};
pub use memory::{MemoryBackend, MemoryHandler, MemoryRecord};
pub use plan::PlanHandler;
pub use rag::{RagHandler, RagSourceDirectory};
pub use start_end::{EndHandler, MilestoneHandler, StartHandler};
pub use task::TaskHandler;
