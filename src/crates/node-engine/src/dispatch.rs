//! The closed node-type dispatch table (spec §"Dynamic dispatch"):
//! one handler per [`flowchart_core::model::NodeType`] variant, no
//! open-world extension at runtime.

use executor_dispatch::JobProvider;
use flowchart_core::model::NodeType;

use crate::decision::DecisionHandler;
use crate::error::Result;
use crate::flowchart::FlowchartRefHandler;
use crate::handler::{NodeHandler, NodeHandlerOutput, NodeHandlerRequest};
use crate::memory::MemoryHandler;
use crate::plan::PlanHandler;
use crate::rag::RagHandler;
use crate::start_end::{EndHandler, MilestoneHandler, StartHandler};
use crate::task::TaskHandler;

/// Owns one handler instance per node type. Built once at scheduler
/// startup with the concrete backends wired in; `dispatch` is the only
/// entry point the scheduler calls per node execution.
pub struct NodeEngine<P: JobProvider> {
    task: TaskHandler<P>,
    decision: DecisionHandler,
    memory: MemoryHandler,
    rag: RagHandler,
    flowchart_ref: FlowchartRefHandler,
    plan: PlanHandler,
}

impl<P: JobProvider> NodeEngine<P> {
    pub fn new(task: TaskHandler<P>, memory: MemoryHandler, rag: RagHandler, plan: PlanHandler) -> Self {
        Self { task, decision: DecisionHandler, memory, rag, flowchart_ref: FlowchartRefHandler, plan }
    }

    pub async fn dispatch(&self, node_type: NodeType, req: NodeHandlerRequest<'_>) -> Result<NodeHandlerOutput> {
        match node_type {
            NodeType::Start => StartHandler.handle(req).await,
            NodeType::End => EndHandler.handle(req).await,
            NodeType::Milestone => MilestoneHandler.handle(req).await,
            NodeType::Task => self.task.handle(req).await,
            NodeType::Decision => self.decision.handle(req).await,
            NodeType::Memory => self.memory.handle(req).await,
            NodeType::Rag => self.rag.handle(req).await,
            NodeType::Flowchart => self.flowchart_ref.handle(req).await,
            NodeType::Plan => self.plan.handle(req).await,
        }
    }

    /// Cancels an in-flight `task` node dispatch for `execution_id`. Every
    /// other node type runs in-process with nothing to cancel, so this
    /// only ever reaches the executor dispatcher.
    pub async fn cancel(&self, execution_id: &str, grace_period_seconds: u64) -> Result<()> {
        self.task.cancel(execution_id, grace_period_seconds).await
    }
}
