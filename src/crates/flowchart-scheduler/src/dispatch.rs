//! Decouples the run loop from a concrete [`node_engine::NodeEngine`]
//! wiring so scheduler tests substitute a bare-bones fake instead of
//! standing up real task/memory/rag/plan handler backends.

use async_trait::async_trait;

use executor_dispatch::JobProvider;
use flowchart_core::model::NodeType;
use node_engine::error::Result as NodeEngineResult;
use node_engine::{NodeEngine, NodeHandlerOutput, NodeHandlerRequest};

#[async_trait]
pub trait NodeDispatch: Send + Sync {
    async fn dispatch(&self, node_type: NodeType, req: NodeHandlerRequest<'_>) -> NodeEngineResult<NodeHandlerOutput>;

    /// Cancels whatever in-flight work `execution_id` owns, if any.
    async fn cancel(&self, execution_id: &str, grace_period_seconds: u64) -> NodeEngineResult<()>;
}

#[async_trait]
impl<P: JobProvider + Send + Sync + 'static> NodeDispatch for NodeEngine<P> {
    async fn dispatch(&self, node_type: NodeType, req: NodeHandlerRequest<'_>) -> NodeEngineResult<NodeHandlerOutput> {
        NodeEngine::dispatch(self, node_type, req).await
    }

    async fn cancel(&self, execution_id: &str, grace_period_seconds: u64) -> NodeEngineResult<()> {
        NodeEngine::cancel(self, execution_id, grace_period_seconds).await
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// Records every node type it was asked to run and returns a
    /// caller-supplied canned output, keyed by node id.
    pub struct FakeDispatch {
        pub calls: Mutex<Vec<String>>,
        pub cancellations: Mutex<Vec<String>>,
        pub outputs: std::collections::HashMap<String, NodeHandlerOutput>,
        pub failures: std::collections::HashSet<String>,
        /// Node ids whose dispatch sleeps for this long before returning,
        /// simulating a node execution still in flight when a run is
        /// canceled.
        pub delays: std::collections::HashMap<String, std::time::Duration>,
    }

    impl FakeDispatch {
        pub fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                cancellations: Mutex::new(Vec::new()),
                outputs: std::collections::HashMap::new(),
                failures: std::collections::HashSet::new(),
                delays: std::collections::HashMap::new(),
            }
        }

        pub fn with_output(mut self, node_id: impl Into<String>, output: NodeHandlerOutput) -> Self {
            self.outputs.insert(node_id.into(), output);
            self
        }

        pub fn with_failure(mut self, node_id: impl Into<String>) -> Self {
            self.failures.insert(node_id.into());
            self
        }

        pub fn with_delay(mut self, node_id: impl Into<String>, delay: std::time::Duration) -> Self {
            self.delays.insert(node_id.into(), delay);
            self
        }
    }

    #[async_trait]
    impl NodeDispatch for FakeDispatch {
        async fn dispatch(&self, _node_type: NodeType, req: NodeHandlerRequest<'_>) -> NodeEngineResult<NodeHandlerOutput> {
            self.calls.lock().unwrap().push(req.node_id.to_string());
            if let Some(delay) = self.delays.get(req.node_id) {
                tokio::time::sleep(*delay).await;
            }
            if self.failures.contains(req.node_id) {
                return Err(node_engine::error::NodeEngineError::Dispatch(format!("forced failure for {}", req.node_id)));
            }
            Ok(self.outputs.get(req.node_id).cloned().unwrap_or_default())
        }

        async fn cancel(&self, execution_id: &str, _grace_period_seconds: u64) -> NodeEngineResult<()> {
            self.cancellations.lock().unwrap().push(execution_id.to_string());
            Ok(())
        }
    }
}
