//! The Flowchart Scheduler (C6): loads a flowchart, runs its C7 preflight
//! checks, then drives the admission loop described in the run loop
//! design notes — a single-threaded `tokio::select!` over the ready
//! queue, a completion channel and a cancellation signal, with a bounded
//! worker pool for concurrent node dispatch.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use flowchart_core::context::build_input_context;
use flowchart_core::fanin::{AdmissionDecision, AdmissionToken, FanInGate};
use flowchart_core::graph::FlowchartGraph;
use flowchart_core::model::{FlowchartNode, FlowchartRun, FlowchartRunNode, NodeRunStatus, RunStatus};
use flowchart_core::routing::resolve_outgoing;
use flowchart_store::connection::DatabasePool;
use flowchart_store::events::{EventLog, RunEvent};
use flowchart_store::repositories::{EdgeRepository, FlowchartRepository, NodeRepository, RunNodeRepository, RunRepository};
use node_engine::NodeHandlerRequest;
use rag_contract::DefaultTcpProbe;

use crate::config::RuntimeContext;
use crate::dispatch::NodeDispatch;
use crate::error::{Result, SchedulerError};
use crate::outputs::prefetch_outputs;
use crate::preflight;

/// Cooperative handle for an in-flight run: cancelling stops admission of
/// new nodes and lets already-dispatched work drain before the run
/// transitions to `canceled`.
#[derive(Clone)]
pub struct RunHandle {
    cancel: CancellationToken,
}

impl RunHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

struct NodeCompletion {
    node_id: String,
    outcome: node_engine::error::Result<node_engine::NodeHandlerOutput>,
}

pub struct Scheduler<D: NodeDispatch> {
    pool: DatabasePool,
    event_log: EventLog,
    dispatch: Arc<D>,
    runtime: RuntimeContext,
}

impl<D: NodeDispatch + 'static> Scheduler<D> {
    pub fn new(pool: DatabasePool, event_log: EventLog, dispatch: Arc<D>, runtime: RuntimeContext) -> Self {
        Self { pool, event_log, dispatch, runtime }
    }

    async fn load_graph(&self, flowchart_id: &str) -> Result<FlowchartGraph> {
        let flowchart = FlowchartRepository::get_by_id(&self.pool, flowchart_id)
            .await?
            .ok_or_else(|| SchedulerError::FlowchartNotFound(flowchart_id.to_string()))?;
        let nodes = NodeRepository::list_for_flowchart(&self.pool, flowchart_id).await?;
        let edges = EdgeRepository::list_for_flowchart(&self.pool, flowchart_id).await?;
        Ok(FlowchartGraph::build(flowchart, nodes, edges))
    }

    /// Runs a flowchart to completion with no external cancellation
    /// handle — equivalent to `spawn_run` immediately awaited.
    pub async fn run_flowchart(&self, flowchart_id: &str) -> Result<FlowchartRun> {
        self.run_with_cancellation(flowchart_id, CancellationToken::new()).await
    }

    /// Spawns a run in the background, returning a handle the caller can
    /// cancel plus a join handle for the final [`FlowchartRun`].
    pub fn spawn_run(self: Arc<Self>, flowchart_id: String) -> (RunHandle, tokio::task::JoinHandle<Result<FlowchartRun>>) {
        let cancel = CancellationToken::new();
        let handle = RunHandle { cancel: cancel.clone() };
        let join = tokio::spawn(async move { self.run_with_cancellation(&flowchart_id, cancel).await });
        (handle, join)
    }

    async fn run_with_cancellation(&self, flowchart_id: &str, cancel: CancellationToken) -> Result<FlowchartRun> {
        let graph = self.load_graph(flowchart_id).await?;
        preflight::validate_graph(flowchart_id, &graph)?;
        preflight::check_rag_reachability(&graph, self.runtime.rag_host.clone(), self.runtime.rag_port, &DefaultTcpProbe).await?;
        let graph = Arc::new(graph);

        let start_node = graph.start_node()?.clone();

        let mut run = FlowchartRun::new(flowchart_id);
        run.transition(RunStatus::Running)?;
        RunRepository::create(&self.pool, &run).await?;
        info!(flowchart_run_id = %run.id, flowchart_id, "flowchart run started");

        let mut fan_in_gate = FanInGate::new();
        let mut ready_queue: VecDeque<(String, Vec<String>)> = VecDeque::new();
        ready_queue.push_back((start_node.id.clone(), Vec::new()));

        let worker_pool_size = self.runtime.worker_pool_size.max(1);
        let semaphore = Arc::new(Semaphore::new(worker_pool_size));
        let (completion_tx, mut completion_rx) = mpsc::channel::<Result<NodeCompletion>>(worker_pool_size * 2);
        let mut in_flight: usize = 0;
        let mut failure: Option<String> = None;
        let in_flight_executions: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));
        let mut cancellation_initiated = false;
        let mut grace_deadline: Option<Instant> = None;
        let mut grace_exceeded = false;
        let mut node_tasks: JoinSet<()> = JoinSet::new();

        loop {
            if failure.is_none() && !cancel.is_cancelled() {
                while let Some((node_id, consumed_parent_ids)) = ready_queue.pop_front() {
                    let permit = semaphore.clone().acquire_owned().await.expect("semaphore is never closed while the run loop owns it");
                    in_flight += 1;

                    let pool = self.pool.clone();
                    let event_log = self.event_log.clone();
                    let dispatch = self.dispatch.clone();
                    let graph = graph.clone();
                    let runtime = self.runtime.clone();
                    let flowchart_run_id = run.id.clone();
                    let tx = completion_tx.clone();
                    let in_flight_executions = in_flight_executions.clone();

                    node_tasks.spawn(async move {
                        let result = execute_node(pool, event_log, dispatch, graph, runtime, flowchart_run_id, node_id, consumed_parent_ids, in_flight_executions).await;
                        drop(permit);
                        let _ = tx.send(result).await;
                    });
                }
            } else {
                for (node_id, _) in ready_queue.drain(..) {
                    warn!(node_id = %node_id, flowchart_run_id = %run.id, "skipping admission, run is failing or canceled");
                }
            }

            if in_flight == 0 {
                break;
            }

            let grace_wait = async {
                match grace_deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                completion = completion_rx.recv() => {
                    match completion {
                        Some(Ok(completion)) => {
                            in_flight -= 1;
                            self.handle_completion(&graph, &mut fan_in_gate, &mut ready_queue, &mut failure, &cancel, completion);
                        }
                        Some(Err(infra_err)) => {
                            in_flight -= 1;
                            warn!(flowchart_run_id = %run.id, error = %infra_err, "node execution hit an infrastructure error");
                            failure.get_or_insert(infra_err.to_string());
                            cancel.cancel();
                        }
                        None => break,
                    }
                }
                _ = cancel.cancelled(), if !cancellation_initiated => {
                    cancellation_initiated = true;
                    let grace = self.runtime.cancel_grace_timeout_seconds;
                    let ids: Vec<String> = in_flight_executions.lock().unwrap().iter().cloned().collect();
                    info!(flowchart_run_id = %run.id, count = ids.len(), grace_period_seconds = grace, "cancelling in-flight node executions");
                    for id in ids {
                        let dispatch = self.dispatch.clone();
                        let run_id = run.id.clone();
                        tokio::spawn(async move {
                            if let Err(e) = dispatch.cancel(&id, grace).await {
                                warn!(flowchart_run_id = %run_id, execution_id = %id, error = %e, "failed to cancel in-flight node execution");
                            }
                        });
                    }
                    grace_deadline = Some(Instant::now() + Duration::from_secs(grace));
                }
                _ = grace_wait, if grace_deadline.is_some() => {
                    warn!(flowchart_run_id = %run.id, in_flight, "cancellation grace period elapsed with node executions still in flight");
                    grace_exceeded = true;
                    node_tasks.abort_all();
                    break;
                }
            }
        }

        let final_status = if failure.is_some() {
            RunStatus::Failed
        } else if cancel.is_cancelled() {
            RunStatus::Canceled
        } else {
            RunStatus::Completed
        };
        run.error = failure.or(if grace_exceeded { Some("cancel_grace_timeout_exceeded".to_string()) } else { None });
        run.transition(final_status)?;
        RunRepository::save(&self.pool, &run).await?;
        self.event_log
            .emit(&self.pool, &run.id, RunEvent::FlowchartRunCompleted { flowchart_run_id: run.id.clone(), status: run.status.as_str().to_string() })
            .await?;
        info!(flowchart_run_id = %run.id, status = run.status.as_str(), "flowchart run finished");

        Ok(run)
    }

    fn handle_completion(
        &self,
        graph: &FlowchartGraph,
        fan_in_gate: &mut FanInGate,
        ready_queue: &mut VecDeque<(String, Vec<String>)>,
        failure: &mut Option<String>,
        cancel: &CancellationToken,
        completion: NodeCompletion,
    ) {
        if failure.is_some() {
            return;
        }

        let output = match completion.outcome {
            Ok(output) => output,
            Err(e) => {
                *failure = Some(e.to_string());
                cancel.cancel();
                return;
            }
        };

        let node = graph.node(&completion.node_id).expect("node exists in the graph loaded for this run");
        match resolve_outgoing(graph, node, &output.routing_state) {
            Ok(emitted_edges) => {
                for edge in emitted_edges {
                    let target = graph.node(&edge.target_node_id).expect("dangling edge rejected by preflight validation");
                    let token = AdmissionToken { source_parent_node_id: completion.node_id.clone() };
                    if let AdmissionDecision::Admit { consumed_parent_ids } = fan_in_gate.offer(graph, target, token) {
                        ready_queue.push_back((target.id.clone(), consumed_parent_ids));
                    }
                }
            }
            Err(e) => {
                *failure = Some(e.to_string());
                cancel.cancel();
            }
        }
    }
}

async fn execute_node<D: NodeDispatch>(
    pool: DatabasePool,
    event_log: EventLog,
    dispatch: Arc<D>,
    graph: Arc<FlowchartGraph>,
    runtime: RuntimeContext,
    flowchart_run_id: String,
    node_id: String,
    consumed_parent_ids: Vec<String>,
    in_flight_executions: Arc<Mutex<HashSet<String>>>,
) -> Result<NodeCompletion> {
    let node: FlowchartNode = graph
        .node(&node_id)
        .cloned()
        .ok_or_else(|| SchedulerError::Graph(flowchart_core::error::GraphError::NodeNotFound(node_id.clone(), flowchart_run_id.clone())))?;

    let executed = RunNodeRepository::execution_count(&pool, &flowchart_run_id, &node_id).await?;
    if executed >= graph.flowchart.max_node_executions {
        return Err(SchedulerError::MaxExecutionsExceeded { node_id, limit: graph.flowchart.max_node_executions });
    }
    let execution_index = executed;

    let mut run_node = FlowchartRunNode::new(&flowchart_run_id, &node_id, execution_index);
    RunNodeRepository::create(&pool, &run_node).await?;
    event_log
        .emit(&pool, &flowchart_run_id, RunEvent::NodeTaskCreated { flowchart_run_node_id: run_node.id.clone(), flowchart_node_id: node_id.clone() })
        .await?;

    run_node.transition(NodeRunStatus::Running)?;
    RunNodeRepository::save(&pool, &run_node).await?;
    event_log
        .emit(&pool, &flowchart_run_id, RunEvent::NodeTaskUpdated { flowchart_run_node_id: run_node.id.clone(), status: "running".to_string() })
        .await?;

    let outputs = prefetch_outputs(&pool, &flowchart_run_id, &graph, &node, &consumed_parent_ids).await?;
    let input_context = build_input_context(&graph, &node, &consumed_parent_ids, &outputs);

    let request = NodeHandlerRequest {
        node_id: &node.id,
        node_type: node.node_type,
        node_ref_id: node.ref_id.as_deref(),
        node_config: &node.config,
        input_context,
        execution_id: &run_node.id,
        execution_task_id: None,
        execution_index,
        enabled_providers: &runtime.enabled_providers,
        default_model_id: runtime.default_model_id.as_deref(),
        mcp_server_keys: &node.mcp_server_ids,
        skill_ids: &node.skill_ids,
        execution_timeout_seconds: runtime.execution_timeout_seconds,
        log_collection_timeout_seconds: runtime.log_collection_timeout_seconds,
    };

    in_flight_executions.lock().unwrap().insert(run_node.id.clone());
    let outcome = dispatch.dispatch(node.node_type, request).await;
    in_flight_executions.lock().unwrap().remove(&run_node.id);

    match &outcome {
        Ok(output) => {
            run_node.output_state = output.output_state.clone();
            run_node.routing_state = serde_json::to_value(&output.routing_state)?;
            run_node.transition(NodeRunStatus::Succeeded)?;
            RunNodeRepository::save(&pool, &run_node).await?;
            event_log
                .emit(&pool, &flowchart_run_id, RunEvent::NodeTaskCompleted { flowchart_run_node_id: run_node.id.clone(), status: "succeeded".to_string() })
                .await?;
        }
        Err(e) => {
            run_node.error = Some(e.to_string());
            run_node.transition(NodeRunStatus::Failed)?;
            RunNodeRepository::save(&pool, &run_node).await?;
            event_log
                .emit(&pool, &flowchart_run_id, RunEvent::NodeTaskCompleted { flowchart_run_node_id: run_node.id.clone(), status: "failed".to_string() })
                .await?;
        }
    }
    event_log
        .emit(
            &pool,
            &flowchart_run_id,
            RunEvent::FlowchartRunNodeUpdated { flowchart_run_id: flowchart_run_id.clone(), flowchart_run_node_id: run_node.id.clone(), status: run_node.status.as_str().to_string() },
        )
        .await?;

    Ok(NodeCompletion { node_id, outcome })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::test_support::FakeDispatch;
    use flowchart_core::model::{EdgeMode, Flowchart, FlowchartEdge, NodeType};
    use flowchart_store::connection::DatabaseConnection;
    use node_engine::NodeHandlerOutput;
    use serde_json::json;

    async fn setup_pool() -> DatabasePool {
        let conn = DatabaseConnection::new("sqlite::memory:").await.unwrap();
        conn.run_migrations().await.unwrap();
        conn.pool().clone()
    }

    async fn seed_linear_flowchart(pool: &DatabasePool) -> (String, String, String) {
        let flowchart = Flowchart::new("linear", 10);
        FlowchartRepository::create(pool, &flowchart).await.unwrap();
        let start = FlowchartNode::new(&flowchart.id, NodeType::Start);
        let task = FlowchartNode::new(&flowchart.id, NodeType::Task);
        let end = FlowchartNode::new(&flowchart.id, NodeType::End);
        NodeRepository::create(pool, &start).await.unwrap();
        NodeRepository::create(pool, &task).await.unwrap();
        NodeRepository::create(pool, &end).await.unwrap();
        EdgeRepository::create(pool, &FlowchartEdge::new(&flowchart.id, &start.id, &task.id, EdgeMode::Solid)).await.unwrap();
        EdgeRepository::create(pool, &FlowchartEdge::new(&flowchart.id, &task.id, &end.id, EdgeMode::Solid)).await.unwrap();
        (flowchart.id, task.id, end.id)
    }

    #[tokio::test]
    async fn linear_flowchart_runs_to_completion() {
        let pool = setup_pool().await;
        let (flowchart_id, _task_id, _end_id) = seed_linear_flowchart(&pool).await;

        let event_log = EventLog::new(64);
        let dispatch = Arc::new(FakeDispatch::new());
        let scheduler = Scheduler::new(pool.clone(), event_log, dispatch, RuntimeContext::default());

        let run = scheduler.run_flowchart(&flowchart_id).await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);

        let run_nodes = RunNodeRepository::list_for_run(&pool, &run.id).await.unwrap();
        assert_eq!(run_nodes.len(), 3);
        assert!(run_nodes.iter().all(|n| n.status == NodeRunStatus::Succeeded));
    }

    #[tokio::test]
    async fn a_failing_node_fails_the_whole_run_without_running_downstream() {
        let pool = setup_pool().await;
        let (flowchart_id, task_id, _end_id) = seed_linear_flowchart(&pool).await;

        let event_log = EventLog::new(64);
        let dispatch = Arc::new(FakeDispatch::new().with_failure(&task_id));
        let scheduler = Scheduler::new(pool.clone(), event_log, dispatch, RuntimeContext::default());

        let run = scheduler.run_flowchart(&flowchart_id).await.unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.error.is_some());

        let run_nodes = RunNodeRepository::list_for_run(&pool, &run.id).await.unwrap();
        // start succeeded, task failed, end never admitted
        assert_eq!(run_nodes.len(), 2);
    }

    #[tokio::test]
    async fn fan_in_all_waits_for_every_parent_before_admitting() {
        let pool = setup_pool().await;
        let flowchart = Flowchart::new("fan-in", 10);
        FlowchartRepository::create(&pool, &flowchart).await.unwrap();

        let start = FlowchartNode::new(&flowchart.id, NodeType::Start);
        let branch_a = FlowchartNode::new(&flowchart.id, NodeType::Task);
        let branch_b = FlowchartNode::new(&flowchart.id, NodeType::Task);
        let join = FlowchartNode::new(&flowchart.id, NodeType::Task);
        for n in [&start, &branch_a, &branch_b, &join] {
            NodeRepository::create(&pool, n).await.unwrap();
        }
        EdgeRepository::create(&pool, &FlowchartEdge::new(&flowchart.id, &start.id, &branch_a.id, EdgeMode::Solid)).await.unwrap();
        EdgeRepository::create(&pool, &FlowchartEdge::new(&flowchart.id, &start.id, &branch_b.id, EdgeMode::Solid)).await.unwrap();
        EdgeRepository::create(&pool, &FlowchartEdge::new(&flowchart.id, &branch_a.id, &join.id, EdgeMode::Solid)).await.unwrap();
        EdgeRepository::create(&pool, &FlowchartEdge::new(&flowchart.id, &branch_b.id, &join.id, EdgeMode::Solid)).await.unwrap();

        let event_log = EventLog::new(64);
        let dispatch = Arc::new(FakeDispatch::new());
        let scheduler = Scheduler::new(pool.clone(), event_log, dispatch, RuntimeContext::default());

        let run = scheduler.run_flowchart(&flowchart.id).await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);

        let run_nodes = RunNodeRepository::list_for_run(&pool, &run.id).await.unwrap();
        let join_executions = run_nodes.iter().filter(|n| n.flowchart_node_id == join.id).count();
        assert_eq!(join_executions, 1);
    }

    #[tokio::test]
    async fn decision_routes_only_the_matched_branch() {
        let pool = setup_pool().await;
        let flowchart = Flowchart::new("decision", 10);
        FlowchartRepository::create(&pool, &flowchart).await.unwrap();

        let start = FlowchartNode::new(&flowchart.id, NodeType::Start);
        let decision = FlowchartNode::new(&flowchart.id, NodeType::Decision);
        let route_a = FlowchartNode::new(&flowchart.id, NodeType::Task);
        let route_b = FlowchartNode::new(&flowchart.id, NodeType::Task);
        for n in [&start, &decision, &route_a, &route_b] {
            NodeRepository::create(&pool, n).await.unwrap();
        }
        EdgeRepository::create(&pool, &FlowchartEdge::new(&flowchart.id, &start.id, &decision.id, EdgeMode::Solid)).await.unwrap();
        let mut edge_a = FlowchartEdge::new(&flowchart.id, &decision.id, &route_a.id, EdgeMode::Solid);
        edge_a.condition_key = Some("route_a".to_string());
        EdgeRepository::create(&pool, &edge_a).await.unwrap();
        let mut edge_b = FlowchartEdge::new(&flowchart.id, &decision.id, &route_b.id, EdgeMode::Solid);
        edge_b.condition_key = Some("route_b".to_string());
        EdgeRepository::create(&pool, &edge_b).await.unwrap();

        let mut routing_state = flowchart_core::routing::RoutingState::default();
        routing_state.matched_connector_ids = vec!["route_a".to_string()];
        let dispatch = Arc::new(FakeDispatch::new().with_output(&decision.id, NodeHandlerOutput::new(json!({})).with_routing(routing_state)));

        let event_log = EventLog::new(64);
        let scheduler = Scheduler::new(pool.clone(), event_log, dispatch, RuntimeContext::default());
        let run = scheduler.run_flowchart(&flowchart.id).await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);

        let run_nodes = RunNodeRepository::list_for_run(&pool, &run.id).await.unwrap();
        assert!(run_nodes.iter().any(|n| n.flowchart_node_id == route_a.id));
        assert!(!run_nodes.iter().any(|n| n.flowchart_node_id == route_b.id));
    }

    #[tokio::test]
    async fn max_node_executions_guardrail_fails_a_self_looping_run() {
        let pool = setup_pool().await;
        let flowchart = Flowchart::new("loop", 2);
        FlowchartRepository::create(&pool, &flowchart).await.unwrap();

        let start = FlowchartNode::new(&flowchart.id, NodeType::Start);
        let looped = FlowchartNode::new(&flowchart.id, NodeType::Task);
        NodeRepository::create(&pool, &start).await.unwrap();
        NodeRepository::create(&pool, &looped).await.unwrap();
        EdgeRepository::create(&pool, &FlowchartEdge::new(&flowchart.id, &start.id, &looped.id, EdgeMode::Solid)).await.unwrap();
        EdgeRepository::create(&pool, &FlowchartEdge::new(&flowchart.id, &looped.id, &looped.id, EdgeMode::Solid)).await.unwrap();

        let event_log = EventLog::new(64);
        let dispatch = Arc::new(FakeDispatch::new());
        let scheduler = Scheduler::new(pool.clone(), event_log, dispatch, RuntimeContext::default());

        let run = scheduler.run_flowchart(&flowchart.id).await.unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.error.as_deref().unwrap_or_default().contains("max_node_executions") || run.error.as_deref().unwrap_or_default().contains("exceeded"));
    }

    #[tokio::test]
    async fn cancelling_a_run_stops_it_and_cancels_in_flight_dispatch() {
        let pool = setup_pool().await;
        let (flowchart_id, task_id, _end_id) = seed_linear_flowchart(&pool).await;

        let event_log = EventLog::new(64);
        let dispatch = Arc::new(FakeDispatch::new().with_delay(&task_id, std::time::Duration::from_secs(5)));
        let runtime = RuntimeContext { cancel_grace_timeout_seconds: 1, ..RuntimeContext::default() };
        let scheduler = Arc::new(Scheduler::new(pool.clone(), event_log, dispatch.clone(), runtime));

        let (handle, join) = scheduler.spawn_run(flowchart_id);
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        handle.cancel();

        let run = join.await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Canceled);
        assert!(!dispatch.cancellations.lock().unwrap().is_empty());
    }
}
