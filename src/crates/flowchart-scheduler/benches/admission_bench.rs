use std::sync::Arc;

use async_trait::async_trait;
use criterion::{criterion_group, criterion_main, Criterion};

use flowchart_core::model::{EdgeMode, Flowchart, FlowchartEdge, FlowchartNode, NodeType};
use flowchart_store::connection::DatabaseConnection;
use flowchart_store::events::EventLog;
use flowchart_store::repositories::{EdgeRepository, FlowchartRepository, NodeRepository};
use flowchart_scheduler::{NodeDispatch, RuntimeContext, Scheduler};
use node_engine::error::Result as NodeEngineResult;
use node_engine::{NodeHandlerOutput, NodeHandlerRequest};

/// Immediately succeeds every node with an empty output — isolates the
/// admission loop's own overhead (fan-in bookkeeping, routing resolution,
/// event persistence) from a real handler's work.
struct NoopDispatch;

#[async_trait]
impl NodeDispatch for NoopDispatch {
    async fn dispatch(&self, _node_type: NodeType, _req: NodeHandlerRequest<'_>) -> NodeEngineResult<NodeHandlerOutput> {
        Ok(NodeHandlerOutput::default())
    }
}

/// `start -> [branches tasks] -> join`, every branch feeding a single
/// `fan_in_mode: all` join node — exercises the worst case for the fan-in
/// gate's pending-token bookkeeping.
async fn seed_fan_in_flowchart(pool: &flowchart_store::connection::DatabasePool, branches: usize) -> String {
    let flowchart = Flowchart::new("bench", 10);
    FlowchartRepository::create(pool, &flowchart).await.unwrap();

    let start = FlowchartNode::new(&flowchart.id, NodeType::Start);
    NodeRepository::create(pool, &start).await.unwrap();

    let mut join = FlowchartNode::new(&flowchart.id, NodeType::Task);
    join.config.insert("fan_in_mode".to_string(), "all".into());
    NodeRepository::create(pool, &join).await.unwrap();

    for _ in 0..branches {
        let branch = FlowchartNode::new(&flowchart.id, NodeType::Task);
        NodeRepository::create(pool, &branch).await.unwrap();
        EdgeRepository::create(pool, &FlowchartEdge::new(&flowchart.id, &start.id, &branch.id, EdgeMode::Solid)).await.unwrap();
        EdgeRepository::create(pool, &FlowchartEdge::new(&flowchart.id, &branch.id, &join.id, EdgeMode::Solid)).await.unwrap();
    }

    flowchart.id
}

fn fan_in_admission_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("fan-in admission, 16 branches", |b| {
        b.to_async(&runtime).iter(|| async {
            let conn = DatabaseConnection::new("sqlite::memory:").await.unwrap();
            conn.run_migrations().await.unwrap();
            let pool = conn.pool().clone();
            let flowchart_id = seed_fan_in_flowchart(&pool, 16).await;

            let scheduler = Scheduler::new(pool, EventLog::new(256), Arc::new(NoopDispatch), RuntimeContext::default());
            scheduler.run_flowchart(&flowchart_id).await.unwrap();
        });
    });
}

criterion_group!(benches, fan_in_admission_benchmark);
criterion_main!(benches);
