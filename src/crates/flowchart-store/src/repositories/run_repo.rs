//! `flowchart_runs`/`flowchart_run_nodes` repositories.

use flowchart_core::model::{FlowchartRun, FlowchartRunNode, NodeRunStatus, RunStatus};
use sqlx::Row;

use crate::connection::DatabasePool;
use crate::error::{Result, StoreError};

pub struct RunRepository;

fn parse_run_status(s: &str) -> Result<RunStatus> {
    match s {
        "queued" => Ok(RunStatus::Queued),
        "running" => Ok(RunStatus::Running),
        "completed" => Ok(RunStatus::Completed),
        "failed" => Ok(RunStatus::Failed),
        "canceled" => Ok(RunStatus::Canceled),
        other => Err(StoreError::NotFound(format!("unknown run status '{other}'"))),
    }
}

fn row_to_run(row: sqlx::sqlite::SqliteRow) -> Result<FlowchartRun> {
    let status: String = row.get("status");
    Ok(FlowchartRun {
        id: row.get("id"),
        flowchart_id: row.get("flowchart_id"),
        status: parse_run_status(&status)?,
        started_at: row.get("started_at"),
        finished_at: row.get("finished_at"),
        error: row.get("error"),
    })
}

impl RunRepository {
    pub async fn create(pool: &DatabasePool, run: &FlowchartRun) -> Result<FlowchartRun> {
        let row = sqlx::query(
            "INSERT INTO flowchart_runs (id, flowchart_id, status, started_at, finished_at, error)
             VALUES (?, ?, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(&run.id)
        .bind(&run.flowchart_id)
        .bind(run.status.as_str())
        .bind(&run.started_at)
        .bind(&run.finished_at)
        .bind(&run.error)
        .fetch_one(pool)
        .await?;
        row_to_run(row)
    }

    pub async fn get_by_id(pool: &DatabasePool, id: &str) -> Result<Option<FlowchartRun>> {
        let row = sqlx::query("SELECT * FROM flowchart_runs WHERE id = ?").bind(id).fetch_optional(pool).await?;
        row.map(row_to_run).transpose()
    }

    /// Persists the in-memory transition produced by
    /// [`flowchart_core::model::FlowchartRun::transition`]; callers call
    /// `transition()` first so the terminal-state invariant is enforced
    /// before any row is written.
    pub async fn save(pool: &DatabasePool, run: &FlowchartRun) -> Result<()> {
        sqlx::query(
            "UPDATE flowchart_runs SET status = ?, started_at = ?, finished_at = ?, error = ? WHERE id = ?",
        )
        .bind(run.status.as_str())
        .bind(&run.started_at)
        .bind(&run.finished_at)
        .bind(&run.error)
        .bind(&run.id)
        .execute(pool)
        .await?;
        Ok(())
    }
}

pub struct RunNodeRepository;

fn parse_node_run_status(s: &str) -> Result<NodeRunStatus> {
    match s {
        "queued" => Ok(NodeRunStatus::Queued),
        "running" => Ok(NodeRunStatus::Running),
        "succeeded" => Ok(NodeRunStatus::Succeeded),
        "failed" => Ok(NodeRunStatus::Failed),
        "canceled" => Ok(NodeRunStatus::Canceled),
        other => Err(StoreError::NotFound(format!("unknown node run status '{other}'"))),
    }
}

fn row_to_run_node(row: sqlx::sqlite::SqliteRow) -> Result<FlowchartRunNode> {
    let status: String = row.get("status");
    let input_context: String = row.get("input_context");
    let output_state: String = row.get("output_state");
    let routing_state: String = row.get("routing_state");
    let runtime_evidence: String = row.get("runtime_evidence");
    Ok(FlowchartRunNode {
        id: row.get("id"),
        flowchart_run_id: row.get("flowchart_run_id"),
        flowchart_node_id: row.get("flowchart_node_id"),
        execution_index: row.get::<i64, _>("execution_index") as u32,
        status: parse_node_run_status(&status)?,
        input_context: serde_json::from_str(&input_context)?,
        output_state: serde_json::from_str(&output_state)?,
        routing_state: serde_json::from_str(&routing_state)?,
        provider_dispatch_id: row.get("provider_dispatch_id"),
        runtime_evidence: serde_json::from_str(&runtime_evidence)?,
        started_at: row.get("started_at"),
        finished_at: row.get("finished_at"),
        error: row.get("error"),
    })
}

impl RunNodeRepository {
    pub async fn create(pool: &DatabasePool, node: &FlowchartRunNode) -> Result<FlowchartRunNode> {
        let row = sqlx::query(
            "INSERT INTO flowchart_run_nodes
                (id, flowchart_run_id, flowchart_node_id, execution_index, status, input_context,
                 output_state, routing_state, provider_dispatch_id, runtime_evidence, started_at,
                 finished_at, error)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(&node.id)
        .bind(&node.flowchart_run_id)
        .bind(&node.flowchart_node_id)
        .bind(node.execution_index as i64)
        .bind(node.status.as_str())
        .bind(serde_json::to_string(&node.input_context)?)
        .bind(serde_json::to_string(&node.output_state)?)
        .bind(serde_json::to_string(&node.routing_state)?)
        .bind(&node.provider_dispatch_id)
        .bind(serde_json::to_string(&node.runtime_evidence)?)
        .bind(&node.started_at)
        .bind(&node.finished_at)
        .bind(&node.error)
        .fetch_one(pool)
        .await?;
        row_to_run_node(row)
    }

    pub async fn save(pool: &DatabasePool, node: &FlowchartRunNode) -> Result<()> {
        sqlx::query(
            "UPDATE flowchart_run_nodes SET status = ?, output_state = ?, routing_state = ?,
                provider_dispatch_id = ?, runtime_evidence = ?, started_at = ?, finished_at = ?, error = ?
             WHERE id = ?",
        )
        .bind(node.status.as_str())
        .bind(serde_json::to_string(&node.output_state)?)
        .bind(serde_json::to_string(&node.routing_state)?)
        .bind(&node.provider_dispatch_id)
        .bind(serde_json::to_string(&node.runtime_evidence)?)
        .bind(&node.started_at)
        .bind(&node.finished_at)
        .bind(&node.error)
        .bind(&node.id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Count of executions already recorded for `flowchart_node_id` within
    /// `flowchart_run_id`, used to enforce `max_node_executions` before a
    /// new [`FlowchartRunNode`] with the next `execution_index` is created.
    pub async fn execution_count(pool: &DatabasePool, flowchart_run_id: &str, flowchart_node_id: &str) -> Result<u32> {
        let row = sqlx::query(
            "SELECT COUNT(*) as n FROM flowchart_run_nodes WHERE flowchart_run_id = ? AND flowchart_node_id = ?",
        )
        .bind(flowchart_run_id)
        .bind(flowchart_node_id)
        .fetch_one(pool)
        .await?;
        Ok(row.get::<i64, _>("n") as u32)
    }

    pub async fn list_for_run(pool: &DatabasePool, flowchart_run_id: &str) -> Result<Vec<FlowchartRunNode>> {
        let rows = sqlx::query("SELECT * FROM flowchart_run_nodes WHERE flowchart_run_id = ? ORDER BY execution_index")
            .bind(flowchart_run_id)
            .fetch_all(pool)
            .await?;
        rows.into_iter().map(row_to_run_node).collect()
    }

    /// Latest successful run node for a given node id, used by
    /// `LatestOutputLookup` in `node-engine` for context-pull (dotted edge)
    /// resolution.
    pub async fn latest_succeeded(pool: &DatabasePool, flowchart_run_id: &str, flowchart_node_id: &str) -> Result<Option<FlowchartRunNode>> {
        let row = sqlx::query(
            "SELECT * FROM flowchart_run_nodes
             WHERE flowchart_run_id = ? AND flowchart_node_id = ? AND status = 'succeeded'
             ORDER BY execution_index DESC LIMIT 1",
        )
        .bind(flowchart_run_id)
        .bind(flowchart_node_id)
        .fetch_optional(pool)
        .await?;
        row.map(row_to_run_node).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::DatabaseConnection;
    use crate::repositories::flowchart_repo::FlowchartRepository;
    use flowchart_core::model::Flowchart;

    async fn setup() -> (DatabasePool, FlowchartRun) {
        let conn = DatabaseConnection::new("sqlite::memory:").await.unwrap();
        conn.run_migrations().await.unwrap();
        let pool = conn.pool().clone();
        let flowchart = Flowchart::new("fc", 10);
        FlowchartRepository::create(&pool, &flowchart).await.unwrap();
        let mut run = FlowchartRun::new(&flowchart.id);
        run.transition(RunStatus::Running).unwrap();
        RunRepository::create(&pool, &run).await.unwrap();
        (pool, run)
    }

    #[tokio::test]
    async fn run_node_execution_count_tracks_loop_guardrail() {
        let (pool, run) = setup().await;
        for i in 0..3 {
            let node = FlowchartRunNode::new(&run.id, "node-1", i);
            RunNodeRepository::create(&pool, &node).await.unwrap();
        }
        let count = RunNodeRepository::execution_count(&pool, &run.id, "node-1").await.unwrap();
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn latest_succeeded_picks_highest_execution_index() {
        let (pool, run) = setup().await;
        let mut first = FlowchartRunNode::new(&run.id, "node-1", 0);
        first.transition(NodeRunStatus::Running).unwrap();
        first.transition(NodeRunStatus::Succeeded).unwrap();
        RunNodeRepository::create(&pool, &first).await.unwrap();

        let mut second = FlowchartRunNode::new(&run.id, "node-1", 1);
        second.transition(NodeRunStatus::Running).unwrap();
        second.transition(NodeRunStatus::Succeeded).unwrap();
        second.output_state = serde_json::json!({"v": 2});
        RunNodeRepository::create(&pool, &second).await.unwrap();

        let latest = RunNodeRepository::latest_succeeded(&pool, &run.id, "node-1").await.unwrap().unwrap();
        assert_eq!(latest.execution_index, 1);
    }
}
