//! Flowchart repository, grounded on `workflow_repo.rs`'s
//! static-method-over-pool style.

use chrono::Utc;
use flowchart_core::model::Flowchart;
use sqlx::Row;

use crate::connection::DatabasePool;
use crate::error::Result;

pub struct FlowchartRepository;

fn row_to_flowchart(row: sqlx::sqlite::SqliteRow) -> Flowchart {
    Flowchart {
        id: row.get("id"),
        name: row.get("name"),
        max_node_executions: row.get::<i64, _>("max_node_executions") as u32,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

impl FlowchartRepository {
    pub async fn create(pool: &DatabasePool, flowchart: &Flowchart) -> Result<Flowchart> {
        let row = sqlx::query(
            "INSERT INTO flowcharts (id, name, max_node_executions, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(&flowchart.id)
        .bind(&flowchart.name)
        .bind(flowchart.max_node_executions as i64)
        .bind(&flowchart.created_at)
        .bind(&flowchart.updated_at)
        .fetch_one(pool)
        .await?;
        Ok(row_to_flowchart(row))
    }

    pub async fn get_by_id(pool: &DatabasePool, id: &str) -> Result<Option<Flowchart>> {
        let row = sqlx::query("SELECT * FROM flowcharts WHERE id = ?").bind(id).fetch_optional(pool).await?;
        Ok(row.map(row_to_flowchart))
    }

    pub async fn list(pool: &DatabasePool) -> Result<Vec<Flowchart>> {
        let rows = sqlx::query("SELECT * FROM flowcharts ORDER BY created_at DESC").fetch_all(pool).await?;
        Ok(rows.into_iter().map(row_to_flowchart).collect())
    }

    pub async fn update_max_node_executions(pool: &DatabasePool, id: &str, max_node_executions: u32) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE flowcharts SET max_node_executions = ?, updated_at = ? WHERE id = ?")
            .bind(max_node_executions as i64)
            .bind(&now)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn delete(pool: &DatabasePool, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM flowcharts WHERE id = ?").bind(id).execute(pool).await?;
        Ok(())
    }
}
