//! `flowchart_nodes` repository. `config`/`*_ids` columns are JSON text;
//! rows are mapped by hand since `sqlx::FromRow` has no JSON-column support.

use std::collections::HashMap;

use flowchart_core::model::{EdgeMode, FlowchartNode, NodeType};
use sqlx::Row;

use crate::connection::DatabasePool;
use crate::error::{Result, StoreError};

pub struct NodeRepository;

fn parse_node_type(s: &str) -> Result<NodeType> {
    match s {
        "start" => Ok(NodeType::Start),
        "end" => Ok(NodeType::End),
        "task" => Ok(NodeType::Task),
        "decision" => Ok(NodeType::Decision),
        "memory" => Ok(NodeType::Memory),
        "rag" => Ok(NodeType::Rag),
        "flowchart" => Ok(NodeType::Flowchart),
        "plan" => Ok(NodeType::Plan),
        "milestone" => Ok(NodeType::Milestone),
        other => Err(StoreError::NotFound(format!("unknown node_type '{other}'"))),
    }
}

fn row_to_node(row: sqlx::sqlite::SqliteRow) -> Result<FlowchartNode> {
    let node_type: String = row.get("node_type");
    let config_text: String = row.get("config");
    let config: HashMap<String, serde_json::Value> = serde_json::from_str(&config_text)?;

    let parse_ids = |col: &str| -> Result<Vec<String>> {
        let text: String = row.get(col);
        Ok(serde_json::from_str(&text)?)
    };

    Ok(FlowchartNode {
        id: row.get("id"),
        flowchart_id: row.get("flowchart_id"),
        node_type: parse_node_type(&node_type)?,
        ref_id: row.get("ref_id"),
        title: row.get("title"),
        x: row.get("x"),
        y: row.get("y"),
        config,
        model_id: row.get("model_id"),
        mcp_server_ids: parse_ids("mcp_server_ids")?,
        script_ids: parse_ids("script_ids")?,
        skill_ids: parse_ids("skill_ids")?,
        attachment_ids: parse_ids("attachment_ids")?,
    })
}

impl NodeRepository {
    pub async fn create(pool: &DatabasePool, node: &FlowchartNode) -> Result<FlowchartNode> {
        let row = sqlx::query(
            "INSERT INTO flowchart_nodes
                (id, flowchart_id, node_type, ref_id, title, x, y, config, model_id,
                 mcp_server_ids, script_ids, skill_ids, attachment_ids)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(&node.id)
        .bind(&node.flowchart_id)
        .bind(node.node_type.as_str())
        .bind(&node.ref_id)
        .bind(&node.title)
        .bind(node.x)
        .bind(node.y)
        .bind(serde_json::to_string(&node.config)?)
        .bind(&node.model_id)
        .bind(serde_json::to_string(&node.mcp_server_ids)?)
        .bind(serde_json::to_string(&node.script_ids)?)
        .bind(serde_json::to_string(&node.skill_ids)?)
        .bind(serde_json::to_string(&node.attachment_ids)?)
        .fetch_one(pool)
        .await?;
        row_to_node(row)
    }

    pub async fn get_by_id(pool: &DatabasePool, id: &str) -> Result<Option<FlowchartNode>> {
        let row = sqlx::query("SELECT * FROM flowchart_nodes WHERE id = ?").bind(id).fetch_optional(pool).await?;
        row.map(row_to_node).transpose()
    }

    pub async fn list_for_flowchart(pool: &DatabasePool, flowchart_id: &str) -> Result<Vec<FlowchartNode>> {
        let rows = sqlx::query("SELECT * FROM flowchart_nodes WHERE flowchart_id = ?")
            .bind(flowchart_id)
            .fetch_all(pool)
            .await?;
        rows.into_iter().map(row_to_node).collect()
    }

    pub async fn delete_for_flowchart(pool: &DatabasePool, flowchart_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM flowchart_nodes WHERE flowchart_id = ?").bind(flowchart_id).execute(pool).await?;
        Ok(())
    }
}

pub struct EdgeRepository;

fn row_to_edge(row: sqlx::sqlite::SqliteRow) -> Result<flowchart_core::model::FlowchartEdge> {
    let edge_mode: String = row.get("edge_mode");
    Ok(flowchart_core::model::FlowchartEdge {
        id: row.get("id"),
        flowchart_id: row.get("flowchart_id"),
        source_node_id: row.get("source_node_id"),
        target_node_id: row.get("target_node_id"),
        edge_mode: if edge_mode == "solid" { EdgeMode::Solid } else { EdgeMode::Dotted },
        condition_key: row.get("condition_key"),
        source_handle_id: row.get("source_handle_id"),
        target_handle_id: row.get("target_handle_id"),
        label: row.get("label"),
    })
}

impl EdgeRepository {
    pub async fn create(pool: &DatabasePool, edge: &flowchart_core::model::FlowchartEdge) -> Result<flowchart_core::model::FlowchartEdge> {
        let edge_mode = if edge.is_solid() { "solid" } else { "dotted" };
        let row = sqlx::query(
            "INSERT INTO flowchart_edges
                (id, flowchart_id, source_node_id, target_node_id, edge_mode, condition_key,
                 source_handle_id, target_handle_id, label)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(&edge.id)
        .bind(&edge.flowchart_id)
        .bind(&edge.source_node_id)
        .bind(&edge.target_node_id)
        .bind(edge_mode)
        .bind(&edge.condition_key)
        .bind(&edge.source_handle_id)
        .bind(&edge.target_handle_id)
        .bind(&edge.label)
        .fetch_one(pool)
        .await?;
        row_to_edge(row)
    }

    pub async fn list_for_flowchart(pool: &DatabasePool, flowchart_id: &str) -> Result<Vec<flowchart_core::model::FlowchartEdge>> {
        let rows = sqlx::query("SELECT * FROM flowchart_edges WHERE flowchart_id = ?")
            .bind(flowchart_id)
            .fetch_all(pool)
            .await?;
        rows.into_iter().map(row_to_edge).collect()
    }

    pub async fn delete_for_flowchart(pool: &DatabasePool, flowchart_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM flowchart_edges WHERE flowchart_id = ?").bind(flowchart_id).execute(pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::DatabaseConnection;
    use crate::repositories::flowchart_repo::FlowchartRepository;
    use flowchart_core::model::Flowchart;

    async fn setup() -> DatabasePool {
        let conn = DatabaseConnection::new("sqlite::memory:").await.unwrap();
        conn.run_migrations().await.unwrap();
        conn.pool().clone()
    }

    #[tokio::test]
    async fn node_roundtrip_preserves_config_and_ids() {
        let pool = setup().await;
        let flowchart = Flowchart::new("fc", 10);
        FlowchartRepository::create(&pool, &flowchart).await.unwrap();

        let mut node = FlowchartNode::new(&flowchart.id, NodeType::Task);
        node.config.insert("prompt".to_string(), serde_json::json!("say hi"));
        node.skill_ids.push("skill-1".to_string());

        NodeRepository::create(&pool, &node).await.unwrap();
        let fetched = NodeRepository::get_by_id(&pool, &node.id).await.unwrap().unwrap();
        assert_eq!(fetched.config_str("prompt"), Some("say hi"));
        assert_eq!(fetched.skill_ids, vec!["skill-1".to_string()]);
        assert_eq!(fetched.node_type, NodeType::Task);
    }

    #[tokio::test]
    async fn edge_roundtrip_preserves_mode() {
        let pool = setup().await;
        let flowchart = Flowchart::new("fc", 10);
        FlowchartRepository::create(&pool, &flowchart).await.unwrap();
        let edge = flowchart_core::model::FlowchartEdge::new(&flowchart.id, "n1", "n2", EdgeMode::Dotted);
        EdgeRepository::create(&pool, &edge).await.unwrap();
        let edges = EdgeRepository::list_for_flowchart(&pool, &flowchart.id).await.unwrap();
        assert_eq!(edges.len(), 1);
        assert!(!edges[0].is_solid());
    }
}
