//! The append-only run event log (C1): a tagged event enum routed to a
//! per-room broadcast channel, persisted before it is broadcast so a
//! subscriber that misses the live feed can replay history.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::Row;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::connection::DatabasePool;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventPriority {
    Low = 0,
    Normal = 1,
    High = 2,
}

/// Contract event classes, tagged on the wire as
/// `{"type": "...", "data": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum RunEvent {
    #[serde(rename = "node.task.created")]
    NodeTaskCreated { flowchart_run_node_id: String, flowchart_node_id: String },

    #[serde(rename = "node.task.updated")]
    NodeTaskUpdated { flowchart_run_node_id: String, status: String },

    #[serde(rename = "node.task.completed")]
    NodeTaskCompleted { flowchart_run_node_id: String, status: String },

    #[serde(rename = "flowchart_run.node.updated")]
    FlowchartRunNodeUpdated { flowchart_run_id: String, flowchart_run_node_id: String, status: String },

    #[serde(rename = "flowchart_run.completed")]
    FlowchartRunCompleted { flowchart_run_id: String, status: String },

    #[serde(rename = "chat.turn.requested")]
    ChatTurnRequested { thread_id: String, request_id: String },

    #[serde(rename = "chat.turn.responded")]
    ChatTurnResponded { thread_id: String, request_id: String },

    #[serde(rename = "chat.turn.failed")]
    ChatTurnFailed { thread_id: String, request_id: String, error: String },

    #[serde(rename = "rag.retrieval.used")]
    RagRetrievalUsed { request_id: Option<String>, collection: Option<String>, retrieved_count: usize },
}

impl RunEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            RunEvent::NodeTaskCreated { .. } => "node.task.created",
            RunEvent::NodeTaskUpdated { .. } => "node.task.updated",
            RunEvent::NodeTaskCompleted { .. } => "node.task.completed",
            RunEvent::FlowchartRunNodeUpdated { .. } => "flowchart_run.node.updated",
            RunEvent::FlowchartRunCompleted { .. } => "flowchart_run.completed",
            RunEvent::ChatTurnRequested { .. } => "chat.turn.requested",
            RunEvent::ChatTurnResponded { .. } => "chat.turn.responded",
            RunEvent::ChatTurnFailed { .. } => "chat.turn.failed",
            RunEvent::RagRetrievalUsed { .. } => "rag.retrieval.used",
        }
    }

    pub fn priority(&self) -> EventPriority {
        match self {
            RunEvent::ChatTurnFailed { .. } | RunEvent::FlowchartRunCompleted { .. } => EventPriority::High,
            RunEvent::NodeTaskCompleted { .. } | RunEvent::FlowchartRunNodeUpdated { .. } | RunEvent::ChatTurnResponded { .. } => {
                EventPriority::Normal
            }
            _ => EventPriority::Low,
        }
    }

    /// `task:<id>`, `thread:<id>`, or `flowchart_run:<id>` — the channel a
    /// subscriber filters on.
    pub fn room(&self) -> String {
        match self {
            RunEvent::NodeTaskCreated { flowchart_run_node_id, .. }
            | RunEvent::NodeTaskUpdated { flowchart_run_node_id, .. }
            | RunEvent::NodeTaskCompleted { flowchart_run_node_id, .. } => format!("task:{flowchart_run_node_id}"),
            RunEvent::FlowchartRunNodeUpdated { flowchart_run_id, .. } | RunEvent::FlowchartRunCompleted { flowchart_run_id, .. } => {
                format!("flowchart_run:{flowchart_run_id}")
            }
            RunEvent::ChatTurnRequested { thread_id, .. }
            | RunEvent::ChatTurnResponded { thread_id, .. }
            | RunEvent::ChatTurnFailed { thread_id, .. } => format!("thread:{thread_id}"),
            RunEvent::RagRetrievalUsed { .. } => "rag:retrieval".to_string(),
        }
    }

    pub fn to_json_value(&self) -> std::result::Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

/// One persisted row plus the room it was routed to.
#[derive(Debug, Clone)]
pub struct RunEventRecord {
    pub id: String,
    pub flowchart_run_id: String,
    pub event: RunEvent,
    pub room: String,
    pub created_at: String,
}

/// Persist-before-broadcast event log: a subscriber that misses the live
/// broadcast can always reconstruct history from `flowchart_run_events`.
#[derive(Clone)]
pub struct EventLog {
    sender: broadcast::Sender<RunEventRecord>,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEventRecord> {
        self.sender.subscribe()
    }

    /// Writes the event row first, then broadcasts. A broadcast with no
    /// subscribers is not an error (`send` failing just means nobody's
    /// listening right now).
    pub async fn emit(&self, pool: &DatabasePool, flowchart_run_id: &str, event: RunEvent) -> Result<RunEventRecord> {
        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now().to_rfc3339();
        let room = event.room();
        let payload = event.to_json_value()?;

        sqlx::query(
            "INSERT INTO flowchart_run_events (id, flowchart_run_id, event_type, room, payload, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(flowchart_run_id)
        .bind(event.event_type())
        .bind(&room)
        .bind(serde_json::to_string(&payload)?)
        .bind(&created_at)
        .execute(pool)
        .await?;

        let record = RunEventRecord { id, flowchart_run_id: flowchart_run_id.to_string(), event, room, created_at };
        let _ = self.sender.send(record.clone());
        Ok(record)
    }

    pub async fn history(pool: &DatabasePool, flowchart_run_id: &str) -> Result<Vec<(String, String, Value)>> {
        let rows = sqlx::query(
            "SELECT event_type, payload, created_at FROM flowchart_run_events
             WHERE flowchart_run_id = ? ORDER BY created_at",
        )
        .bind(flowchart_run_id)
        .fetch_all(pool)
        .await?;
        rows.into_iter()
            .map(|row| -> Result<(String, String, Value)> {
                let payload: String = row.get("payload");
                Ok((row.get("event_type"), row.get("created_at"), serde_json::from_str(&payload)?))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::DatabaseConnection;

    #[tokio::test]
    async fn emit_persists_then_broadcasts() {
        let conn = DatabaseConnection::new("sqlite::memory:").await.unwrap();
        conn.run_migrations().await.unwrap();
        let pool = conn.pool().clone();

        let log = EventLog::new(16);
        let mut rx = log.subscribe();

        log.emit(
            &pool,
            "run-1",
            RunEvent::FlowchartRunNodeUpdated { flowchart_run_id: "run-1".into(), flowchart_run_node_id: "rn-1".into(), status: "running".into() },
        )
        .await
        .unwrap();

        let received = rx.try_recv().unwrap();
        assert_eq!(received.room, "flowchart_run:run-1");

        let history = EventLog::history(&pool, "run-1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].0, "flowchart_run.node.updated");
    }

    #[test]
    fn failure_events_are_high_priority() {
        let event = RunEvent::ChatTurnFailed { thread_id: "t1".into(), request_id: "r1".into(), error: "boom".into() };
        assert_eq!(event.priority(), EventPriority::High);
        assert_eq!(event.room(), "thread:t1");
    }
}
