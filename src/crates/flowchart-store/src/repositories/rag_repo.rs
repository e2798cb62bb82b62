//! `rag_sources`/`rag_source_file_states`/`rag_retrieval_audit` repositories.

use chrono::Utc;
use rag_contract::{RagRetrievalAudit, RagSource, RuntimeKind, SourceFileState, SourceKind};
use sqlx::Row;
use uuid::Uuid;

use crate::connection::DatabasePool;
use crate::error::{Result, StoreError};

pub struct RagSourceRepository;

fn parse_source_kind(s: &str) -> Result<SourceKind> {
    match s {
        "directory" => Ok(SourceKind::Directory),
        "github" => Ok(SourceKind::Github),
        "google_drive" => Ok(SourceKind::GoogleDrive),
        other => Err(StoreError::NotFound(format!("unknown source kind '{other}'"))),
    }
}

fn source_kind_str(kind: &SourceKind) -> &'static str {
    match kind {
        SourceKind::Directory => "directory",
        SourceKind::Github => "github",
        SourceKind::GoogleDrive => "google_drive",
    }
}

fn row_to_source(row: sqlx::sqlite::SqliteRow) -> Result<RagSource> {
    let kind: String = row.get("kind");
    let indexed_file_types: String = row.get("indexed_file_types");
    Ok(RagSource {
        id: row.get("id"),
        name: row.get("name"),
        kind: parse_source_kind(&kind)?,
        collection: row.get("collection"),
        local_path: row.get("local_path"),
        drive_folder_id: row.get("drive_folder_id"),
        last_indexed_at: row.get("last_indexed_at"),
        last_error: row.get("last_error"),
        indexed_file_count: row.get::<i64, _>("indexed_file_count") as u64,
        indexed_chunk_count: row.get::<i64, _>("indexed_chunk_count") as u64,
        indexed_file_types: serde_json::from_str(&indexed_file_types)?,
    })
}

impl RagSourceRepository {
    pub async fn create(pool: &DatabasePool, source: &RagSource) -> Result<RagSource> {
        let row = sqlx::query(
            "INSERT INTO rag_sources
                (id, name, kind, collection, local_path, drive_folder_id, last_indexed_at,
                 last_error, indexed_file_count, indexed_chunk_count, indexed_file_types)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(&source.id)
        .bind(&source.name)
        .bind(source_kind_str(&source.kind))
        .bind(&source.collection)
        .bind(&source.local_path)
        .bind(&source.drive_folder_id)
        .bind(&source.last_indexed_at)
        .bind(&source.last_error)
        .bind(source.indexed_file_count as i64)
        .bind(source.indexed_chunk_count as i64)
        .bind(serde_json::to_string(&source.indexed_file_types)?)
        .fetch_one(pool)
        .await?;
        row_to_source(row)
    }

    pub async fn list(pool: &DatabasePool) -> Result<Vec<RagSource>> {
        let rows = sqlx::query("SELECT * FROM rag_sources ORDER BY name").fetch_all(pool).await?;
        rows.into_iter().map(row_to_source).collect()
    }

    pub async fn update_index_outcome(
        pool: &DatabasePool,
        id: &str,
        last_error: Option<&str>,
        indexed_file_count: u64,
        indexed_chunk_count: u64,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "UPDATE rag_sources
             SET last_indexed_at = ?, last_error = ?, indexed_file_count = ?, indexed_chunk_count = ?
             WHERE id = ?",
        )
        .bind(&now)
        .bind(last_error)
        .bind(indexed_file_count as i64)
        .bind(indexed_chunk_count as i64)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn file_states(pool: &DatabasePool, source_id: &str) -> Result<Vec<SourceFileState>> {
        let rows = sqlx::query("SELECT * FROM rag_source_file_states WHERE source_id = ?")
            .bind(source_id)
            .fetch_all(pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| SourceFileState {
                path: row.get("path"),
                fingerprint: row.get("fingerprint"),
                indexed: row.get::<i64, _>("indexed") != 0,
                doc_type: row.get("doc_type"),
                chunk_count: row.get::<i64, _>("chunk_count") as u64,
            })
            .collect())
    }

    pub async fn upsert_file_state(pool: &DatabasePool, source_id: &str, state: &SourceFileState) -> Result<()> {
        sqlx::query(
            "INSERT INTO rag_source_file_states (source_id, path, fingerprint, indexed, doc_type, chunk_count)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(source_id, path) DO UPDATE SET
                fingerprint = excluded.fingerprint, indexed = excluded.indexed,
                doc_type = excluded.doc_type, chunk_count = excluded.chunk_count",
        )
        .bind(source_id)
        .bind(&state.path)
        .bind(&state.fingerprint)
        .bind(state.indexed as i64)
        .bind(&state.doc_type)
        .bind(state.chunk_count as i64)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn delete_file_states(pool: &DatabasePool, source_id: &str, paths: &[String]) -> Result<()> {
        for path in paths {
            sqlx::query("DELETE FROM rag_source_file_states WHERE source_id = ? AND path = ?")
                .bind(source_id)
                .bind(path)
                .execute(pool)
                .await?;
        }
        Ok(())
    }

    pub async fn replace_all_file_states(pool: &DatabasePool, source_id: &str, states: &[SourceFileState]) -> Result<()> {
        sqlx::query("DELETE FROM rag_source_file_states WHERE source_id = ?").bind(source_id).execute(pool).await?;
        for state in states {
            Self::upsert_file_state(pool, source_id, state).await?;
        }
        Ok(())
    }
}

pub struct RagAuditRepository;

fn runtime_kind_str(kind: &RuntimeKind) -> &'static str {
    match kind {
        RuntimeKind::Chat => "chat",
        RuntimeKind::Flowchart => "flowchart",
    }
}

impl RagAuditRepository {
    /// Persists one audit row per retrieved chunk, bound to
    /// `(runtime_kind, request_id, flowchart_run_id?, flowchart_node_run_id?)`.
    pub async fn create(pool: &DatabasePool, audit: &RagRetrievalAudit) -> Result<()> {
        let id = if audit.id.is_empty() { Uuid::new_v4().to_string() } else { audit.id.clone() };
        let created_at = if audit.created_at.is_empty() { Utc::now().to_rfc3339() } else { audit.created_at.clone() };
        sqlx::query(
            "INSERT INTO rag_retrieval_audit
                (id, request_id, runtime_kind, flowchart_run_id, flowchart_node_run_id, provider,
                 collection, source_id, path, chunk_id, score, snippet, retrieval_rank, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&audit.request_id)
        .bind(runtime_kind_str(&audit.runtime_kind))
        .bind(&audit.flowchart_run_id)
        .bind(&audit.flowchart_node_run_id)
        .bind(&audit.provider)
        .bind(&audit.collection)
        .bind(&audit.source_id)
        .bind(&audit.path)
        .bind(&audit.chunk_id)
        .bind(audit.score)
        .bind(&audit.snippet)
        .bind(audit.retrieval_rank as i64)
        .bind(&created_at)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn list_for_run(pool: &DatabasePool, flowchart_run_id: &str) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) as n FROM rag_retrieval_audit WHERE flowchart_run_id = ?")
            .bind(flowchart_run_id)
            .fetch_one(pool)
            .await?;
        Ok(row.get("n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::DatabaseConnection;

    async fn setup() -> DatabasePool {
        let conn = DatabaseConnection::new("sqlite::memory:").await.unwrap();
        conn.run_migrations().await.unwrap();
        conn.pool().clone()
    }

    fn source() -> RagSource {
        RagSource {
            id: Uuid::new_v4().to_string(),
            name: "docs".into(),
            kind: SourceKind::Directory,
            collection: "docs".into(),
            local_path: Some("/data".into()),
            drive_folder_id: None,
            last_indexed_at: None,
            last_error: None,
            indexed_file_count: 0,
            indexed_chunk_count: 0,
            indexed_file_types: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn file_state_upsert_then_delete() {
        let pool = setup().await;
        let source = source();
        RagSourceRepository::create(&pool, &source).await.unwrap();

        let state = SourceFileState { path: "a.md".into(), fingerprint: "sha256:abc".into(), indexed: true, doc_type: None, chunk_count: 2 };
        RagSourceRepository::upsert_file_state(&pool, &source.id, &state).await.unwrap();
        assert_eq!(RagSourceRepository::file_states(&pool, &source.id).await.unwrap().len(), 1);

        RagSourceRepository::delete_file_states(&pool, &source.id, &["a.md".to_string()]).await.unwrap();
        assert!(RagSourceRepository::file_states(&pool, &source.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn audit_row_persists() {
        let pool = setup().await;
        let audit = RagRetrievalAudit {
            id: String::new(),
            request_id: Some("req-1".into()),
            runtime_kind: RuntimeKind::Flowchart,
            flowchart_run_id: Some("run-1".into()),
            flowchart_node_run_id: Some("rn-1".into()),
            provider: "chroma".into(),
            collection: Some("docs".into()),
            source_id: Some("src-1".into()),
            path: Some("a.md".into()),
            chunk_id: Some("c1".into()),
            score: Some(0.5),
            snippet: Some("hello".into()),
            retrieval_rank: 1,
            created_at: String::new(),
        };
        RagAuditRepository::create(&pool, &audit).await.unwrap();
        assert_eq!(RagAuditRepository::list_for_run(&pool, "run-1").await.unwrap(), 1);
    }
}
