//! `query(question, collections[], top_k, request_id, runtime_kind, run_context?)`,
//! ported from `contracts.py::execute_query_contract`.
//!
//! The embedding/vector-store backend is treated as opaque: the actual
//! client lives outside this crate entirely. This module only defines
//! the contract the backend must satisfy
//! ([`RetrievalBackend`]) and the envelope shaping around it: the split
//! between **retrieval context** (feeds the prompt) and **citation
//! records** (audit-only, never shown to the model).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::collections::{normalize_collection_selection, resolve_sources_for_collections};
use crate::error::{RagContractError, Result, REASON_RETRIEVAL_EXECUTION_FAILED, REASON_UNAVAILABLE_FOR_SELECTED_COLLECTIONS};
use crate::health::{RagHealthSnapshot, RAG_PROVIDER};
use crate::model::{RagSource, RuntimeKind};

/// One chunk returned by the backend for a single collection query.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub text: String,
    pub collection: String,
    pub source_id: Option<String>,
    pub path: Option<String>,
    pub chunk_id: Option<String>,
    pub score: Option<f64>,
}

/// The opaque embedding/vector-store client contract. Implementations
/// live outside this crate entirely.
#[async_trait]
pub trait RetrievalBackend: Send + Sync {
    async fn query_collections(&self, question: &str, sources: &[RagSource], top_k: u32) -> Result<Vec<RetrievedChunk>>;
}

/// Optional post-retrieval synthesis step. Failure is non-fatal: reported
/// via `synthesis_error` while context and stats are still returned.
#[async_trait]
pub trait AnswerSynthesizer: Send + Sync {
    async fn synthesize(&self, question: &str, context: &[ContextRow]) -> std::result::Result<String, String>;
}

/// Feeds the prompt: rank + text + collection + path only. No score, no
/// chunk id, no snippet — those live only in [`CitationRecord`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextRow {
    pub rank: u32,
    pub text: String,
    pub collection: Option<String>,
    pub path: Option<String>,
}

/// Audit-only: full metadata including source_id, chunk_id, score, and a
/// 1200-char snippet (`contracts.py` truncates the same way).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CitationRecord {
    pub provider: String,
    pub collection: Option<String>,
    pub source_id: Option<String>,
    pub path: Option<String>,
    pub chunk_id: Option<String>,
    pub score: Option<f64>,
    pub snippet: String,
    pub retrieval_rank: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisError {
    pub message: String,
    pub kind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalStats {
    pub provider: String,
    pub top_k: u32,
    pub retrieved_count: usize,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub answer: Option<String>,
    pub retrieval_context: Vec<ContextRow>,
    pub retrieval_stats: RetrievalStats,
    pub synthesis_error: Option<SynthesisError>,
    pub mode: String,
    pub collections: Vec<String>,
    /// Audit-only rows, one per retrieved chunk. The caller persists these
    /// as `RagRetrievalAudit` rows (`flowchart-store` owns the write path).
    #[serde(skip)]
    pub citations: Vec<CitationRecord>,
}

pub struct QueryRequest<'a> {
    pub question: &'a str,
    pub collections: &'a [String],
    pub top_k: u32,
    pub request_id: Option<String>,
    pub runtime_kind: RuntimeKind,
}

const SNIPPET_CHARS: usize = 1200;

fn snippet_of(text: &str) -> String {
    if text.chars().count() <= SNIPPET_CHARS {
        text.to_string()
    } else {
        text.chars().take(SNIPPET_CHARS).collect()
    }
}

/// `query()`. `now_ms` is supplied by the caller (elapsed-time stamping
/// happens outside this I/O-free crate, consistent with §B's ban on
/// in-script wall-clock calls carrying over into deterministic callers).
pub async fn query(
    req: QueryRequest<'_>,
    health: &RagHealthSnapshot,
    known_sources: &[RagSource],
    backend: &dyn RetrievalBackend,
    synthesizer: Option<&dyn AnswerSynthesizer>,
    elapsed_ms: u64,
) -> Result<QueryResponse> {
    let selected = normalize_collection_selection(
        &req.collections.iter().map(|c| serde_json::Value::String(c.clone())).collect::<Vec<_>>(),
    );

    if !selected.is_empty() && !health.is_healthy() {
        return Err(RagContractError::new(
            REASON_UNAVAILABLE_FOR_SELECTED_COLLECTIONS,
            503,
            "RAG is unavailable for selected collections.",
        )
        .with_metadata(serde_json::json!({
            "rag_health_state": health.state,
            "selected_collections": selected,
            "provider": RAG_PROVIDER,
        })));
    }

    let (sources, missing) = resolve_sources_for_collections(known_sources, &selected);
    if !missing.is_empty() {
        return Err(RagContractError::new(
            REASON_UNAVAILABLE_FOR_SELECTED_COLLECTIONS,
            400,
            "One or more selected collections are not available.",
        )
        .with_metadata(serde_json::json!({
            "rag_health_state": health.state,
            "selected_collections": selected,
            "provider": RAG_PROVIDER,
            "missing_collections": missing,
        })));
    }

    let top_k = req.top_k.max(1);
    let mut context_rows = Vec::new();
    let mut citations = Vec::new();

    if !selected.is_empty() {
        let chunks = backend
            .query_collections(req.question, &sources, top_k)
            .await
            .map_err(|e| RagContractError::new(REASON_RETRIEVAL_EXECUTION_FAILED, 500, format!("RAG retrieval execution failed: {e}")))?;

        for (idx, chunk) in chunks.into_iter().enumerate() {
            let text = chunk.text.trim().to_string();
            if text.is_empty() {
                continue;
            }
            let rank = (idx + 1) as u32;
            context_rows.push(ContextRow {
                rank,
                text: text.clone(),
                collection: Some(chunk.collection.clone()).filter(|c| !c.is_empty()),
                path: chunk.path.clone(),
            });
            citations.push(CitationRecord {
                provider: RAG_PROVIDER.to_string(),
                collection: Some(chunk.collection).filter(|c| !c.is_empty()),
                source_id: chunk.source_id,
                path: chunk.path,
                chunk_id: chunk.chunk_id,
                score: chunk.score,
                snippet: snippet_of(&text),
                retrieval_rank: rank,
            });
        }
    }

    let mut answer = None;
    let mut synthesis_error = None;
    if let Some(synth) = synthesizer {
        match synth.synthesize(req.question, &context_rows).await {
            Ok(a) => answer = Some(a),
            Err(message) => synthesis_error = Some(SynthesisError { message, kind: "synthesis_error".to_string() }),
        }
    }

    Ok(QueryResponse {
        answer,
        retrieval_stats: RetrievalStats {
            provider: RAG_PROVIDER.to_string(),
            top_k,
            retrieved_count: context_rows.len(),
            elapsed_ms,
        },
        retrieval_context: context_rows,
        synthesis_error,
        mode: "query".to_string(),
        collections: selected,
        citations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::RagHealthState;

    fn healthy() -> RagHealthSnapshot {
        RagHealthSnapshot {
            state: RagHealthState::ConfiguredHealthy,
            provider: RAG_PROVIDER.to_string(),
            host: "chroma".into(),
            port: Some(8000),
            configured: true,
            healthy: true,
            timeout_seconds: 2.0,
            error: None,
        }
    }

    fn unhealthy() -> RagHealthSnapshot {
        let mut snap = healthy();
        snap.state = RagHealthState::ConfiguredUnhealthy;
        snap.healthy = false;
        snap
    }

    fn source(collection: &str) -> RagSource {
        RagSource {
            id: "src-1".into(),
            name: "docs".into(),
            kind: crate::model::SourceKind::Directory,
            collection: collection.to_string(),
            local_path: Some("/data".into()),
            drive_folder_id: None,
            last_indexed_at: Some("2026-01-01T00:00:00Z".into()),
            last_error: None,
            indexed_file_count: 1,
            indexed_chunk_count: 1,
            indexed_file_types: serde_json::json!({}),
        }
    }

    struct FakeBackend(Vec<RetrievedChunk>);

    #[async_trait]
    impl RetrievalBackend for FakeBackend {
        async fn query_collections(&self, _q: &str, _s: &[RagSource], _k: u32) -> Result<Vec<RetrievedChunk>> {
            Ok(self.0.clone())
        }
    }

    impl Clone for RetrievedChunk {
        fn clone(&self) -> Self {
            Self {
                text: self.text.clone(),
                collection: self.collection.clone(),
                source_id: self.source_id.clone(),
                path: self.path.clone(),
                chunk_id: self.chunk_id.clone(),
                score: self.score,
            }
        }
    }

    #[tokio::test]
    async fn unhealthy_with_selected_collections_errors() {
        let health = unhealthy();
        let req = QueryRequest { question: "q", collections: &["docs".to_string()], top_k: 3, request_id: None, runtime_kind: RuntimeKind::Flowchart };
        let result = query(req, &health, &[source("docs")], &FakeBackend(vec![]), None, 1).await;
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().reason_code, REASON_UNAVAILABLE_FOR_SELECTED_COLLECTIONS);
    }

    #[tokio::test]
    async fn unknown_collection_errors() {
        let health = healthy();
        let req = QueryRequest { question: "q", collections: &["missing".to_string()], top_k: 3, request_id: None, runtime_kind: RuntimeKind::Flowchart };
        let result = query(req, &health, &[source("docs")], &FakeBackend(vec![]), None, 1).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn context_rows_omit_snippet_and_score() {
        let health = healthy();
        let chunk = RetrievedChunk { text: "hello world".into(), collection: "docs".into(), source_id: Some("src-1".into()), path: Some("a.md".into()), chunk_id: Some("c1".into()), score: Some(0.9) };
        let req = QueryRequest { question: "q", collections: &["docs".to_string()], top_k: 3, request_id: None, runtime_kind: RuntimeKind::Flowchart };
        let resp = query(req, &health, &[source("docs")], &FakeBackend(vec![chunk]), None, 5).await.unwrap();
        assert_eq!(resp.retrieval_context.len(), 1);
        assert_eq!(resp.citations.len(), 1);
        assert_eq!(resp.citations[0].score, Some(0.9));
        assert_eq!(resp.citations[0].snippet, "hello world");
    }

    #[tokio::test]
    async fn synthesis_failure_is_non_fatal() {
        struct FailingSynth;
        #[async_trait]
        impl AnswerSynthesizer for FailingSynth {
            async fn synthesize(&self, _q: &str, _rows: &[ContextRow]) -> std::result::Result<String, String> {
                Err("provider down".to_string())
            }
        }
        let health = healthy();
        let req = QueryRequest { question: "q", collections: &["docs".to_string()], top_k: 3, request_id: None, runtime_kind: RuntimeKind::Flowchart };
        let resp = query(req, &health, &[source("docs")], &FakeBackend(vec![]), Some(&FailingSynth), 1).await.unwrap();
        assert!(resp.answer.is_none());
        assert!(resp.synthesis_error.is_some());
        assert_eq!(resp.retrieval_stats.retrieved_count, 0);
    }
}
