//! `rag` node: dispatches `mode: query | fresh_index | delta_index` into
//! `rag_contract::query`/`rag_contract::run_index`. This handler owns no
//! persistence of its own — source lists, file states, and audit rows
//! are supplied and persisted by the caller through the injected
//! providers, mirroring the split between `rag-contract` (shaping) and
//! `flowchart-store` (storage).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use rag_contract::{
    query as run_query, resolve_sources_for_collections, run_index, AnswerSynthesizer, IndexMode, IndexingBackend,
    QueryRequest, RagHealthSnapshot, RagSource, RetrievalBackend, RuntimeKind, SourceFile, SourceFileProvider,
    SourceFileState,
};

use crate::error::Result;
use crate::handler::{envelope, NodeHandler, NodeHandlerOutput, NodeHandlerRequest};

/// Fetches the data `rag_contract::query`/`run_index` need but doesn't
/// own: the health snapshot, the known source registry, and (for delta
/// indexing) each source's previously persisted file states.
#[async_trait]
pub trait RagSourceDirectory: Send + Sync {
    async fn health(&self) -> RagHealthSnapshot;
    async fn known_sources(&self) -> Result<Vec<RagSource>>;
    async fn existing_states(&self, source_id: &str) -> Result<Vec<SourceFileState>>;
}

pub struct RagHandler {
    directory: Arc<dyn RagSourceDirectory>,
    retrieval_backend: Arc<dyn RetrievalBackend>,
    synthesizer: Option<Arc<dyn AnswerSynthesizer>>,
    file_provider: Arc<dyn SourceFileProvider>,
    indexing_backend: Arc<dyn IndexingBackend>,
}

impl RagHandler {
    pub fn new(
        directory: Arc<dyn RagSourceDirectory>,
        retrieval_backend: Arc<dyn RetrievalBackend>,
        synthesizer: Option<Arc<dyn AnswerSynthesizer>>,
        file_provider: Arc<dyn SourceFileProvider>,
        indexing_backend: Arc<dyn IndexingBackend>,
    ) -> Self {
        Self { directory, retrieval_backend, synthesizer, file_provider, indexing_backend }
    }

    async fn run_query_mode(&self, req: &NodeHandlerRequest<'_>) -> Result<serde_json::Value> {
        let question = req.config_str("query").unwrap_or_default();
        let collections = req.config_str_vec("collections");
        let top_k = req.config_u64("top_k").unwrap_or(5) as u32;
        let health = self.directory.health().await;
        let known_sources = self.directory.known_sources().await?;

        let started = Utc::now();
        let response = run_query(
            QueryRequest { question, collections: &collections, top_k, request_id: Some(req.execution_id.to_string()), runtime_kind: RuntimeKind::Flowchart },
            &health,
            &known_sources,
            self.retrieval_backend.as_ref(),
            self.synthesizer.as_deref(),
            Utc::now().signed_duration_since(started).num_milliseconds().max(0) as u64,
        )
        .await?;

        Ok(json!({
            "answer": response.answer,
            "retrieval_context": response.retrieval_context,
            "retrieval_stats": response.retrieval_stats,
            "synthesis_error": response.synthesis_error,
            "citations_count": response.citations.len(),
        }))
    }

    async fn run_index_mode(&self, req: &NodeHandlerRequest<'_>, mode: IndexMode) -> Result<serde_json::Value> {
        let collections = req.config_str_vec("collections");
        let health = self.directory.health().await;
        let known_sources = self.directory.known_sources().await?;
        let now = Utc::now().to_rfc3339();

        // `run_index`'s closures are synchronous; the async file listing
        // and state lookups are pre-fetched into owned maps keyed by
        // source id before the call.
        let mut files_by_source: std::collections::HashMap<String, Vec<SourceFile>> = std::collections::HashMap::new();
        let mut states_by_source: std::collections::HashMap<String, Vec<SourceFileState>> = std::collections::HashMap::new();
        let (sources, _missing) = resolve_sources_for_collections(&known_sources, &collections);
        for source in &sources {
            let files = self.file_provider.list_files(source).await?;
            files_by_source.insert(source.id.clone(), files);
            let states = self.directory.existing_states(&source.id).await?;
            states_by_source.insert(source.id.clone(), states);
        }

        let outcome = run_index(
            mode,
            &collections,
            &known_sources,
            &health,
            |source| files_by_source.get(&source.id).cloned().unwrap_or_default(),
            |source_id| states_by_source.get(source_id).cloned().unwrap_or_default(),
            self.indexing_backend.as_ref(),
            &now,
        )
        .await?;

        Ok(serde_json::to_value(outcome)?)
    }
}

#[async_trait]
impl NodeHandler for RagHandler {
    async fn handle(&self, req: NodeHandlerRequest<'_>) -> Result<NodeHandlerOutput> {
        let mode = req.config_str("mode").unwrap_or("query");
        let result = match mode {
            "fresh_index" => self.run_index_mode(&req, IndexMode::FreshIndex).await?,
            "delta_index" => self.run_index_mode(&req, IndexMode::DeltaIndex).await?,
            _ => self.run_query_mode(&req).await?,
        };
        let body = envelope("rag", json!({ "mode": mode, "result": result }), vec![]);
        Ok(NodeHandlerOutput::new(body))
    }
}
