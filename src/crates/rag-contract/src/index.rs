//! `fresh_index`/`delta_index`, ported from
//! `contracts.py::run_index_for_collections` and its
//! `_run_fresh_source_index`/`_run_delta_source_index`/
//! `_rollback_partial_source_index` helpers.
//!
//! Fails fast: the first source whose indexing raises aborts the whole
//! run after attempting a rollback for that source, matching the
//! original's per-source `try/except` with no continue-on-error path.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::collections::resolve_sources_for_collections;
use crate::error::{RagContractError, Result};
use crate::health::{RagHealthSnapshot, RAG_PROVIDER};
use crate::model::{RagSource, SourceFileState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexMode {
    FreshIndex,
    DeltaIndex,
}

/// A file discovered under a source (directory scan, git checkout, or
/// Drive folder listing) at index time. `content` is hashed into the
/// fingerprint; the backend consumes the same bytes for chunking.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: String,
    pub content: Vec<u8>,
    pub doc_type: Option<String>,
}

/// Resync + enumerate the current file set for one source. Covers the
/// original's `sync_source`-then-scan step for github/google_drive/
/// directory kinds alike; directories are a no-op resync.
#[async_trait]
pub trait SourceFileProvider: Send + Sync {
    async fn list_files(&self, source: &RagSource) -> Result<Vec<SourceFile>>;
}

/// The opaque vector-store indexing surface (collection reset, upsert,
/// delete-by-path). The actual embedding/vector-store client lives
/// outside this crate; this crate only shapes the calls around it.
#[async_trait]
pub trait IndexingBackend: Send + Sync {
    async fn reset_collection(&self, collection: &str) -> Result<()>;
    async fn index_files(&self, collection: &str, files: &[SourceFile], delete_first: bool) -> Result<IndexedCounts>;
    async fn delete_paths(&self, collection: &str, paths: &[String]) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IndexedCounts {
    pub file_count: u64,
    pub chunk_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceIndexSummary {
    pub source_id: String,
    pub source_name: String,
    pub collection: String,
    pub file_count: u64,
    pub chunk_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexRunSummary {
    pub mode: IndexMode,
    pub collections: Vec<String>,
    pub source_count: usize,
    pub total_files: u64,
    pub total_chunks: u64,
    pub sources: Vec<SourceIndexSummary>,
}

/// One unrolled update the caller (`flowchart-store`) must persist: new
/// file states for a source and, for delta runs, the paths to drop.
#[derive(Debug, Clone)]
pub struct SourceFileStateUpdate {
    pub source_id: String,
    pub mode: IndexMode,
    pub upserted: Vec<SourceFileState>,
    pub removed_paths: Vec<String>,
    pub last_indexed_at: String,
    pub last_error: Option<String>,
}

pub fn fingerprint(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("sha256:{:x}", hasher.finalize())
}

struct Diff {
    changed: Vec<SourceFile>,
    removed_paths: Vec<String>,
    unchanged_existing: Vec<SourceFileState>,
}

fn diff_against_existing(files: &[SourceFile], existing: &[SourceFileState]) -> Diff {
    use std::collections::HashMap;
    let existing_by_path: HashMap<&str, &SourceFileState> = existing.iter().map(|s| (s.path.as_str(), s)).collect();
    let current_paths: std::collections::HashSet<&str> = files.iter().map(|f| f.path.as_str()).collect();

    let mut changed = Vec::new();
    let mut unchanged_existing = Vec::new();
    for file in files {
        let fp = fingerprint(&file.content);
        match existing_by_path.get(file.path.as_str()) {
            Some(state) if state.fingerprint == fp => unchanged_existing.push((*state).clone()),
            _ => changed.push(file.clone()),
        }
    }
    let removed_paths: Vec<String> = existing
        .iter()
        .filter(|s| !current_paths.contains(s.path.as_str()))
        .map(|s| s.path.clone())
        .collect();

    Diff { changed, removed_paths, unchanged_existing }
}

/// `_rollback_partial_source_index`: fresh mode resets the whole
/// collection and drops all known file state; delta mode deletes only
/// the paths this run touched before failing.
async fn rollback_partial_source_index(
    backend: &dyn IndexingBackend,
    source: &RagSource,
    mode: IndexMode,
    touched_paths: &[String],
) -> Result<()> {
    match mode {
        IndexMode::FreshIndex => backend.reset_collection(&source.collection).await,
        IndexMode::DeltaIndex => {
            if touched_paths.is_empty() {
                Ok(())
            } else {
                backend.delete_paths(&source.collection, touched_paths).await
            }
        }
    }
}

async fn run_fresh_source_index(
    backend: &dyn IndexingBackend,
    source: &RagSource,
    files: &[SourceFile],
    now: &str,
) -> Result<(SourceIndexSummary, SourceFileStateUpdate)> {
    backend.reset_collection(&source.collection).await?;
    let counts = backend.index_files(&source.collection, files, false).await?;
    let states: Vec<SourceFileState> = files
        .iter()
        .map(|f| SourceFileState {
            path: f.path.clone(),
            fingerprint: fingerprint(&f.content),
            indexed: true,
            doc_type: f.doc_type.clone(),
            chunk_count: 0,
        })
        .collect();
    Ok((
        SourceIndexSummary {
            source_id: source.id.clone(),
            source_name: source.name.clone(),
            collection: source.collection.clone(),
            file_count: counts.file_count.max(files.len() as u64),
            chunk_count: counts.chunk_count,
        },
        SourceFileStateUpdate {
            source_id: source.id.clone(),
            mode: IndexMode::FreshIndex,
            upserted: states,
            removed_paths: Vec::new(),
            last_indexed_at: now.to_string(),
            last_error: None,
        },
    ))
}

async fn run_delta_source_index(
    backend: &dyn IndexingBackend,
    source: &RagSource,
    files: &[SourceFile],
    existing_states: &[SourceFileState],
    now: &str,
) -> Result<(SourceIndexSummary, SourceFileStateUpdate, Vec<String>)> {
    let diff = diff_against_existing(files, existing_states);

    if !diff.removed_paths.is_empty() {
        backend.delete_paths(&source.collection, &diff.removed_paths).await?;
    }

    let touched_paths: Vec<String> = diff.changed.iter().map(|f| f.path.clone()).collect();
    let counts = if diff.changed.is_empty() {
        IndexedCounts::default()
    } else {
        backend.index_files(&source.collection, &diff.changed, true).await?
    };

    let changed_states: Vec<SourceFileState> = diff
        .changed
        .iter()
        .map(|f| SourceFileState {
            path: f.path.clone(),
            fingerprint: fingerprint(&f.content),
            indexed: true,
            doc_type: f.doc_type.clone(),
            chunk_count: 0,
        })
        .collect();

    let total_file_count = diff.unchanged_existing.len() as u64 + changed_states.len() as u64;
    let total_chunk_count: u64 =
        diff.unchanged_existing.iter().map(|s| s.chunk_count).sum::<u64>() + counts.chunk_count;

    let mut upserted = diff.unchanged_existing;
    upserted.extend(changed_states);

    Ok((
        SourceIndexSummary {
            source_id: source.id.clone(),
            source_name: source.name.clone(),
            collection: source.collection.clone(),
            file_count: total_file_count,
            chunk_count: total_chunk_count,
        },
        SourceFileStateUpdate {
            source_id: source.id.clone(),
            mode: IndexMode::DeltaIndex,
            upserted,
            removed_paths: diff.removed_paths,
            last_indexed_at: now.to_string(),
            last_error: None,
        },
        touched_paths,
    ))
}

pub struct IndexOutcome {
    pub summary: IndexRunSummary,
    pub state_updates: Vec<SourceFileStateUpdate>,
}

/// `run_index_for_collections`. Fails fast on the first source that
/// errors, after attempting rollback for that source; earlier sources'
/// summaries/state updates already produced are discarded by the caller
/// along with the whole run, matching the original's unconditional
/// re-raise.
pub async fn run_index(
    mode: IndexMode,
    selected_collections: &[String],
    known_sources: &[RagSource],
    health: &RagHealthSnapshot,
    files_by_source: impl Fn(&RagSource) -> Vec<SourceFile>,
    existing_states_by_source: impl Fn(&str) -> Vec<SourceFileState>,
    backend: &dyn IndexingBackend,
    now: &str,
) -> Result<IndexOutcome> {
    if selected_collections.is_empty() {
        return Err(RagContractError::new("RAG_INDEX_NO_COLLECTIONS", 400, "No collections selected for indexing."));
    }
    if !health.is_healthy() {
        return Err(RagContractError::new(
            "RAG_INDEX_UNAVAILABLE",
            503,
            "RAG indexing requires a healthy retrieval backend.",
        )
        .with_metadata(serde_json::json!({ "rag_health_state": health.state, "provider": RAG_PROVIDER })));
    }

    let (sources, missing) = resolve_sources_for_collections(known_sources, selected_collections);
    if !missing.is_empty() {
        return Err(RagContractError::new(
            "RAG_INDEX_UNAVAILABLE",
            400,
            format!("One or more selected collections are unavailable: {}.", missing.join(", ")),
        ));
    }

    let mut summaries = Vec::new();
    let mut state_updates = Vec::new();
    let mut total_files = 0u64;
    let mut total_chunks = 0u64;

    for source in &sources {
        let files = files_by_source(source);
        let result = match mode {
            IndexMode::FreshIndex => run_fresh_source_index(backend, source, &files, now)
                .await
                .map(|(summary, update)| (summary, update, Vec::new())),
            IndexMode::DeltaIndex => {
                let existing = existing_states_by_source(&source.id);
                run_delta_source_index(backend, source, &files, &existing, now).await
            }
        };

        match result {
            Ok((summary, update, touched_paths)) => {
                total_files += summary.file_count;
                total_chunks += summary.chunk_count;
                summaries.push(summary);
                state_updates.push(update);
                let _ = touched_paths;
            }
            Err(e) => {
                let rollback = rollback_partial_source_index(backend, source, mode, &[]).await;
                let last_error = if let Err(rollback_err) = rollback {
                    format!("RAG indexing failed for source '{}' and rollback failed: {rollback_err}", source.name)
                } else {
                    format!("RAG indexing failed for source '{}': {e}", source.name)
                };
                return Err(RagContractError::new("RAG_INDEX_FAILED", 500, last_error));
            }
        }
    }

    Ok(IndexOutcome {
        summary: IndexRunSummary {
            mode,
            collections: selected_collections.to_vec(),
            source_count: summaries.len(),
            total_files,
            total_chunks,
        },
        state_updates,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::RagHealthState;
    use std::sync::Mutex;

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

    fn source() -> RagSource {
        RagSource {
            id: "src-1".into(),
            name: "docs".into(),
            kind: crate::model::SourceKind::Directory,
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

    #[derive(Default)]
    struct RecordingBackend {
        reset_calls: Mutex<Vec<String>>,
        deleted_paths: Mutex<Vec<String>>,
        fail_index: bool,
    }

    #[async_trait]
    impl IndexingBackend for RecordingBackend {
        async fn reset_collection(&self, collection: &str) -> Result<()> {
            self.reset_calls.lock().unwrap().push(collection.to_string());
            Ok(())
        }
        async fn index_files(&self, _collection: &str, files: &[SourceFile], _delete_first: bool) -> Result<IndexedCounts> {
            if self.fail_index {
                return Err(RagContractError::new("BACKEND_ERROR", 500, "backend exploded"));
            }
            Ok(IndexedCounts { file_count: files.len() as u64, chunk_count: files.len() as u64 * 2 })
        }
        async fn delete_paths(&self, _collection: &str, paths: &[String]) -> Result<()> {
            self.deleted_paths.lock().unwrap().extend(paths.iter().cloned());
            Ok(())
        }
    }

    #[tokio::test]
    async fn fresh_index_resets_collection_and_summarizes() {
        let backend = RecordingBackend::default();
        let files = vec![SourceFile { path: "a.md".into(), content: b"hello".to_vec(), doc_type: Some("markdown".into()) }];
        let outcome = run_index(
            IndexMode::FreshIndex,
            &["docs".to_string()],
            &[source()],
            &healthy(),
            |_s| files.clone(),
            |_id| vec![],
            &backend,
            "2026-01-01T00:00:00Z",
        )
        .await
        .unwrap();
        assert_eq!(outcome.summary.total_files, 1);
        assert_eq!(backend.reset_calls.lock().unwrap().len(), 1);
        assert_eq!(outcome.state_updates[0].upserted.len(), 1);
    }

    #[tokio::test]
    async fn delta_index_only_reindexes_changed_paths() {
        let backend = RecordingBackend::default();
        let unchanged_fp = fingerprint(b"same");
        let files = vec![
            SourceFile { path: "a.md".into(), content: b"same".to_vec(), doc_type: None },
            SourceFile { path: "b.md".into(), content: b"new content".to_vec(), doc_type: None },
        ];
        let existing = vec![SourceFileState { path: "a.md".into(), fingerprint: unchanged_fp, indexed: true, doc_type: None, chunk_count: 3 }];
        let outcome = run_index(
            IndexMode::DeltaIndex,
            &["docs".to_string()],
            &[source()],
            &healthy(),
            move |_s| files.clone(),
            move |_id| existing.clone(),
            &backend,
            "2026-01-01T00:00:00Z",
        )
        .await
        .unwrap();
        assert_eq!(backend.reset_calls.lock().unwrap().len(), 0);
        let update = &outcome.state_updates[0];
        assert_eq!(update.upserted.len(), 2);
        assert_eq!(outcome.summary.total_chunks, 3 + 2);
    }

    #[tokio::test]
    async fn delta_index_deletes_removed_paths() {
        let backend = RecordingBackend::default();
        let existing = vec![SourceFileState { path: "gone.md".into(), fingerprint: "sha256:x".into(), indexed: true, doc_type: None, chunk_count: 1 }];
        let outcome = run_index(
            IndexMode::DeltaIndex,
            &["docs".to_string()],
            &[source()],
            &healthy(),
            |_s| vec![],
            move |_id| existing.clone(),
            &backend,
            "2026-01-01T00:00:00Z",
        )
        .await
        .unwrap();
        assert_eq!(backend.deleted_paths.lock().unwrap().as_slice(), &["gone.md".to_string()]);
        assert!(outcome.state_updates[0].upserted.is_empty());
    }

    #[tokio::test]
    async fn failure_triggers_rollback_and_fails_the_run() {
        let backend = RecordingBackend { fail_index: true, ..Default::default() };
        let files = vec![SourceFile { path: "a.md".into(), content: b"hello".to_vec(), doc_type: None }];
        let result = run_index(
            IndexMode::FreshIndex,
            &["docs".to_string()],
            &[source()],
            &healthy(),
            move |_s| files.clone(),
            |_id| vec![],
            &backend,
            "2026-01-01T00:00:00Z",
        )
        .await;
        assert!(result.is_err());
        // rollback for fresh mode resets the collection a second time.
        assert_eq!(backend.reset_calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unhealthy_backend_rejects_indexing() {
        let backend = RecordingBackend::default();
        let mut unhealthy = healthy();
        unhealthy.healthy = false;
        unhealthy.state = RagHealthState::ConfiguredUnhealthy;
        let result = run_index(
            IndexMode::FreshIndex,
            &["docs".to_string()],
            &[source()],
            &unhealthy,
            |_s| vec![],
            |_id| vec![],
            &backend,
            "2026-01-01T00:00:00Z",
        )
        .await;
        assert!(result.is_err());
    }
}
