use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeKind {
    Chat,
    Flowchart,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Directory,
    Github,
    GoogleDrive,
}

/// A directory, Git repo, or Drive folder feeding one collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagSource {
    pub id: String,
    pub name: String,
    pub kind: SourceKind,
    pub collection: String,
    pub local_path: Option<String>,
    pub drive_folder_id: Option<String>,
    pub last_indexed_at: Option<String>,
    pub last_error: Option<String>,
    pub indexed_file_count: u64,
    pub indexed_chunk_count: u64,
    pub indexed_file_types: Value,
}

impl RagSource {
    pub fn status(&self) -> &'static str {
        if self.last_error.is_some() {
            "error"
        } else if self.last_indexed_at.is_none() {
            "not_indexed"
        } else {
            "ready"
        }
    }
}

/// Per-file fingerprint row enabling delta indexing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFileState {
    pub path: String,
    pub fingerprint: String,
    pub indexed: bool,
    pub doc_type: Option<String>,
    pub chunk_count: u64,
}

/// Written once per retrieved chunk; never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagRetrievalAudit {
    pub id: String,
    pub request_id: Option<String>,
    pub runtime_kind: RuntimeKind,
    pub flowchart_run_id: Option<String>,
    pub flowchart_node_run_id: Option<String>,
    pub provider: String,
    pub collection: Option<String>,
    pub source_id: Option<String>,
    pub path: Option<String>,
    pub chunk_id: Option<String>,
    pub score: Option<f64>,
    pub snippet: Option<String>,
    pub retrieval_rank: u32,
    pub created_at: String,
}
