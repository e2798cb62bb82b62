//! Retrieval Contract Store: health probe, collection registry, query/index
//! orchestration and retrieval audit shaping (C2).

pub mod collections;
pub mod error;
pub mod health;
pub mod index;
pub mod model;
pub mod query;

pub use collections::{list_collection_contract, normalize_collection_selection, resolve_sources_for_collections, CollectionContract, CollectionSummary};
pub use error::{RagContractError, Result, REASON_RETRIEVAL_EXECUTION_FAILED, REASON_UNAVAILABLE_FOR_SELECTED_COLLECTIONS};
pub use health::{rag_health_snapshot, DefaultTcpProbe, RagHealthSnapshot, RagHealthState, TcpProbe, RAG_HEALTH_TIMEOUT, RAG_PROVIDER};
pub use index::{
    fingerprint, run_index, IndexMode, IndexOutcome, IndexedCounts, IndexingBackend, SourceFile, SourceFileStateUpdate,
    SourceFileProvider, SourceIndexSummary, IndexRunSummary,
};
pub use model::{RagRetrievalAudit, RagSource, RuntimeKind, SourceFileState, SourceKind};
pub use query::{query, AnswerSynthesizer, CitationRecord, ContextRow, QueryRequest, QueryResponse, RetrievalBackend, RetrievalStats, RetrievedChunk, SynthesisError};
