//! `memory` node: deterministic CRUD plus LLM-guided retrieve.
//!
//! Ported from `llmctl-studio-backend/src/services/tasks.py`'s
//! `_execute_flowchart_memory_node_llm_guided_retrieve` and
//! `_normalize_memory_llm_guided_retrieve_payload`: when `action ==
//! "retrieve"` and no deterministic query is bound, an LLM is asked to
//! infer `{memory_id?, query_text?, limit, confidence}` from the input
//! context, and the result is merged with the deterministic retrieve path.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use llm::{ChatModel, ChatRequest, Message, MessageRole};

use crate::error::{NodeEngineError, Result};
use crate::handler::{envelope, NodeHandler, NodeHandlerOutput, NodeHandlerRequest};

pub const MIN_LIMIT: u32 = 1;
pub const MAX_LIMIT: u32 = 50;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryRecord {
    pub id: u64,
    pub content: Value,
    pub metadata: Value,
}

/// The store the retrieve/CRUD actions run against. Abstracted the same
/// way `rag_contract::RetrievalBackend` abstracts the vector store: the
/// concrete backend (a repository over `flowchart-store`, or an MCP
/// memory server) is out of scope here.
#[async_trait]
pub trait MemoryBackend: Send + Sync {
    async fn create(&self, content: Value, metadata: Value) -> Result<MemoryRecord>;
    async fn read(&self, memory_id: u64) -> Result<Option<MemoryRecord>>;
    async fn update(&self, memory_id: u64, content: Value) -> Result<MemoryRecord>;
    async fn delete(&self, memory_id: u64) -> Result<()>;
    async fn search(&self, query_text: &str, limit: u32) -> Result<Vec<MemoryRecord>>;
}

/// `{memory_id?, query_text, limit, confidence?}` after bounds are
/// applied. `query_text` is always present (possibly empty, which
/// selects the unfiltered search path).
#[derive(Debug, Clone, Default)]
pub struct NormalizedRetrieveParams {
    pub memory_id: Option<u64>,
    pub query_text: String,
    pub limit: u32,
    pub confidence: Option<f64>,
}

/// `_normalize_memory_llm_guided_retrieve_payload`: trims `query_text`,
/// accepts `memory_id` only when it parses as a non-negative integer
/// (string or number), clamps `limit` into `[1, 50]` defaulting to
/// `default_limit` when absent or unparsable, and clamps `confidence`
/// into `[0, 1]` when present.
pub fn normalize_llm_guided_retrieve_payload(raw: &Value, default_limit: u32) -> NormalizedRetrieveParams {
    let query_text = raw
        .get("query_text")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .unwrap_or("")
        .to_string();

    let memory_id = raw.get("memory_id").and_then(value_as_u64);

    let limit = raw
        .get("limit")
        .and_then(|v| v.as_u64())
        .map(|v| (v as u32).clamp(MIN_LIMIT, MAX_LIMIT))
        .unwrap_or(default_limit.clamp(MIN_LIMIT, MAX_LIMIT));

    let confidence = raw
        .get("confidence")
        .and_then(value_as_f64)
        .map(|v| v.clamp(0.0, 1.0));

    NormalizedRetrieveParams { memory_id, query_text, limit, confidence }
}

fn value_as_u64(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
}

fn value_as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// `node_ref_id` wins over an LLM-inferred `memory_id` — the explicit
/// binding always takes the audit trail over a guess.
fn resolve_memory_id(node_ref_id: Option<u64>, inferred: Option<u64>) -> (Option<u64>, &'static str) {
    match (node_ref_id, inferred) {
        (Some(id), _) => (Some(id), "node_ref_id"),
        (None, Some(id)) => (Some(id), "inferred_memory_id"),
        (None, None) => (None, "none"),
    }
}

pub struct MemoryHandler {
    backend: Arc<dyn MemoryBackend>,
    chat_model: Arc<dyn ChatModel>,
}

impl MemoryHandler {
    pub fn new(backend: Arc<dyn MemoryBackend>, chat_model: Arc<dyn ChatModel>) -> Self {
        Self { backend, chat_model }
    }

    fn retrieve_inference_prompt(req: &NodeHandlerRequest<'_>) -> String {
        format!(
            "Given the upstream context below, infer which memory to retrieve. \
             Respond with JSON only: {{\"memory_id\": <int, optional>, \"query_text\": <string>, \
             \"limit\": <int>, \"confidence\": <float 0-1>}}.\n\nContext:\n{}",
            req.input_context
        )
    }

    async fn infer_retrieve_params(&self, req: &NodeHandlerRequest<'_>, default_limit: u32) -> Result<NormalizedRetrieveParams> {
        let messages = vec![
            Message::new(MessageRole::System, "You resolve memory retrieval parameters for a workflow runtime."),
            Message::new(MessageRole::Human, Self::retrieve_inference_prompt(req)),
        ];
        let request = ChatRequest::new(messages).with_temperature(0.0);
        let response = self.chat_model.chat(request).await?;
        let text = response.message.text().unwrap_or_default();
        let raw: Value = serde_json::from_str(text).unwrap_or_else(|_| json!({}));
        Ok(normalize_llm_guided_retrieve_payload(&raw, default_limit))
    }

    async fn run_action(&self, req: &NodeHandlerRequest<'_>, resolved_memory_id: Option<u64>, query_text: &str, limit: u32) -> Result<Value> {
        let action = req.config_str("action").unwrap_or("retrieve");
        match action {
            "create" => {
                let content = req.node_config.get("content").cloned().unwrap_or(Value::Null);
                let metadata = req.node_config.get("metadata").cloned().unwrap_or_else(|| json!({}));
                let record = self.backend.create(content, metadata).await?;
                Ok(json!({ "memory_id": record.id, "content": record.content }))
            }
            "update" => {
                let id = resolved_memory_id.ok_or_else(|| NodeEngineError::MissingConfig("node_ref_id".to_string()))?;
                let content = req.node_config.get("content").cloned().unwrap_or(Value::Null);
                let record = self.backend.update(id, content).await?;
                Ok(json!({ "memory_id": record.id, "content": record.content }))
            }
            "delete" => {
                let id = resolved_memory_id.ok_or_else(|| NodeEngineError::MissingConfig("node_ref_id".to_string()))?;
                self.backend.delete(id).await?;
                Ok(json!({ "memory_id": id, "deleted": true }))
            }
            "retrieve" | "read" | _ => {
                if let Some(id) = resolved_memory_id {
                    let record = self.backend.read(id).await?;
                    Ok(json!({ "memory_id": id, "record": record.map(|r| r.content) }))
                } else {
                    let records = self.backend.search(query_text, limit).await?;
                    Ok(json!({
                        "records": records.iter().map(|r| json!({"memory_id": r.id, "content": r.content})).collect::<Vec<_>>(),
                    }))
                }
            }
        }
    }
}

#[async_trait]
impl NodeHandler for MemoryHandler {
    async fn handle(&self, req: NodeHandlerRequest<'_>) -> Result<NodeHandlerOutput> {
        let action = req.config_str("action").unwrap_or("retrieve");
        let node_ref_id = req.node_ref_id.and_then(|s| s.parse::<u64>().ok());

        if action != "retrieve" || (node_ref_id.is_none() && req.config_str("query").is_none()) {
            let default_limit = req.config_u64("limit").map(|v| v as u32).unwrap_or(MAX_LIMIT);
            let params = self.infer_retrieve_params(&req, default_limit).await?;
            let (resolved, resolution) = resolve_memory_id(node_ref_id, params.memory_id);

            let action_result =
                self.run_action(&req, resolved, &params.query_text, params.limit).await?;

            let body = envelope(
                "memory",
                json!({
                    "action": "retrieve",
                    "action_results": ["LLM-guided retrieve inferred retrieval parameters."],
                    "llm_guided_retrieve": {
                        "retrieval_resolution": resolution,
                        "resolved_memory_id": resolved,
                        "confidence": params.confidence,
                    },
                    "result": action_result,
                }),
                vec![],
            );
            return Ok(NodeHandlerOutput::new(body));
        }

        let limit = req.config_u64("limit").map(|v| (v as u32).clamp(MIN_LIMIT, MAX_LIMIT)).unwrap_or(MAX_LIMIT);
        let query_text = req.config_str("query").unwrap_or("");
        let action_result = self.run_action(&req, node_ref_id, query_text, limit).await?;
        let body = envelope("memory", json!({ "action": action, "result": action_result }), vec![]);
        Ok(NodeHandlerOutput::new(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_applies_bounds() {
        let raw = json!({"query_text": "  deployment readiness  ", "memory_id": "17", "limit": 999, "confidence": "0.25"});
        let params = normalize_llm_guided_retrieve_payload(&raw, 7);
        assert_eq!(params.query_text, "deployment readiness");
        assert_eq!(params.memory_id, Some(17));
        assert_eq!(params.limit, 50);
        assert_eq!(params.confidence, Some(0.25));
    }

    #[test]
    fn normalize_defaults_when_values_missing() {
        let raw = json!({"query_text": "   ", "memory_id": "invalid"});
        let params = normalize_llm_guided_retrieve_payload(&raw, 12);
        assert_eq!(params.query_text, "");
        assert_eq!(params.memory_id, None);
        assert_eq!(params.limit, 12);
    }

    #[test]
    fn node_ref_id_wins_over_inferred_memory_id() {
        let (resolved, resolution) = resolve_memory_id(Some(5), Some(99));
        assert_eq!(resolved, Some(5));
        assert_eq!(resolution, "node_ref_id");
    }

    #[test]
    fn inferred_memory_id_used_when_no_ref() {
        let (resolved, resolution) = resolve_memory_id(None, Some(44));
        assert_eq!(resolved, Some(44));
        assert_eq!(resolution, "inferred_memory_id");
    }
}
