use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::RagSource;

/// De-dupes case-insensitively while preserving first-seen casing.
pub fn normalize_collection_selection(values: &[Value]) -> Vec<String> {
    let mut selected = Vec::new();
    let mut seen = HashSet::new();
    for value in values {
        let token = match value {
            Value::String(s) => s.trim().to_string(),
            Value::Null => continue,
            other => other.to_string(),
        };
        if token.is_empty() {
            continue;
        }
        let lowered = token.to_lowercase();
        if !seen.insert(lowered) {
            continue;
        }
        selected.push(token);
    }
    selected
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionSummary {
    pub id: String,
    pub name: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionContract {
    pub provider: String,
    pub collections: Vec<CollectionSummary>,
}

pub fn list_collection_contract(sources: &[RagSource]) -> CollectionContract {
    let mut seen = HashSet::new();
    let mut rows: Vec<CollectionSummary> = Vec::new();
    for source in sources {
        let name = source.collection.trim().to_string();
        if name.is_empty() {
            continue;
        }
        let key = name.to_lowercase();
        if !seen.insert(key) {
            continue;
        }
        rows.push(CollectionSummary { id: name.clone(), name, status: source.status().to_string() });
    }
    rows.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
    CollectionContract { provider: crate::health::RAG_PROVIDER.to_string(), collections: rows }
}

/// Matches the selected names against each source's collection, name, or
/// id. Returns the matched sources plus any selected names with no match.
pub fn resolve_sources_for_collections(sources: &[RagSource], selected: &[String]) -> (Vec<RagSource>, Vec<String>) {
    let mut selected_keys: std::collections::HashMap<String, String> =
        selected.iter().map(|s| (s.to_lowercase(), s.clone())).collect();
    if selected_keys.is_empty() {
        return (Vec::new(), Vec::new());
    }
    let mut matched = Vec::new();
    for source in sources {
        let candidates = [source.collection.to_lowercase(), source.name.to_lowercase(), source.id.to_lowercase()];
        if candidates.iter().any(|c| selected_keys.remove(c).is_some()) {
            matched.push(source.clone());
        }
    }
    let missing: Vec<String> = selected_keys.into_values().collect();
    (matched, missing)
}
