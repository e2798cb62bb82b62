//! `RuntimeContext`: the ambient configuration threaded through the
//! scheduler and its collaborators. Constructed once at startup and
//! passed by reference from then on — never a process global.
//!
//! Loaded from YAML with `$include` directives and `${ENV:default}`
//! placeholder expansion.

use std::env;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use serde_yaml::Value as YamlValue;

use crate::error::{Result, SchedulerError};

fn default_worker_pool_size() -> usize {
    8
}

fn default_scheduler_count() -> usize {
    1
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_dispatch_timeout_seconds() -> u64 {
    30
}

fn default_execution_timeout_seconds() -> u64 {
    1800
}

fn default_log_collection_timeout_seconds() -> u64 {
    60
}

fn default_cancel_grace_timeout_seconds() -> u64 {
    10
}

fn default_enabled_providers() -> Vec<String> {
    vec!["codex".to_string()]
}

/// Loaded once at startup and threaded through the scheduler, the
/// dispatcher and the retrieval health probe. Never read from a process
/// global after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeContext {
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,

    #[serde(default = "default_scheduler_count")]
    pub scheduler_count: usize,

    #[serde(default = "default_namespace")]
    pub kubernetes_namespace: String,

    pub kubeconfig_path: Option<String>,

    pub rag_host: Option<String>,
    pub rag_port: Option<u16>,

    #[serde(default = "default_dispatch_timeout_seconds")]
    pub dispatch_timeout_seconds: u64,

    #[serde(default = "default_execution_timeout_seconds")]
    pub execution_timeout_seconds: u64,

    #[serde(default = "default_log_collection_timeout_seconds")]
    pub log_collection_timeout_seconds: u64,

    #[serde(default = "default_cancel_grace_timeout_seconds")]
    pub cancel_grace_timeout_seconds: u64,

    pub default_model_id: Option<String>,

    #[serde(default = "default_enabled_providers")]
    pub enabled_providers: Vec<String>,
}

impl Default for RuntimeContext {
    fn default() -> Self {
        Self {
            worker_pool_size: default_worker_pool_size(),
            scheduler_count: default_scheduler_count(),
            kubernetes_namespace: default_namespace(),
            kubeconfig_path: None,
            rag_host: None,
            rag_port: None,
            dispatch_timeout_seconds: default_dispatch_timeout_seconds(),
            execution_timeout_seconds: default_execution_timeout_seconds(),
            log_collection_timeout_seconds: default_log_collection_timeout_seconds(),
            cancel_grace_timeout_seconds: default_cancel_grace_timeout_seconds(),
            default_model_id: None,
            enabled_providers: default_enabled_providers(),
        }
    }
}

impl RuntimeContext {
    /// Load from a YAML file, resolving `$include` directives and
    /// `${ENV:default}` placeholders before deserializing.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let yaml = load_yaml_file(path)?;
        let json = yaml_to_json(&yaml)?;
        serde_json::from_value(json).map_err(SchedulerError::Json)
    }
}

fn load_yaml_file<P: AsRef<Path>>(path: P) -> Result<YamlValue> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)?;
    let mut value: YamlValue = serde_yaml::from_str(&content)?;

    let base_dir = path.parent().ok_or_else(|| SchedulerError::Config(format!("invalid config path {path:?}")))?;

    process_includes(&mut value, base_dir)?;
    expand_variables(&mut value);

    Ok(value)
}

fn process_includes(value: &mut YamlValue, base_dir: &Path) -> Result<()> {
    match value {
        YamlValue::Mapping(map) => {
            if let Some(YamlValue::String(include_path)) = map.get(&YamlValue::String("$include".to_string())) {
                let included = load_yaml_file(base_dir.join(include_path))?;
                *value = included;
                return Ok(());
            }
            for (_, v) in map.iter_mut() {
                process_includes(v, base_dir)?;
            }
        }
        YamlValue::Sequence(seq) => {
            for item in seq.iter_mut() {
                process_includes(item, base_dir)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn expand_variables(value: &mut YamlValue) {
    match value {
        YamlValue::String(s) => {
            if let Some(expanded) = expand_env_in_string(s) {
                *s = expanded;
            }
        }
        YamlValue::Mapping(map) => {
            for (_, v) in map.iter_mut() {
                expand_variables(v);
            }
        }
        YamlValue::Sequence(seq) => {
            for item in seq.iter_mut() {
                expand_variables(item);
            }
        }
        _ => {}
    }
}

/// `${ENV_VAR:default}` — falls back to `default` (empty string if
/// omitted) when the variable is unset.
fn expand_env_in_string(s: &str) -> Option<String> {
    if !s.contains("${") {
        return None;
    }
    let re = regex::Regex::new(r"\$\{([^:}]+)(?::([^}]*))?\}").ok()?;
    let mut result = s.to_string();
    for cap in re.captures_iter(s) {
        let full_match = cap.get(0)?.as_str();
        let var_name = cap.get(1)?.as_str();
        let default_value = cap.get(2).map(|m| m.as_str()).unwrap_or("");
        let value = env::var(var_name).unwrap_or_else(|_| default_value.to_string());
        result = result.replace(full_match, &value);
    }
    Some(result)
}

fn yaml_to_json(yaml: &YamlValue) -> Result<JsonValue> {
    match yaml {
        YamlValue::Null => Ok(JsonValue::Null),
        YamlValue::Bool(b) => Ok(JsonValue::Bool(*b)),
        YamlValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(JsonValue::Number(i.into()))
            } else if let Some(u) = n.as_u64() {
                Ok(JsonValue::Number(u.into()))
            } else if let Some(f) = n.as_f64() {
                serde_json::Number::from_f64(f).map(JsonValue::Number).ok_or_else(|| SchedulerError::Config(format!("invalid number: {f}")))
            } else {
                Err(SchedulerError::Config("invalid number".to_string()))
            }
        }
        YamlValue::String(s) => Ok(JsonValue::String(s.clone())),
        YamlValue::Sequence(seq) => Ok(JsonValue::Array(seq.iter().map(yaml_to_json).collect::<Result<Vec<_>>>()?)),
        YamlValue::Mapping(map) => {
            let mut json_map = serde_json::Map::new();
            for (k, v) in map {
                let key = match k {
                    YamlValue::String(s) => s.clone(),
                    _ => return Err(SchedulerError::Config("map keys must be strings".to_string())),
                };
                json_map.insert(key, yaml_to_json(v)?);
            }
            Ok(JsonValue::Object(json_map))
        }
        YamlValue::Tagged(tagged) => yaml_to_json(&tagged.value),
    }
}
