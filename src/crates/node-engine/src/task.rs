//! `task` (LLM) node: the prompt envelope, native/fallback instruction
//! and skill materialization, and the C3 executor dispatch.
//!
//! Provider adapters write instructions natively when the provider
//! supports a well-known filename (`AGENTS.md` for codex, `GEMINI.md`
//! for gemini, `CLAUDE.md` for claude); every other provider gets the
//! fallback path, where the markdown is inlined into the prompt
//! envelope instead of written to the workspace. Skills follow the same
//! split.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use executor_dispatch::{ExecutionPayload, ExecutionResult, JobProvider, ResultStatus, Work};
use llm::ChatModel;

use crate::error::{NodeEngineError, Result};
use crate::handler::{envelope, NodeHandler, NodeHandlerOutput, NodeHandlerRequest};

pub const NATIVE_INSTRUCTION_FILENAMES: &[(&str, &str)] = &[("codex", "AGENTS.md"), ("gemini", "GEMINI.md"), ("claude", "CLAUDE.md")];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterMode {
    Native,
    Fallback,
}

impl AdapterMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdapterMode::Native => "native",
            AdapterMode::Fallback => "fallback",
        }
    }
}

/// The provider-specific native instruction filename, or `None` if the
/// provider has no native convention and must use the fallback path.
/// `custom_filename` (from node config) overrides the built-in table.
fn native_instruction_filename<'a>(provider: &str, custom_filename: Option<&'a str>) -> Option<&'a str> {
    if let Some(custom) = custom_filename {
        return Some(custom);
    }
    NATIVE_INSTRUCTION_FILENAMES
        .iter()
        .find(|(p, _)| *p == provider)
        .map(|(_, filename)| *filename)
}

/// One materialized instruction: either a workspace file write (native)
/// or an inlined markdown blob plus the filename it would have used
/// (fallback).
#[derive(Debug, Clone)]
pub struct MaterializedInstructions {
    pub mode: AdapterMode,
    pub workspace_path: Option<String>,
    pub instructions_markdown: Option<String>,
    pub materialized_filename: Option<String>,
}

pub fn materialize_instructions(provider: &str, instructions_markdown: &str, custom_filename: Option<&str>) -> MaterializedInstructions {
    match native_instruction_filename(provider, custom_filename) {
        Some(filename) => MaterializedInstructions {
            mode: AdapterMode::Native,
            workspace_path: Some(filename.to_string()),
            instructions_markdown: None,
            materialized_filename: None,
        },
        None => MaterializedInstructions {
            mode: AdapterMode::Fallback,
            workspace_path: None,
            instructions_markdown: Some(instructions_markdown.to_string()),
            materialized_filename: Some("instructions.md".to_string()),
        },
    }
}

/// One packaged skill: native mode materializes skill files under
/// `<workspace>/.llmctl/skills/<slug>/…` plus the provider's home
/// directory; fallback mode carries the skill body inline.
#[derive(Debug, Clone)]
pub struct PackagedSkill {
    pub slug: String,
    pub mode: AdapterMode,
    pub workspace_path: Option<String>,
    pub inline_markdown: Option<String>,
}

pub fn package_skill(provider_supports_native: bool, slug: &str, body_markdown: &str) -> PackagedSkill {
    if provider_supports_native {
        PackagedSkill {
            slug: slug.to_string(),
            mode: AdapterMode::Native,
            workspace_path: Some(format!(".llmctl/skills/{slug}/SKILL.md")),
            inline_markdown: None,
        }
    } else {
        PackagedSkill { slug: slug.to_string(), mode: AdapterMode::Fallback, workspace_path: None, inline_markdown: Some(body_markdown.to_string()) }
    }
}

/// `{user_request, task_context{instructions, skills[], agent_prompt,
/// priorities[], inputs}, output_contract}` — the envelope a provider
/// adapter turns into a concrete CLI invocation.
pub fn build_prompt_envelope(
    user_request: &str,
    instructions: &MaterializedInstructions,
    skills: &[PackagedSkill],
    agent_prompt: Option<&str>,
    priorities: &[String],
    input_context: &Value,
    output_contract: &Value,
) -> Value {
    let instructions_json = if instructions.mode == AdapterMode::Native {
        json!({ "mode": "native", "workspace_path": instructions.workspace_path })
    } else {
        json!({
            "mode": "fallback",
            "instructions_markdown": instructions.instructions_markdown,
            "materialized_filename": instructions.materialized_filename,
        })
    };

    let skills_json: Vec<Value> = skills
        .iter()
        .map(|s| match s.mode {
            AdapterMode::Native => json!({ "slug": s.slug, "mode": "native", "workspace_path": s.workspace_path }),
            AdapterMode::Fallback => json!({ "slug": s.slug, "mode": "fallback", "inline_markdown": s.inline_markdown }),
        })
        .collect();

    json!({
        "user_request": user_request,
        "task_context": {
            "instructions": instructions_json,
            "skills": skills_json,
            "agent_prompt": agent_prompt,
            "priorities": priorities,
            "inputs": input_context,
        },
        "output_contract": output_contract,
    })
}

pub struct TaskHandler<P: JobProvider> {
    dispatcher: Arc<executor_dispatch::Dispatcher<P>>,
    /// Used only when `node_config.model_override_via_chat` requests an
    /// in-process chat call instead of an executor-job dispatch (e.g.
    /// cheap routing sub-tasks that don't need an isolated workspace).
    inline_chat_model: Option<Arc<dyn ChatModel>>,
    /// `execution_id -> k8s_job_name` for runs currently awaiting a
    /// terminal result, so `cancel` can find the Job to delete.
    in_flight: Mutex<HashMap<String, String>>,
}

impl<P: JobProvider> TaskHandler<P> {
    pub fn new(dispatcher: Arc<executor_dispatch::Dispatcher<P>>, inline_chat_model: Option<Arc<dyn ChatModel>>) -> Self {
        Self { dispatcher, inline_chat_model, in_flight: Mutex::new(HashMap::new()) }
    }

    /// Cancels the in-flight dispatch for `execution_id`, if any. A no-op
    /// once the dispatch has already reached a terminal result.
    pub async fn cancel(&self, execution_id: &str, grace_period_seconds: u64) -> Result<()> {
        let job_name = self.in_flight.lock().unwrap().get(execution_id).cloned();
        if let Some(job_name) = job_name {
            self.dispatcher
                .cancel_with_force(&job_name, grace_period_seconds)
                .await
                .map_err(|e| NodeEngineError::Dispatch(e.to_string()))?;
        }
        Ok(())
    }

    fn resolve_provider(&self, req: &NodeHandlerRequest<'_>) -> Result<String> {
        if let Some(p) = req.config_str("provider") {
            if req.enabled_providers.iter().any(|e| e == p) {
                return Ok(p.to_string());
            }
        }
        req.enabled_providers
            .first()
            .cloned()
            .ok_or_else(|| NodeEngineError::MissingConfig("enabled_providers".to_string()))
    }

    fn resolve_model(&self, req: &NodeHandlerRequest<'_>) -> Option<String> {
        req.node_config
            .get("model_id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| req.default_model_id.map(str::to_string))
    }
}

#[async_trait]
impl<P: JobProvider> NodeHandler for TaskHandler<P> {
    async fn handle(&self, req: NodeHandlerRequest<'_>) -> Result<NodeHandlerOutput> {
        let provider = self.resolve_provider(&req)?;
        let model_id = self.resolve_model(&req);

        let instructions_markdown = req.config_str("task_prompt").unwrap_or_default();
        let custom_filename = req.config_str("instruction_filename");
        let instructions = materialize_instructions(&provider, instructions_markdown, custom_filename);

        let provider_supports_native = NATIVE_INSTRUCTION_FILENAMES.iter().any(|(p, _)| *p == provider);
        let skills: Vec<PackagedSkill> = req
            .skill_ids
            .iter()
            .map(|slug| package_skill(provider_supports_native, slug, ""))
            .collect();

        let agent_prompt = req.config_str("agent_prompt");
        let priorities = req.config_str_vec("priorities");
        let output_contract = req.node_config.get("output_contract").cloned().unwrap_or_else(|| json!({}));

        let user_request = req.config_str("task_prompt").unwrap_or_default();
        let envelope_json = build_prompt_envelope(
            user_request,
            &instructions,
            &skills,
            agent_prompt,
            &priorities,
            &req.input_context,
            &output_contract,
        );

        let mut env: HashMap<String, Value> = HashMap::new();
        if let Some(ref model) = model_id {
            env.insert("LLMCTL_MODEL_ID".to_string(), json!(model));
        }
        let payload = ExecutionPayload::new(req.execution_id, Work::NodeExecution(executor_dispatch::NodeExecution { entrypoint: "task".to_string(), request: envelope_json.clone(), request_context: json!({ "node_id": req.node_id }) }), "/workspace")
            .with_env(env)
            .map_err(|e| NodeEngineError::Dispatch(e.to_string()))?;

        let capture_limit_bytes = payload.capture_limit_bytes;
        let (provider_dispatch_id, mut runtime_evidence) = self.dispatcher.dispatch(&payload).await;

        if matches!(runtime_evidence.dispatch_status, executor_dispatch::DispatchStatus::Failed | executor_dispatch::DispatchStatus::Uncertain) {
            return Err(NodeEngineError::Execution {
                status: format!("{:?}", runtime_evidence.dispatch_status).to_lowercase(),
                message: "executor job dispatch did not reach a submitted state".to_string(),
                retryable: runtime_evidence.dispatch_status == executor_dispatch::DispatchStatus::Uncertain,
            });
        }

        let job_name = runtime_evidence
            .k8s_job_name
            .clone()
            .ok_or_else(|| NodeEngineError::Dispatch("submitted dispatch carries no k8s_job_name".to_string()))?;
        self.in_flight.lock().unwrap().insert(req.execution_id.to_string(), job_name.clone());

        let exec_result = self
            .dispatcher
            .await_terminal_result(&job_name, req.execution_timeout_seconds, req.log_collection_timeout_seconds, capture_limit_bytes)
            .await;
        self.in_flight.lock().unwrap().remove(req.execution_id);
        let exec_result = exec_result.map_err(|e| NodeEngineError::Dispatch(e.to_string()))?;

        let (pod_name, terminal_reason) = k8s_metadata(&exec_result);
        let raw_output = exec_result.stdout.clone();
        let output_state = exec_result.output_state.clone().unwrap_or(Value::Null);

        if exec_result.status != ResultStatus::Success {
            return Err(NodeEngineError::Execution {
                status: format!("{:?}", exec_result.status).to_lowercase(),
                message: exec_result.error.as_ref().map(|e| e.message.clone()).unwrap_or_else(|| "node execution did not succeed".to_string()),
                retryable: exec_result.error.as_ref().map(|e| e.retryable).unwrap_or(false),
            });
        }
        executor_dispatch::Dispatcher::<P>::confirm(&mut runtime_evidence, pod_name, terminal_reason);

        let body = envelope(
            "task",
            json!({
                "raw_output": raw_output,
                "structured_output": output_state,
                "resolved_provider": provider,
                "resolved_model_id": model_id,
                "resolved_*_ids": Value::Null,
                "skill_adapter_mode": if provider_supports_native { AdapterMode::Native.as_str() } else { AdapterMode::Fallback.as_str() },
                "instruction_adapter_mode": instructions.mode.as_str(),
                "provider_dispatch_id": provider_dispatch_id,
                "runtime_evidence": serde_json::to_value(&runtime_evidence)?,
            }),
            vec![],
        );
        Ok(NodeHandlerOutput::new(body))
    }
}

/// Pulls the `k8s_pod_name`/`k8s_terminal_reason` pair the dispatcher
/// attached to `provider_metadata` on the terminal result.
fn k8s_metadata(result: &ExecutionResult) -> (String, String) {
    let pod_name = result.provider_metadata.get("k8s_pod_name").and_then(|v| v.as_str()).unwrap_or_default().to_string();
    let terminal_reason = result.provider_metadata.get("k8s_terminal_reason").and_then(|v| v.as_str()).unwrap_or_default().to_string();
    (pod_name, terminal_reason)
}
