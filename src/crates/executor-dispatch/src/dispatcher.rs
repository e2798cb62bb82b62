//! Dispatch state machine and Kubernetes Job packaging.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{Container, EnvVar, Pod, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{DeleteParams, ListParams, LogParams, PostParams};
use kube::{Api, Client};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::contract::{classify_exit, truncate_text, ExecutionPayload, ExecutionResult, CONTRACT_VERSION, RESULT_PREFIX};
use crate::error::{DispatchError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStatus {
    Pending,
    Submitted,
    Confirmed,
    Failed,
    Uncertain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiFailureCategory {
    SocketMissing,
    SocketUnreachable,
    ApiUnreachable,
    AuthError,
    TlsError,
    Timeout,
    PreflightFailed,
    Unknown,
}

/// Persisted on terminal transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeEvidence {
    pub selected_provider: String,
    pub final_provider: String,
    pub provider_dispatch_id: Option<String>,
    pub workspace_identity: Option<String>,
    pub dispatch_status: DispatchStatus,
    /// No fallback provider exists — always `false`.
    pub fallback_attempted: bool,
    pub fallback_reason: Option<String>,
    pub dispatch_uncertain: bool,
    pub api_failure_category: Option<ApiFailureCategory>,
    pub k8s_job_name: Option<String>,
    pub k8s_pod_name: Option<String>,
    pub k8s_terminal_reason: Option<String>,
}

impl RuntimeEvidence {
    fn pending(job_name: &str) -> Self {
        Self {
            selected_provider: "kubernetes".to_string(),
            final_provider: "kubernetes".to_string(),
            provider_dispatch_id: None,
            workspace_identity: None,
            dispatch_status: DispatchStatus::Pending,
            fallback_attempted: false,
            fallback_reason: None,
            dispatch_uncertain: false,
            api_failure_category: None,
            k8s_job_name: Some(job_name.to_string()),
            k8s_pod_name: None,
            k8s_terminal_reason: None,
        }
    }
}

/// Abstracts the Kubernetes Job lifecycle so the dispatch state machine is
/// unit-testable without a live cluster.
#[async_trait]
pub trait JobProvider: Send + Sync {
    async fn create_job(&self, namespace: &str, job_name: &str, payload: &ExecutionPayload) -> Result<()>;
    async fn delete_job(&self, namespace: &str, job_name: &str, grace_period_seconds: u64) -> Result<()>;

    /// Blocks until the Job's Pod reaches a terminal phase (bounded by
    /// `poll_timeout_seconds`, which should track `execution_timeout_seconds`
    /// — the whole-job bound), then tails its logs (bounded by
    /// `log_collection_timeout_seconds`) and parses the
    /// `LLMCTL_EXECUTOR_RESULT_JSON=` line. Falls back to a synthesized
    /// result derived from the container's exit code when no result line is
    /// present (crash before the executor could emit one).
    async fn terminal_result(
        &self,
        namespace: &str,
        job_name: &str,
        poll_timeout_seconds: u64,
        log_collection_timeout_seconds: u64,
        capture_limit_bytes: u64,
    ) -> Result<ExecutionResult>;
}

pub struct KubeJobProvider {
    client: Client,
}

impl KubeJobProvider {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn job_manifest(job_name: &str, payload: &ExecutionPayload) -> Result<Job> {
        let payload_json = serde_json::to_string(payload)?;
        let mut env: Vec<EnvVar> = payload
            .env
            .iter()
            .map(|(k, v)| EnvVar { name: k.clone(), value: Some(v.clone()), ..Default::default() })
            .collect();
        env.push(EnvVar { name: "LLMCTL_EXECUTOR_PAYLOAD_JSON".to_string(), value: Some(payload_json), ..Default::default() });

        let container = Container {
            name: "executor".to_string(),
            image: Some("llmctl-executor:latest".to_string()),
            working_dir: Some(payload.cwd.clone()),
            env: Some(env),
            ..Default::default()
        };

        Ok(Job {
            metadata: ObjectMeta { name: Some(job_name.to_string()), ..Default::default() },
            spec: Some(JobSpec {
                backoff_limit: Some(0),
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta::default()),
                    spec: Some(PodSpec {
                        containers: vec![container],
                        restart_policy: Some("Never".to_string()),
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        })
    }
}

#[async_trait]
impl JobProvider for KubeJobProvider {
    async fn create_job(&self, namespace: &str, job_name: &str, payload: &ExecutionPayload) -> Result<()> {
        let manifest = Self::job_manifest(job_name, payload)?;
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), &manifest)
            .await
            .map_err(|e| DispatchError::JobCreateFailed(e.to_string()))?;
        Ok(())
    }

    async fn delete_job(&self, namespace: &str, job_name: &str, grace_period_seconds: u64) -> Result<()> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        let params = DeleteParams { grace_period_seconds: Some(grace_period_seconds as u32), ..Default::default() };
        match api.delete(job_name, &params).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()), // idempotent
            Err(e) => Err(DispatchError::JobCreateFailed(e.to_string())),
        }
    }

    async fn terminal_result(
        &self,
        namespace: &str,
        job_name: &str,
        poll_timeout_seconds: u64,
        log_collection_timeout_seconds: u64,
        capture_limit_bytes: u64,
    ) -> Result<ExecutionResult> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list_params = ListParams::default().labels(&format!("job-name={job_name}"));
        let deadline = Instant::now() + Duration::from_secs(poll_timeout_seconds);

        loop {
            let list = pods.list(&list_params).await.map_err(|e| DispatchError::JobCreateFailed(e.to_string()))?;
            if let Some(pod) = list.items.into_iter().find(pod_is_terminal) {
                let pod_name = pod.metadata.name.clone().unwrap_or_default();
                let (exit_code, terminal_reason) = pod_exit_code(&pod);

                let logs = match tokio::time::timeout(Duration::from_secs(log_collection_timeout_seconds), pods.logs(&pod_name, &LogParams::default())).await {
                    Ok(Ok(logs)) => logs,
                    Ok(Err(e)) => {
                        warn!(pod = %pod_name, error = %e, "failed to collect pod logs");
                        String::new()
                    }
                    Err(_) => {
                        warn!(pod = %pod_name, "log collection timed out");
                        String::new()
                    }
                };

                let mut result = match parse_result_line(&logs) {
                    Ok(mut parsed) => {
                        parsed.stdout = truncate_text(&parsed.stdout, capture_limit_bytes as usize);
                        parsed.stderr = truncate_text(&parsed.stderr, capture_limit_bytes as usize);
                        parsed
                    }
                    Err(_) => synthesize_result_from_exit(exit_code, &logs, capture_limit_bytes),
                };
                attach_k8s_metadata(&mut result, &pod_name, &terminal_reason);
                return Ok(result);
            }

            if Instant::now() >= deadline {
                warn!(job_name, "job did not reach a terminal pod phase within poll_timeout_seconds");
                let mut result = synthesize_result_from_exit(124, "", capture_limit_bytes);
                attach_k8s_metadata(&mut result, "", "DeadlineExceeded");
                return Ok(result);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::time::sleep(POLL_INTERVAL.min(remaining)).await;
        }
    }
}

const POLL_INTERVAL: Duration = Duration::from_millis(500);

fn pod_is_terminal(pod: &Pod) -> bool {
    pod.status.as_ref().and_then(|s| s.phase.as_deref()).map(|p| p == "Succeeded" || p == "Failed").unwrap_or(false)
}

/// The first container's terminated exit code/reason, or a synthetic
/// `(1, "Unknown")` when the pod has no container status yet (shouldn't
/// happen once the phase is terminal, but the API makes no such guarantee).
fn pod_exit_code(pod: &Pod) -> (i32, String) {
    let terminated = pod
        .status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .and_then(|statuses| statuses.first())
        .and_then(|cs| cs.state.as_ref())
        .and_then(|state| state.terminated.as_ref());
    match terminated {
        Some(t) => (t.exit_code, t.reason.clone().unwrap_or_default()),
        None => (1, "Unknown".to_string()),
    }
}

/// Builds a result directly from the container's exit code when the
/// executor crashed before it could emit its own result line.
fn synthesize_result_from_exit(exit_code: i32, raw_logs: &str, capture_limit_bytes: u64) -> ExecutionResult {
    let (status, error) = classify_exit(exit_code, None);
    let now = chrono::Utc::now().to_rfc3339();
    ExecutionResult {
        contract_version: CONTRACT_VERSION.to_string(),
        status,
        exit_code,
        started_at: now.clone(),
        finished_at: now,
        stdout: truncate_text(raw_logs, capture_limit_bytes as usize),
        stderr: String::new(),
        error,
        provider_metadata: serde_json::json!({}),
        usage: None,
        metrics: None,
        warnings: vec!["no LLMCTL_EXECUTOR_RESULT_JSON line found; result synthesized from exit code".to_string()],
        output_state: None,
        routing_state: None,
    }
}

fn attach_k8s_metadata(result: &mut ExecutionResult, pod_name: &str, terminal_reason: &str) {
    if let Value::Object(ref mut map) = result.provider_metadata {
        map.insert("k8s_pod_name".to_string(), Value::String(pod_name.to_string()));
        map.insert("k8s_terminal_reason".to_string(), Value::String(terminal_reason.to_string()));
    } else {
        result.provider_metadata = serde_json::json!({ "k8s_pod_name": pod_name, "k8s_terminal_reason": terminal_reason });
    }
}

/// Parses the executor's one-line stdout contract.
pub fn parse_result_line(stdout: &str) -> Result<ExecutionResult> {
    let line = stdout
        .lines()
        .rev()
        .find(|l| l.starts_with(RESULT_PREFIX))
        .ok_or_else(|| DispatchError::InvalidPayload("no LLMCTL_EXECUTOR_RESULT_JSON line found".to_string()))?;
    let json = &line[RESULT_PREFIX.len()..];
    let result: ExecutionResult = serde_json::from_str(json)?;
    result.validate_contract_version()?;
    Ok(result)
}

/// The dispatcher. Generic over [`JobProvider`] so tests substitute an
/// in-memory fake instead of a live cluster.
pub struct Dispatcher<P: JobProvider> {
    provider: P,
    namespace: String,
}

impl<P: JobProvider> Dispatcher<P> {
    pub fn new(provider: P, namespace: impl Into<String>) -> Self {
        Self { provider, namespace: namespace.into() }
    }

    /// Packages and submits one node execution. Returns the
    /// `provider_dispatch_id` and the runtime evidence recorded at the
    /// `dispatch_submitted`/`dispatch_failed`/`dispatch_uncertain` boundary
    /// (confirmation to `dispatch_confirmed` happens later, when the Job's
    /// Pod reaches a terminal phase).
    pub async fn dispatch(&self, payload: &ExecutionPayload) -> (Option<String>, RuntimeEvidence) {
        if let Err(e) = payload.validate_contract_version() {
            warn!(error = %e, "contract version mismatch before dispatch");
            let mut evidence = RuntimeEvidence::pending("");
            evidence.dispatch_status = DispatchStatus::Failed;
            return (None, evidence);
        }

        let job_name = format!("llmctl-exec-{}", payload.request_id);
        let mut evidence = RuntimeEvidence::pending(&job_name);

        match self.provider.create_job(&self.namespace, &job_name, payload).await {
            Ok(()) => {
                let dispatch_id = format!("kubernetes:{}/{}", self.namespace, job_name);
                info!(dispatch_id = %dispatch_id, "job created");
                evidence.provider_dispatch_id = Some(dispatch_id.clone());
                evidence.dispatch_status = DispatchStatus::Submitted;
                (Some(dispatch_id), evidence)
            }
            Err(DispatchError::JobCreateFailed(msg)) => {
                warn!(error = %msg, "job create failed");
                evidence.dispatch_status = DispatchStatus::Failed;
                (None, evidence)
            }
            Err(other) => {
                warn!(error = %other, "job create was ambiguous");
                evidence.dispatch_status = DispatchStatus::Uncertain;
                evidence.dispatch_uncertain = true;
                evidence.api_failure_category = Some(ApiFailureCategory::Unknown);
                (None, evidence)
            }
        }
    }

    /// Marks the evidence confirmed once the Job's Pod reaches a terminal
    /// phase.
    pub fn confirm(evidence: &mut RuntimeEvidence, pod_name: impl Into<String>, terminal_reason: impl Into<String>) {
        evidence.dispatch_status = DispatchStatus::Confirmed;
        evidence.k8s_pod_name = Some(pod_name.into());
        evidence.k8s_terminal_reason = Some(terminal_reason.into());
    }

    /// `cancel(run_id)` — idempotent: repeated calls are no-ops once the Job
    /// is gone. The caller is responsible for waiting
    /// `cancel_grace_timeout_seconds` before invoking the force path.
    pub async fn cancel(&self, job_name: &str, grace_period_seconds: u64) -> Result<()> {
        self.provider.delete_job(&self.namespace, job_name, grace_period_seconds).await
    }

    /// Requests a graceful delete, waits `grace_period_seconds`, then
    /// force-deletes (`grace_period_seconds=0`) if the Job is still around.
    /// Idempotent the same way `cancel` is.
    pub async fn cancel_with_force(&self, job_name: &str, grace_period_seconds: u64) -> Result<()> {
        self.cancel(job_name, grace_period_seconds).await?;
        if grace_period_seconds > 0 {
            tokio::time::sleep(Duration::from_secs(grace_period_seconds)).await;
            self.provider.delete_job(&self.namespace, job_name, 0).await?;
        }
        Ok(())
    }

    /// Awaits the dispatched job's terminal `ExecutionResult` via the
    /// provider's log-collection loop. `poll_timeout_seconds` should track
    /// `execution_timeout_seconds` (the whole-job bound);
    /// `log_collection_timeout_seconds` bounds only the post-terminal log
    /// fetch itself.
    pub async fn await_terminal_result(
        &self,
        job_name: &str,
        poll_timeout_seconds: u64,
        log_collection_timeout_seconds: u64,
        capture_limit_bytes: u64,
    ) -> Result<ExecutionResult> {
        self.provider
            .terminal_result(&self.namespace, job_name, poll_timeout_seconds, log_collection_timeout_seconds, capture_limit_bytes)
            .await
    }
}

/// Kept as typed-but-unused metadata slot: provider-supplied extra fields
/// (`request_metadata`) passed through verbatim when present.
pub fn provider_metadata(provider: &str, request_id: &str, command: &[String], cwd: &str, emit_start_markers: bool, request_metadata: Option<Value>) -> Value {
    let mut map = BTreeMap::new();
    map.insert("executor", Value::String("llmctl-executor".to_string()));
    map.insert("provider", Value::String(provider.to_string()));
    map.insert("request_id", Value::String(request_id.to_string()));
    map.insert("command", serde_json::to_value(command).unwrap_or(Value::Null));
    map.insert("cwd", Value::String(cwd.to_string()));
    map.insert("emit_start_markers", Value::Bool(emit_start_markers));
    if let Some(meta) = request_metadata {
        map.insert("request_metadata", meta);
    }
    serde_json::to_value(map).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::Work;
    use std::sync::Mutex;

    struct FakeProvider {
        create_result: Result<()>,
        terminal_result: Option<ExecutionResult>,
    }

    impl FakeProvider {
        fn new(create_result: Result<()>) -> Self {
            Self { create_result, terminal_result: None }
        }

        fn with_terminal_result(mut self, result: ExecutionResult) -> Self {
            self.terminal_result = Some(result);
            self
        }
    }

    fn fake_success_result() -> ExecutionResult {
        ExecutionResult {
            contract_version: CONTRACT_VERSION.to_string(),
            status: crate::contract::ResultStatus::Success,
            exit_code: 0,
            started_at: "t0".to_string(),
            finished_at: "t1".to_string(),
            stdout: "done".to_string(),
            stderr: String::new(),
            error: None,
            provider_metadata: serde_json::json!({}),
            usage: None,
            metrics: None,
            warnings: vec![],
            output_state: None,
            routing_state: None,
        }
    }

    #[async_trait]
    impl JobProvider for FakeProvider {
        async fn create_job(&self, _namespace: &str, _job_name: &str, _payload: &ExecutionPayload) -> Result<()> {
            match &self.create_result {
                Ok(()) => Ok(()),
                Err(DispatchError::JobCreateFailed(m)) => Err(DispatchError::JobCreateFailed(m.clone())),
                Err(_) => Err(DispatchError::JobCreateFailed("unused".to_string())),
            }
        }
        async fn delete_job(&self, _namespace: &str, _job_name: &str, _grace: u64) -> Result<()> {
            Ok(())
        }
        async fn terminal_result(
            &self,
            _namespace: &str,
            _job_name: &str,
            _poll_timeout_seconds: u64,
            _log_collection_timeout_seconds: u64,
            _capture_limit_bytes: u64,
        ) -> Result<ExecutionResult> {
            Ok(self.terminal_result.clone().unwrap_or_else(fake_success_result))
        }
    }

    fn payload() -> ExecutionPayload {
        ExecutionPayload::new("req-1", Work::Command(vec!["true".to_string()]), "/work")
    }

    #[tokio::test]
    async fn successful_create_yields_submitted_with_dispatch_id() {
        let dispatcher = Dispatcher::new(FakeProvider::new(Ok(())), "default");
        let (id, evidence) = dispatcher.dispatch(&payload()).await;
        assert_eq!(id.as_deref(), Some("kubernetes:default/llmctl-exec-req-1"));
        assert_eq!(evidence.dispatch_status, DispatchStatus::Submitted);
        assert!(!evidence.fallback_attempted);
    }

    #[tokio::test]
    async fn failed_create_yields_failed_status_with_no_dispatch_id() {
        let dispatcher = Dispatcher::new(FakeProvider::new(Err(DispatchError::JobCreateFailed("boom".into()))), "default");
        let (id, evidence) = dispatcher.dispatch(&payload()).await;
        assert!(id.is_none());
        assert_eq!(evidence.dispatch_status, DispatchStatus::Failed);
    }

    #[tokio::test]
    async fn await_terminal_result_forwards_provider_result() {
        let dispatcher = Dispatcher::new(FakeProvider::new(Ok(())).with_terminal_result(fake_success_result()), "default");
        let result = dispatcher.await_terminal_result("llmctl-exec-req-1", 30, 10, 1_000_000).await.unwrap();
        assert_eq!(result.status, crate::contract::ResultStatus::Success);
        assert_eq!(result.stdout, "done");
    }

    #[test]
    fn parse_result_line_reads_authoritative_stdout_tail() {
        let stdout = format!(
            "some log line\n{}{{\"contract_version\":\"v1\",\"status\":\"success\",\"exit_code\":0,\"started_at\":\"t0\",\"finished_at\":\"t1\",\"stdout\":\"\",\"stderr\":\"\",\"error\":null,\"provider_metadata\":{{}},\"usage\":null,\"metrics\":null,\"warnings\":[],\"output_state\":null,\"routing_state\":null}}\n",
            RESULT_PREFIX
        );
        let result = parse_result_line(&stdout).unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.provider_metadata, serde_json::json!({}));
    }
}
