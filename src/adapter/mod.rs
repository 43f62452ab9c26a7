//! Proxy adapter
//!
//! Translates between the reverse proxy's external-processing contract and
//! the pipeline. The proxy only understands `CONTINUE` and `BLOCK`; every
//! pipeline outcome is mapped onto one of the two, and anything that did not
//! produce a decision (caller cancellation, deadline) fails safe to `BLOCK`.

use crate::module::{Action, HealthState, ProcessRequestContext, ProcessResponseContext, TokenUsage};
use crate::pipeline::{Pipeline, PipelineDecision, PipelineOutcome};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Verdict understood by the proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProxyAction {
    Continue,
    Block,
}

/// Request as reported by the proxy
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyRequest {
    /// Generated when empty
    pub request_id: String,
    pub tenant_id: String,
    pub provider: String,
    pub model: String,
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: String,
    pub client: HashMap<String, String>,
}

impl ProxyRequest {
    fn into_context(self) -> ProcessRequestContext {
        let defaults = ProcessRequestContext::default();
        ProcessRequestContext {
            request_id: non_empty(self.request_id, defaults.request_id),
            tenant_id: self.tenant_id,
            provider: self.provider,
            model: self.model,
            timestamp: Utc::now(),
            method: non_empty(self.method, defaults.method),
            path: non_empty(self.path, defaults.path),
            headers: self.headers,
            body: self.body,
            client: self.client,
            annotations: HashMap::new(),
        }
    }
}

fn non_empty(value: String, fallback: String) -> String {
    if value.is_empty() {
        fallback
    } else {
        value
    }
}

/// Provider response as reported by the proxy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyResponse {
    #[serde(flatten)]
    pub request: ProxyRequest,
    #[serde(default = "default_status")]
    pub status_code: u16,
    #[serde(default)]
    pub response_headers: HashMap<String, String>,
    #[serde(default)]
    pub response_body: String,
    #[serde(default)]
    pub provider_latency_ms: u64,
    #[serde(default)]
    pub total_latency_ms: u64,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
    /// Annotations produced by the request phase, if the proxy kept them
    #[serde(default)]
    pub annotations: HashMap<String, Value>,
}

fn default_status() -> u16 {
    200
}

impl ProxyResponse {
    fn into_context(self) -> ProcessResponseContext {
        let mut request = self.request.into_context();
        request.annotations = self.annotations;
        ProcessResponseContext {
            request,
            status_code: self.status_code,
            response_headers: self.response_headers,
            response_body: self.response_body,
            provider_latency_ms: self.provider_latency_ms,
            total_latency_ms: self.total_latency_ms,
            usage: self.usage,
        }
    }
}

/// Answer returned to the proxy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyVerdict {
    pub action: ProxyAction,
    pub processing_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_reason: Option<String>,
    #[serde(default)]
    pub annotations: HashMap<String, Value>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_body: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub modified_headers: HashMap<String, String>,
}

impl ProxyVerdict {
    /// Map a pipeline decision onto the proxy's two actions
    pub fn from_decision(decision: PipelineDecision) -> Self {
        let mut metadata = decision.metadata;
        metadata.insert("pipeline_action".to_string(), Value::String(decision.action.to_string()));
        let (action, block_reason) = match decision.action {
            Action::Continue | Action::Annotate | Action::Transform | Action::Route => {
                (ProxyAction::Continue, None)
            }
            Action::Retry => {
                metadata.insert("retry".to_string(), Value::Bool(true));
                let reason = decision
                    .block_reason
                    .or_else(|| metadata.get("retry_reason").and_then(Value::as_str).map(String::from))
                    .unwrap_or_else(|| "retry requested".to_string());
                (ProxyAction::Block, Some(reason))
            }
            Action::Block => (ProxyAction::Block, decision.block_reason),
        };
        let transformed = action == ProxyAction::Continue;
        Self {
            action,
            processing_time_ms: decision.elapsed.as_millis() as u64,
            block_reason,
            annotations: decision.annotations,
            metadata,
            modified_body: decision.modified_body.filter(|_| transformed),
            modified_headers: if transformed {
                decision.modified_headers
            } else {
                HashMap::new()
            },
        }
    }

    /// Fail-safe verdict for a run that produced no decision
    pub fn aborted(elapsed: Duration, reason: &str) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert("aborted".to_string(), Value::Bool(true));
        Self {
            action: ProxyAction::Block,
            processing_time_ms: elapsed.as_millis() as u64,
            block_reason: Some(format!("pipeline aborted: {}", reason)),
            annotations: HashMap::new(),
            metadata,
            modified_body: None,
            modified_headers: HashMap::new(),
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.action == ProxyAction::Block
    }
}

/// Health as reported to the proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProxyHealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyHealth {
    pub status: ProxyHealthStatus,
    pub message: String,
    pub details: HashMap<String, Value>,
}

/// Bridges proxy calls to the pipeline
pub struct ProxyAdapter {
    pipeline: Arc<Pipeline>,
    deadline: Duration,
}

impl ProxyAdapter {
    /// `deadline` bounds every pipeline run started through the adapter
    pub fn new(pipeline: Arc<Pipeline>, deadline: Duration) -> Self {
        Self { pipeline, deadline }
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub async fn process_request(
        &self,
        request: ProxyRequest,
        cancel: &CancellationToken,
    ) -> ProxyVerdict {
        let ctx = request.into_context();
        let request_id = ctx.request_id.clone();
        let token = cancel.child_token();
        let verdict = self
            .bounded(&token, self.pipeline.run_request(ctx, &token))
            .await;
        log_verdict("request", &request_id, &verdict);
        verdict
    }

    pub async fn process_response(
        &self,
        response: ProxyResponse,
        cancel: &CancellationToken,
    ) -> ProxyVerdict {
        let ctx = response.into_context();
        let request_id = ctx.request.request_id.clone();
        let token = cancel.child_token();
        let verdict = self
            .bounded(&token, self.pipeline.run_response(ctx, &token))
            .await;
        log_verdict("response", &request_id, &verdict);
        verdict
    }

    /// Aggregate registry health in proxy terms
    pub async fn health(&self) -> ProxyHealth {
        let report = self.pipeline.registry().health_check().await;
        let status = if report.state == HealthState::Healthy {
            ProxyHealthStatus::Healthy
        } else {
            ProxyHealthStatus::Unhealthy
        };
        let mut details = HashMap::new();
        details.insert("state".to_string(), crate::error::to_json(report.state));
        details.insert("modules".to_string(), Value::from(report.modules.len() as u64));
        let unhealthy: Vec<&str> = report
            .modules
            .iter()
            .filter(|(_, m)| m.health.state != HealthState::Healthy)
            .map(|(name, _)| name.as_str())
            .collect();
        let message = if unhealthy.is_empty() {
            "all modules healthy".to_string()
        } else {
            format!("not healthy: {}", unhealthy.join(", "))
        };
        ProxyHealth {
            status,
            message,
            details,
        }
    }

    async fn bounded<F>(&self, token: &CancellationToken, run: F) -> ProxyVerdict
    where
        F: Future<Output = PipelineOutcome>,
    {
        let started = Instant::now();
        match tokio::time::timeout(self.deadline, run).await {
            Ok(PipelineOutcome::Decision(decision)) => ProxyVerdict::from_decision(decision),
            Ok(PipelineOutcome::Aborted { elapsed, reason }) => {
                ProxyVerdict::aborted(elapsed, &reason)
            }
            Err(_) => {
                token.cancel();
                ProxyVerdict::aborted(
                    started.elapsed(),
                    &format!(
                        "deadline of {} exceeded",
                        humantime::format_duration(self.deadline)
                    ),
                )
            }
        }
    }
}

fn log_verdict(phase: &str, request_id: &str, verdict: &ProxyVerdict) {
    match verdict.action {
        ProxyAction::Continue => info!(
            phase,
            request_id,
            processing_time_ms = verdict.processing_time_ms,
            "Exchange allowed"
        ),
        ProxyAction::Block => warn!(
            phase,
            request_id,
            reason = verdict.block_reason.as_deref().unwrap_or(""),
            processing_time_ms = verdict.processing_time_ms,
            "Exchange blocked"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::HostMetrics;
    use crate::module::mock::{Behavior, MockModule};
    use crate::module::{Module, ModuleConfig, ModuleType, ProcessResult};
    use crate::pipeline::PipelineConfig;
    use crate::registry::ModuleRegistry;

    async fn adapter_with(modules: Vec<MockModule>, deadline: Duration) -> ProxyAdapter {
        let registry = Arc::new(ModuleRegistry::default());
        for (i, module) in modules.into_iter().enumerate() {
            let config = ModuleConfig::new(module.name(), module.module_type()).with_priority(i as i32);
            let name = config.name.clone();
            registry
                .register(Arc::new(module) as Arc<dyn Module>, config)
                .await
                .unwrap();
            registry.activate(&name).await.unwrap();
        }
        let pipeline = Pipeline::new(
            registry,
            PipelineConfig::default(),
            Arc::new(HostMetrics::detached()),
        );
        ProxyAdapter::new(Arc::new(pipeline), deadline)
    }

    fn request() -> ProxyRequest {
        ProxyRequest {
            tenant_id: "acme".into(),
            provider: "openai".into(),
            model: "gpt-4o".into(),
            body: "hello".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_empty_pipeline_continues() {
        let adapter = adapter_with(vec![], Duration::from_secs(1)).await;
        let v = adapter
            .process_request(request(), &CancellationToken::new())
            .await;
        assert_eq!(v.action, ProxyAction::Continue);
        assert!(v.block_reason.is_none());
    }

    #[tokio::test]
    async fn test_transform_forwards_body() {
        let adapter = adapter_with(
            vec![MockModule::new("t", ModuleType::Transformer)
                .returning(ProcessResult::transform("HELLO"))],
            Duration::from_secs(1),
        )
        .await;
        let v = adapter
            .process_request(request(), &CancellationToken::new())
            .await;
        assert_eq!(v.action, ProxyAction::Continue);
        assert_eq!(v.modified_body.as_deref(), Some("HELLO"));
        assert_eq!(v.metadata["pipeline_action"], "transform");
    }

    #[tokio::test]
    async fn test_block_and_retry_map_to_block() {
        let adapter = adapter_with(
            vec![MockModule::new("p", ModuleType::Policy).returning(ProcessResult::block("nope"))],
            Duration::from_secs(1),
        )
        .await;
        let v = adapter
            .process_request(request(), &CancellationToken::new())
            .await;
        assert!(v.is_blocked());
        assert_eq!(v.block_reason.as_deref(), Some("nope"));

        let adapter = adapter_with(
            vec![MockModule::new("r", ModuleType::Policy)
                .returning(ProcessResult::retry("upstream overloaded"))],
            Duration::from_secs(1),
        )
        .await;
        let v = adapter
            .process_request(request(), &CancellationToken::new())
            .await;
        assert!(v.is_blocked());
        assert_eq!(v.metadata["retry"], true);
    }

    #[tokio::test]
    async fn test_route_continues_with_target() {
        let adapter = adapter_with(
            vec![MockModule::new("router", ModuleType::Policy)
                .returning(ProcessResult::route("azure"))],
            Duration::from_secs(1),
        )
        .await;
        let v = adapter
            .process_request(request(), &CancellationToken::new())
            .await;
        assert_eq!(v.action, ProxyAction::Continue);
        assert_eq!(v.metadata["route_target"], "azure");
    }

    #[tokio::test]
    async fn test_cancelled_caller_fails_safe() {
        let adapter = adapter_with(
            vec![MockModule::new("slow", ModuleType::Inspector)
                .behaving(Behavior::Sleep(Duration::from_secs(5)))],
            Duration::from_secs(30),
        )
        .await;
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let v = adapter.process_request(request(), &cancel).await;
        assert!(v.is_blocked());
        assert!(v.block_reason.unwrap().starts_with("pipeline aborted"));
        assert_eq!(v.metadata["aborted"], true);
    }

    #[tokio::test]
    async fn test_deadline_fails_safe() {
        let adapter = adapter_with(
            vec![MockModule::new("slow", ModuleType::Inspector)
                .behaving(Behavior::Sleep(Duration::from_secs(5)))],
            Duration::from_millis(30),
        )
        .await;
        let v = adapter
            .process_request(request(), &CancellationToken::new())
            .await;
        assert!(v.is_blocked());
        assert!(v.block_reason.unwrap().contains("deadline"));
    }

    #[tokio::test]
    async fn test_response_phase_keeps_request_annotations() {
        let adapter = adapter_with(vec![], Duration::from_secs(1)).await;
        let mut annotations = HashMap::new();
        annotations.insert("pii.score".to_string(), Value::from(0.5));
        let response = ProxyResponse {
            request: request(),
            status_code: 200,
            response_headers: HashMap::new(),
            response_body: "{}".into(),
            provider_latency_ms: 10,
            total_latency_ms: 12,
            usage: None,
            annotations,
        };
        let v = adapter
            .process_response(response, &CancellationToken::new())
            .await;
        assert_eq!(v.action, ProxyAction::Continue);
    }

    #[tokio::test]
    async fn test_health_reports_unhealthy_required_module() {
        let adapter = adapter_with(
            vec![MockModule::new("p", ModuleType::Policy)],
            Duration::from_secs(1),
        )
        .await;
        assert_eq!(adapter.health().await.status, ProxyHealthStatus::Healthy);

        let registry = adapter.pipeline().registry().clone();
        let entry = registry.get("p").await.unwrap();
        entry.tracker().fail("boom");
        let health = adapter.health().await;
        assert_eq!(health.status, ProxyHealthStatus::Unhealthy);
        assert!(health.message.contains('p'));
    }

    #[test]
    fn test_request_defaults_fill_in() {
        let ctx = ProxyRequest::default().into_context();
        assert!(!ctx.request_id.is_empty());
        assert_eq!(ctx.method, "POST");
        assert_eq!(ctx.path, "/");
    }
}
