//! Request/response contexts, per-module results and the `Action` verdict

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Per-module or pipeline-level verdict.
///
/// Variants are declared in ascending severity, so the derived `Ord` is the
/// total order used to fold results:
/// `Block > Route > Retry > Transform > Annotate > Continue`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Let the exchange through unchanged
    #[default]
    Continue,
    /// Let through, with annotations attached
    Annotate,
    /// Let through with body/header mutations
    Transform,
    /// Ask the caller to retry (redo routing) before continuing
    Retry,
    /// Ask the caller to route to another target
    Route,
    /// Refuse the exchange
    Block,
}

impl Action {
    /// Whether the pipeline stops at this action
    pub fn short_circuits(self) -> bool {
        matches!(self, Action::Retry | Action::Route | Action::Block)
    }

    /// Whether this action lets traffic through as-is or transformed
    pub fn is_allow(self) -> bool {
        matches!(self, Action::Continue | Action::Annotate | Action::Transform)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::Continue => "continue",
            Action::Annotate => "annotate",
            Action::Transform => "transform",
            Action::Retry => "retry",
            Action::Route => "route",
            Action::Block => "block",
        };
        f.write_str(s)
    }
}

/// Snapshot of one inbound request.
///
/// Modules receive it by reference; the pipeline hands each module a copy that
/// reflects the annotations and transformations of earlier modules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessRequestContext {
    pub request_id: String,
    pub tenant_id: String,
    pub provider: String,
    pub model: String,
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: String,
    /// Client metadata (ip, user agent, api key id, ...)
    pub client: HashMap<String, String>,
    /// Annotations accumulated across modules, keyed `<module>.<key>`
    pub annotations: HashMap<String, Value>,
}

impl Default for ProcessRequestContext {
    fn default() -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            tenant_id: String::new(),
            provider: String::new(),
            model: String::new(),
            timestamp: Utc::now(),
            method: "POST".to_string(),
            path: "/".to_string(),
            headers: HashMap::new(),
            body: String::new(),
            client: HashMap::new(),
            annotations: HashMap::new(),
        }
    }
}

impl ProcessRequestContext {
    /// Create a context for a tenant's call to a provider/model
    pub fn new(
        tenant_id: impl Into<String>,
        provider: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            provider: provider.into(),
            model: model.into(),
            ..Default::default()
        }
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = id.into();
        self
    }

    pub fn with_path(mut self, method: impl Into<String>, path: impl Into<String>) -> Self {
        self.method = method.into();
        self.path = path.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_client(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.client.insert(key.into(), value.into());
        self
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        lookup_header(&self.headers, name)
    }
}

pub(crate) fn lookup_header<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Token and cost accounting reported by the provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub cost_usd: Option<f64>,
}

/// Snapshot of one provider response, enriched with latency and usage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessResponseContext {
    #[serde(flatten)]
    pub request: ProcessRequestContext,
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
}

fn default_status() -> u16 {
    200
}

impl ProcessResponseContext {
    /// Create a response context for a request
    pub fn new(request: ProcessRequestContext, status_code: u16) -> Self {
        Self {
            request,
            status_code,
            response_headers: HashMap::new(),
            response_body: String::new(),
            provider_latency_ms: 0,
            total_latency_ms: 0,
            usage: None,
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.response_body = body.into();
        self
    }

    pub fn with_latency(mut self, provider_ms: u64, total_ms: u64) -> Self {
        self.provider_latency_ms = provider_ms;
        self.total_latency_ms = total_ms;
        self
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Case-insensitive response header lookup
    pub fn response_header(&self, name: &str) -> Option<&str> {
        lookup_header(&self.response_headers, name)
    }
}

/// Result a module returns for one request or response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessResult {
    pub action: Action,
    pub modified_body: Option<String>,
    /// Headers to add or overwrite
    pub modified_headers: HashMap<String, String>,
    pub block_reason: Option<String>,
    pub annotations: HashMap<String, Value>,
    pub processing_time: Duration,
    pub confidence: Option<f64>,
    pub metadata: HashMap<String, Value>,
}

/// Result of `process_request`
pub type ProcessRequestResult = ProcessResult;

/// Result of `process_response`
pub type ProcessResponseResult = ProcessResult;

impl ProcessResult {
    /// Let the exchange through
    pub fn allow() -> Self {
        Self::default()
    }

    /// Refuse the exchange
    pub fn block(reason: impl Into<String>) -> Self {
        Self {
            action: Action::Block,
            block_reason: Some(reason.into()),
            ..Default::default()
        }
    }

    /// Let through with one annotation
    pub fn annotate(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            action: Action::Annotate,
            ..Default::default()
        }
        .with_annotation(key, value)
    }

    /// Replace the body seen by later modules and the upstream
    pub fn transform(body: impl Into<String>) -> Self {
        Self {
            action: Action::Transform,
            modified_body: Some(body.into()),
            ..Default::default()
        }
    }

    /// Ask the caller to route elsewhere
    pub fn route(target: impl Into<String>) -> Self {
        Self {
            action: Action::Route,
            ..Default::default()
        }
        .with_metadata("route_target", target.into())
    }

    /// Ask the caller to retry
    pub fn retry(reason: impl Into<String>) -> Self {
        Self {
            action: Action::Retry,
            ..Default::default()
        }
        .with_metadata("retry_reason", reason.into())
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.modified_headers.insert(name.into(), value.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence.clamp(0.0, 1.0));
        self
    }

    pub fn with_processing_time(mut self, elapsed: Duration) -> Self {
        self.processing_time = elapsed;
        self
    }

    /// Whether the result carries a body or header mutation
    pub fn has_mutation(&self) -> bool {
        self.modified_body.is_some() || !self.modified_headers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_severity_order() {
        assert!(Action::Block > Action::Route);
        assert!(Action::Route > Action::Retry);
        assert!(Action::Retry > Action::Transform);
        assert!(Action::Transform > Action::Annotate);
        assert!(Action::Annotate > Action::Continue);
        let folded = [Action::Annotate, Action::Continue, Action::Transform]
            .into_iter()
            .max()
            .unwrap();
        assert_eq!(folded, Action::Transform);
    }

    #[test]
    fn test_short_circuit_actions() {
        assert!(Action::Block.short_circuits());
        assert!(Action::Route.short_circuits());
        assert!(Action::Retry.short_circuits());
        assert!(!Action::Transform.short_circuits());
        assert!(Action::Transform.is_allow());
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let ctx = ProcessRequestContext::new("acme", "openai", "gpt-4o")
            .with_header("X-Api-Key", "k1");
        assert_eq!(ctx.header("x-api-key"), Some("k1"));
        assert_eq!(ctx.header("missing"), None);
    }

    #[test]
    fn test_response_context_flattens_request() {
        let req = ProcessRequestContext::new("acme", "anthropic", "claude")
            .with_request_id("req-1");
        let resp = ProcessResponseContext::new(req, 200).with_latency(120, 150);
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["request_id"], "req-1");
        assert_eq!(json["tenant_id"], "acme");
        assert_eq!(json["total_latency_ms"], 150);

        let back: ProcessResponseContext = serde_json::from_value(json).unwrap();
        assert_eq!(back.request.provider, "anthropic");
    }

    #[test]
    fn test_result_builders() {
        let r = ProcessResult::block("nope");
        assert_eq!(r.action, Action::Block);
        assert_eq!(r.block_reason.as_deref(), Some("nope"));

        let r = ProcessResult::route("backup-pool");
        assert_eq!(r.metadata["route_target"], "backup-pool");

        let r = ProcessResult::allow().with_header("x-a", "1");
        assert!(r.has_mutation());
        assert_eq!(r.with_confidence(3.0).confidence, Some(1.0));
    }
}
