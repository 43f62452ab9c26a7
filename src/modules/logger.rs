//! Audit logger sink
//!
//! Writes one JSON line per exchange to every configured destination. The
//! logger never affects the verdict: destination failures are counted,
//! remembered for health reporting and otherwise swallowed.

use super::redaction::{redact_fields, redact_headers, Redactor};
use crate::config::duration_format;
use crate::error::{ModuleError, ModuleResult};
use crate::module::{
    HealthStatus, Module, ModuleConfig, ModuleMetrics, ModuleRuntime, ModuleState, ModuleStatus,
    ModuleType, ProcessRequestContext, ProcessRequestResult, ProcessResponseContext,
    ProcessResponseResult, ProcessResult, TokenUsage,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Implementation id used by the built-in factory
pub const IMPLEMENTATION: &str = "logger";

/// Where audit records go
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", deny_unknown_fields)]
pub enum Destination {
    Stdout,
    /// Append JSON lines to a file
    File { path: PathBuf },
    /// POST each record as a JSON body
    Http {
        url: String,
        #[serde(default, with = "duration_format::option")]
        timeout: Option<Duration>,
    },
}

impl Destination {
    fn label(&self) -> String {
        match self {
            Destination::Stdout => "stdout".to_string(),
            Destination::File { path } => format!("file:{}", path.display()),
            Destination::Http { url, .. } => format!("http:{}", url),
        }
    }

    fn validate(&self) -> Result<(), String> {
        match self {
            Destination::Stdout => Ok(()),
            Destination::File { path } if path.as_os_str().is_empty() => {
                Err("file destination requires a path".to_string())
            }
            Destination::File { .. } => Ok(()),
            Destination::Http { url, .. } => match reqwest::Url::parse(url) {
                Ok(u) if matches!(u.scheme(), "http" | "https") => Ok(()),
                Ok(u) => Err(format!("unsupported scheme '{}' in {}", u.scheme(), url)),
                Err(e) => Err(format!("invalid url '{}': {}", url, e)),
            },
        }
    }
}

/// Module options (`config` table of the module entry)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggerOptions {
    pub destinations: Vec<Destination>,
    /// Header names and JSON body keys replaced by `[REDACTED]`
    pub redact_fields: Vec<String>,
    /// Regex PII scrubbing of bodies
    pub redact_pii: bool,
    pub include_bodies: bool,
    /// Also write a record for every request phase
    pub log_requests: bool,
}

impl Default for LoggerOptions {
    fn default() -> Self {
        Self {
            destinations: vec![Destination::Stdout],
            redact_fields: vec!["authorization".to_string(), "api_key".to_string()],
            redact_pii: false,
            include_bodies: false,
            log_requests: false,
        }
    }
}

const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(5);

struct Settings {
    options: LoggerOptions,
    redactor: Option<Redactor>,
}

impl Settings {
    fn from_config(config: &ModuleConfig) -> Result<Self, String> {
        let options: LoggerOptions = config.options()?;
        if options.destinations.is_empty() {
            return Err("at least one destination is required".to_string());
        }
        for destination in &options.destinations {
            destination.validate()?;
        }
        let redactor = options.redact_pii.then(Redactor::with_defaults);
        Ok(Self { options, redactor })
    }

    fn body(&self, raw: &str) -> Option<Value> {
        if !self.options.include_bodies || raw.is_empty() {
            return None;
        }
        let mut value = serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        redact_fields(&mut value, &self.options.redact_fields);
        if let Some(redactor) = &self.redactor {
            redactor.redact_value(&mut value);
        }
        Some(value)
    }
}

/// One line of audit output
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub phase: &'static str,
    pub request_id: String,
    pub tenant_id: String,
    pub provider: String,
    pub model: String,
    pub method: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    pub headers: HashMap<String, String>,
    pub annotations: HashMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_body: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_body: Option<Value>,
}

impl AuditRecord {
    fn request(ctx: &ProcessRequestContext, settings: &Settings) -> Self {
        Self {
            timestamp: Utc::now(),
            phase: "request",
            request_id: ctx.request_id.clone(),
            tenant_id: ctx.tenant_id.clone(),
            provider: ctx.provider.clone(),
            model: ctx.model.clone(),
            method: ctx.method.clone(),
            path: ctx.path.clone(),
            status_code: None,
            provider_latency_ms: None,
            total_latency_ms: None,
            usage: None,
            headers: redact_headers(&ctx.headers, &settings.options.redact_fields),
            annotations: ctx.annotations.clone(),
            request_body: settings.body(&ctx.body),
            response_body: None,
        }
    }

    fn response(ctx: &ProcessResponseContext, settings: &Settings) -> Self {
        Self {
            phase: "response",
            status_code: Some(ctx.status_code),
            provider_latency_ms: Some(ctx.provider_latency_ms),
            total_latency_ms: Some(ctx.total_latency_ms),
            usage: ctx.usage.clone(),
            response_body: settings.body(&ctx.response_body),
            ..Self::request(&ctx.request, settings)
        }
    }
}

/// JSON-lines audit sink
pub struct LoggerModule {
    name: String,
    runtime: ModuleRuntime,
    config: RwLock<ModuleConfig>,
    settings: RwLock<Option<Arc<Settings>>>,
    client: reqwest::Client,
    written: AtomicU64,
    write_failures: AtomicU64,
    /// Destinations whose last write failed, with the reason
    failing: Mutex<BTreeMap<String, String>>,
}

impl LoggerModule {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            runtime: ModuleRuntime::new(name.clone()),
            config: RwLock::new(ModuleConfig::new(name.clone(), ModuleType::Sink)),
            name,
            settings: RwLock::new(None),
            client: reqwest::Client::new(),
            written: AtomicU64::new(0),
            write_failures: AtomicU64::new(0),
            failing: Mutex::new(BTreeMap::new()),
        }
    }

    fn settings(&self) -> ModuleResult<Arc<Settings>> {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| ModuleError::NotRunning {
                module: self.name.clone(),
                state: "uninitialized".to_string(),
            })
    }

    fn apply(&self, config: ModuleConfig) -> ModuleResult<()> {
        let settings = Settings::from_config(&config)
            .map_err(|reason| ModuleError::invalid_config(&self.name, reason))?;
        *self.settings.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(settings));
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        Ok(())
    }

    async fn write(&self, destination: &Destination, line: &str) -> ModuleResult<()> {
        let failed = |reason: String| ModuleError::Destination {
            destination: destination.label(),
            reason,
        };
        match destination {
            Destination::Stdout => {
                let mut buf = Vec::with_capacity(line.len() + 1);
                buf.extend_from_slice(line.as_bytes());
                buf.push(b'\n');
                let mut out = tokio::io::stdout();
                out.write_all(&buf).await.map_err(|e| failed(e.to_string()))?;
                out.flush().await.map_err(|e| failed(e.to_string()))
            }
            Destination::File { path } => {
                let mut file = tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .await
                    .map_err(|e| failed(e.to_string()))?;
                let mut buf = Vec::with_capacity(line.len() + 1);
                buf.extend_from_slice(line.as_bytes());
                buf.push(b'\n');
                file.write_all(&buf).await.map_err(|e| failed(e.to_string()))?;
                file.flush().await.map_err(|e| failed(e.to_string()))
            }
            Destination::Http { url, timeout } => {
                let response = self
                    .client
                    .post(url)
                    .header("content-type", "application/json")
                    .body(line.to_string())
                    .timeout(timeout.unwrap_or(DEFAULT_HTTP_TIMEOUT))
                    .send()
                    .await
                    .map_err(|e| failed(e.to_string()))?;
                if response.status().is_success() {
                    Ok(())
                } else {
                    Err(failed(format!("HTTP {}", response.status())))
                }
            }
        }
    }

    /// Write the record everywhere; failures are recorded, never returned
    async fn emit(&self, settings: &Settings, record: &AuditRecord) {
        let started = Instant::now();
        let line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(e) => {
                self.runtime
                    .record_failure(started.elapsed(), format!("serialize audit record: {}", e));
                return;
            }
        };

        let mut errors = Vec::new();
        for destination in &settings.options.destinations {
            let label = destination.label();
            match self.write(destination, &line).await {
                Ok(()) => {
                    self.written.fetch_add(1, Ordering::Relaxed);
                    self.failing
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .remove(&label);
                }
                Err(e) => {
                    self.write_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        module = %self.name,
                        destination = %label,
                        request_id = %record.request_id,
                        error = %e,
                        "Audit write failed"
                    );
                    self.failing
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(label, e.to_string());
                    errors.push(e.to_string());
                }
            }
        }

        if errors.is_empty() {
            debug!(module = %self.name, request_id = %record.request_id, phase = record.phase, "Audit record written");
            self.runtime.record_success(started.elapsed());
        } else {
            self.runtime
                .record_failure(started.elapsed(), errors.join("; "));
        }
    }
}

#[async_trait]
impl Module for LoggerModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn module_type(&self) -> ModuleType {
        ModuleType::Sink
    }

    fn description(&self) -> &str {
        "JSON-lines audit logging of requests and responses"
    }

    fn author(&self) -> &str {
        "modhost"
    }

    async fn initialize(&self, config: ModuleConfig) -> ModuleResult<()> {
        self.runtime.transition(ModuleState::Initializing)?;
        if let Err(e) = self.apply(config) {
            self.runtime.fail(e.to_string());
            return Err(e);
        }
        if let Ok(settings) = self.settings() {
            info!(
                module = %self.name,
                destinations = settings.options.destinations.len(),
                redact_pii = settings.options.redact_pii,
                "Audit logger configured"
            );
        }
        self.runtime.transition(ModuleState::Ready)
    }

    async fn start(&self) -> ModuleResult<()> {
        self.runtime.transition(ModuleState::Running)
    }

    async fn stop(&self) -> ModuleResult<()> {
        self.runtime.transition(ModuleState::Draining)?;
        self.runtime.transition(ModuleState::Stopped)
    }

    async fn shutdown(&self) -> ModuleResult<()> {
        self.runtime.transition(ModuleState::Stopped)
    }

    async fn health(&self) -> HealthStatus {
        match self.runtime.state() {
            ModuleState::Running | ModuleState::Ready => {}
            other => return HealthStatus::unhealthy(format!("logger is {}", other)),
        }
        let failing = self
            .failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if failing.is_empty() {
            HealthStatus::healthy("all destinations writable")
        } else {
            let detail: serde_json::Map<String, Value> = failing
                .into_iter()
                .map(|(k, v)| (k, Value::String(v)))
                .collect();
            HealthStatus::degraded(format!("{} destination(s) failing", detail.len()))
                .with_detail("failing", Value::Object(detail))
        }
    }

    fn status(&self) -> ModuleStatus {
        self.runtime.status()
    }

    fn metrics(&self) -> ModuleMetrics {
        let mut m = ModuleMetrics::new();
        m.insert("records_written".into(), self.written.load(Ordering::Relaxed) as f64);
        m.insert(
            "write_failures".into(),
            self.write_failures.load(Ordering::Relaxed) as f64,
        );
        m
    }

    async fn process_request(
        &self,
        ctx: &ProcessRequestContext,
    ) -> ModuleResult<ProcessRequestResult> {
        self.runtime.ensure_running()?;
        let settings = self.settings()?;
        if settings.options.log_requests {
            self.emit(&settings, &AuditRecord::request(ctx, &settings))
                .await;
        }
        Ok(ProcessResult::allow())
    }

    async fn process_response(
        &self,
        ctx: &ProcessResponseContext,
    ) -> ModuleResult<ProcessResponseResult> {
        self.runtime.ensure_running()?;
        let settings = self.settings()?;
        self.emit(&settings, &AuditRecord::response(ctx, &settings))
            .await;
        Ok(ProcessResult::allow())
    }

    fn validate_config(&self, config: &ModuleConfig) -> ModuleResult<()> {
        Settings::from_config(config)
            .map(|_| ())
            .map_err(|reason| ModuleError::invalid_config(&self.name, reason))
    }

    async fn update_config(&self, config: ModuleConfig) -> ModuleResult<()> {
        self.apply(config)
    }

    fn get_config(&self) -> ModuleConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{Action, HealthState};
    use serde_json::json;

    fn file_config(path: &std::path::Path) -> ModuleConfig {
        ModuleConfig::new("logger", ModuleType::Sink).with_option(
            "destinations",
            json!([{"type": "file", "path": path.to_string_lossy()}]),
        )
    }

    async fn running(config: ModuleConfig) -> LoggerModule {
        let m = LoggerModule::new("logger");
        m.initialize(config).await.unwrap();
        m.start().await.unwrap();
        m
    }

    fn exchange() -> ProcessResponseContext {
        let request = ProcessRequestContext::new("acme", "openai", "gpt-4o")
            .with_request_id("req-1")
            .with_header("Authorization", "Bearer sk-secret")
            .with_body(r#"{"api_key":"k","prompt":"mail bob@example.com"}"#);
        ProcessResponseContext::new(request, 200)
            .with_body(r#"{"text":"ok"}"#)
            .with_latency(120, 135)
    }

    fn lines(path: &std::path::Path) -> Vec<Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_writes_response_record_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let m = running(file_config(&path)).await;

        let result = m.process_response(&exchange()).await.unwrap();
        assert_eq!(result.action, Action::Continue);

        let records = lines(&path);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["phase"], "response");
        assert_eq!(records[0]["request_id"], "req-1");
        assert_eq!(records[0]["status_code"], 200);
        assert_eq!(records[0]["headers"]["Authorization"], "[REDACTED]");
        assert!(records[0].get("request_body").is_none());
        assert_eq!(m.status().requests_processed, 1);
        assert_eq!(m.status().error_count, 0);
    }

    #[tokio::test]
    async fn test_concurrent_stdout_records_all_written() {
        let cfg = ModuleConfig::new("logger", ModuleType::Sink)
            .with_option("destinations", json!([{"type": "stdout"}]));
        let m = running(cfg).await;
        let ctx = exchange();

        futures::future::join_all((0..8).map(|_| m.process_response(&ctx))).await;

        assert_eq!(m.metrics()["records_written"], 8.0);
        assert_eq!(m.metrics()["write_failures"], 0.0);
        assert_eq!(m.health().await.state, HealthState::Healthy);
    }

    #[tokio::test]
    async fn test_bodies_are_redacted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let cfg = file_config(&path)
            .with_option("include_bodies", true)
            .with_option("redact_pii", true)
            .with_option("redact_fields", json!(["api_key", "authorization"]));
        let m = running(cfg).await;
        m.process_response(&exchange()).await.unwrap();

        let record = &lines(&path)[0];
        assert_eq!(record["request_body"]["api_key"], "[REDACTED]");
        assert_eq!(record["request_body"]["prompt"], "mail ****@example.com");
        assert_eq!(record["response_body"]["text"], "ok");
    }

    #[tokio::test]
    async fn test_failed_destination_is_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("audit.log");
        let m = running(file_config(&path)).await;

        let result = m.process_response(&exchange()).await.unwrap();
        assert_eq!(result.action, Action::Continue);
        assert_eq!(m.status().error_count, 1);
        assert_eq!(m.metrics()["write_failures"], 1.0);

        let health = m.health().await;
        assert_eq!(health.state, HealthState::Degraded);
        assert!(health.details.contains_key("failing"));
    }

    #[tokio::test]
    async fn test_request_phase_only_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let request = exchange().request;

        let quiet = running(file_config(&path)).await;
        quiet.process_request(&request).await.unwrap();
        assert!(!path.exists());

        let verbose = running(file_config(&path).with_option("log_requests", true)).await;
        verbose.process_request(&request).await.unwrap();
        assert_eq!(lines(&path)[0]["phase"], "request");
    }

    #[test]
    fn test_validate_config() {
        let m = LoggerModule::new("logger");
        let base = ModuleConfig::new("logger", ModuleType::Sink);
        assert!(m.validate_config(&base).is_ok());
        assert!(m
            .validate_config(&base.clone().with_option("destinations", json!([])))
            .is_err());
        assert!(m
            .validate_config(&base.clone().with_option(
                "destinations",
                json!([{"type": "http", "url": "ftp://example.com"}])
            ))
            .is_err());
        assert!(m
            .validate_config(&base.with_option("destinations", json!([{"type": "kafka"}])))
            .is_err());
    }

    #[tokio::test]
    async fn test_reload_clears_failing_destinations() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("missing").join("audit.log");
        let good = dir.path().join("audit.log");
        let m = running(file_config(&bad)).await;
        m.process_response(&exchange()).await.unwrap();
        assert_eq!(m.health().await.state, HealthState::Degraded);

        m.update_config(file_config(&good)).await.unwrap();
        assert_eq!(m.health().await.state, HealthState::Healthy);
        m.process_response(&exchange()).await.unwrap();
        assert_eq!(lines(&good).len(), 1);
        assert_eq!(m.status().error_count, 1);
    }
}
