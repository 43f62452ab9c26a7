//! Pipeline engine
//!
//! Runs the registry's executable modules in priority order over one request
//! or response and folds their results into a single [`PipelineDecision`].
//!
//! Per module: conditions gate the call, the call is bounded by the module's
//! processing timeout, panics are caught, and failures are resolved through
//! the module type's [`FailureMode`]. `Retry`, `Route` and `Block` stop the
//! run. Cancelling the token aborts the run without a decision.

mod decision;
mod exchange;

pub use decision::{PipelineDecision, PipelineOutcome};

use crate::metrics::HostMetrics;
use crate::module::{
    Action, FailureMode, ProcessRequestContext, ProcessResponseContext, ProcessResult,
};
use crate::registry::{ModuleRegistry, RegisteredModule};
use exchange::Exchange;
use futures::FutureExt;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Pipeline settings
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Used for modules that configure no processing timeout
    pub default_processing_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_processing_timeout: Duration::from_secs(5),
        }
    }
}

/// How one module invocation ended when it did not produce a result
#[derive(Debug)]
enum Failure {
    Error(String),
    Timeout(Duration),
    Panic(String),
}

impl Failure {
    fn label(&self) -> &'static str {
        match self {
            Failure::Error(_) => "error",
            Failure::Timeout(_) => "timeout",
            Failure::Panic(_) => "panic",
        }
    }

    fn reason(&self) -> String {
        match self {
            Failure::Error(e) => e.clone(),
            Failure::Timeout(d) => format!("timed out after {}", humantime::format_duration(*d)),
            Failure::Panic(msg) => format!("panicked: {}", msg),
        }
    }
}

enum Step {
    Done(Result<ProcessResult, Failure>, Duration),
    Cancelled,
}

/// The pipeline engine
pub struct Pipeline {
    registry: Arc<ModuleRegistry>,
    config: PipelineConfig,
    metrics: Arc<HostMetrics>,
}

impl Pipeline {
    pub fn new(
        registry: Arc<ModuleRegistry>,
        config: PipelineConfig,
        metrics: Arc<HostMetrics>,
    ) -> Self {
        Self {
            registry,
            config,
            metrics,
        }
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    /// Run every executable module's `process_request`
    pub async fn run_request(
        &self,
        ctx: ProcessRequestContext,
        cancel: &CancellationToken,
    ) -> PipelineOutcome {
        self.run(ctx, cancel).await
    }

    /// Run every executable module's `process_response`
    pub async fn run_response(
        &self,
        ctx: ProcessResponseContext,
        cancel: &CancellationToken,
    ) -> PipelineOutcome {
        self.run(ctx, cancel).await
    }

    async fn run<C: Exchange>(&self, mut ctx: C, cancel: &CancellationToken) -> PipelineOutcome {
        let started = Instant::now();
        let modules = self.registry.executable().await;
        let mut decision = PipelineDecision::default();

        for entry in modules {
            if cancel.is_cancelled() {
                return self.abort::<C>(started, "cancelled by caller");
            }
            let name = entry.name().to_string();

            if !entry.conditions().matches(&ctx) {
                debug!(module = %name, phase = C::PHASE, "Conditions not met, skipping");
                self.metrics.record_invocation(&name, "skipped", None);
                decision.modules_skipped.push(name);
                continue;
            }

            let (result, elapsed) = match self.invoke(&entry, &ctx, cancel).await {
                Some(Step::Done(result, elapsed)) => (result, elapsed),
                Some(Step::Cancelled) => {
                    self.metrics.record_invocation(&name, "cancelled", None);
                    return self.abort::<C>(started, &format!("cancelled during module '{}'", name));
                }
                None => {
                    debug!(module = %name, "Module left the executable set, skipping");
                    continue;
                }
            };
            decision.modules_invoked.push(name.clone());
            decision.processing_time += elapsed;

            match result {
                Ok(result) => {
                    entry.tracker().record_success(elapsed);
                    self.metrics.record_invocation(&name, "ok", Some(elapsed));
                    if self.fold(&mut decision, &mut ctx, &name, normalize(&name, result)) {
                        break;
                    }
                }
                Err(failure) => {
                    let reason = failure.reason();
                    entry.tracker().record_failure(elapsed, reason.clone());
                    self.metrics
                        .record_invocation(&name, failure.label(), Some(elapsed));
                    decision
                        .metadata
                        .insert(format!("failures.{}", name), Value::String(reason.clone()));

                    match entry.config().failure_mode() {
                        FailureMode::Closed => {
                            error!(
                                module = %name,
                                phase = C::PHASE,
                                error = %reason,
                                "Fail-closed module failed, blocking"
                            );
                            decision.action = Action::Block;
                            decision.block_reason =
                                Some(format!("module '{}' failed: {}", name, reason));
                            decision
                                .metadata
                                .insert("blocked_by".to_string(), Value::String(name));
                            break;
                        }
                        FailureMode::Open => {
                            warn!(
                                module = %name,
                                phase = C::PHASE,
                                error = %reason,
                                "Fail-open module failed, continuing"
                            );
                        }
                    }
                }
            }
        }

        decision.elapsed = started.elapsed();
        self.metrics
            .record_run(C::PHASE, &decision.action.to_string(), decision.elapsed);
        debug!(
            phase = C::PHASE,
            action = %decision.action,
            invoked = decision.modules_invoked.len(),
            elapsed_ms = decision.elapsed.as_millis() as u64,
            "Pipeline finished"
        );
        PipelineOutcome::Decision(decision)
    }

    /// Invoke one module under its gate, deadline and panic guard.
    ///
    /// `None` means the module was drained while waiting for its gate.
    async fn invoke<C: Exchange>(
        &self,
        entry: &RegisteredModule,
        ctx: &C,
        cancel: &CancellationToken,
    ) -> Option<Step> {
        let _shared = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Some(Step::Cancelled),
            guard = entry.gate().read() => guard,
        };
        if !entry.is_executable() {
            return None;
        }

        let limit = entry
            .config()
            .processing_timeout(self.config.default_processing_timeout);
        let started = Instant::now();
        let call = AssertUnwindSafe(C::invoke(entry.module().as_ref(), ctx)).catch_unwind();

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Some(Step::Cancelled),
            outcome = tokio::time::timeout(limit, call) => outcome,
        };
        let elapsed = started.elapsed();

        let result = match outcome {
            Ok(Ok(Ok(result))) => Ok(result),
            Ok(Ok(Err(e))) => Err(Failure::Error(e.to_string())),
            Ok(Err(payload)) => Err(Failure::Panic(panic_message(payload.as_ref()))),
            Err(_) => Err(Failure::Timeout(limit)),
        };
        Some(Step::Done(result, elapsed))
    }

    /// Merge one module result. Returns true when the run must stop.
    fn fold<C: Exchange>(
        &self,
        decision: &mut PipelineDecision,
        ctx: &mut C,
        module: &str,
        result: ProcessResult,
    ) -> bool {
        for (key, value) in result.annotations {
            let key = namespaced(module, &key);
            ctx.annotations_mut().insert(key.clone(), value.clone());
            decision.annotations.insert(key, value);
        }
        for (key, value) in result.metadata {
            if is_reserved_metadata(&key) {
                warn!(module = %module, key = %key, "Dropping module metadata under a reserved key");
                continue;
            }
            decision.metadata.insert(key, value);
        }

        if result.action == Action::Transform {
            if let Some(body) = result.modified_body {
                ctx.replace_body(body.clone());
                decision.modified_body = Some(body);
            }
            for (name, value) in result.modified_headers {
                let headers = ctx.headers_mut();
                headers.retain(|k, _| !k.eq_ignore_ascii_case(&name));
                headers.insert(name.clone(), value.clone());
                decision
                    .modified_headers
                    .retain(|k, _| !k.eq_ignore_ascii_case(&name));
                decision.modified_headers.insert(name, value);
            }
        }

        decision.action = decision.action.max(result.action);
        if result.action == Action::Block {
            decision.block_reason = result.block_reason;
            decision
                .metadata
                .insert("blocked_by".to_string(), Value::String(module.to_string()));
        }
        if result.action.short_circuits() {
            debug!(module = %module, action = %result.action, "Pipeline short-circuited");
            return true;
        }
        false
    }

    fn abort<C: Exchange>(&self, started: Instant, reason: &str) -> PipelineOutcome {
        let elapsed = started.elapsed();
        self.metrics.record_run(C::PHASE, "aborted", elapsed);
        warn!(phase = C::PHASE, reason = %reason, "Pipeline aborted");
        PipelineOutcome::Aborted {
            elapsed,
            reason: reason.to_string(),
        }
    }
}

/// Repair results that do not satisfy their own action
fn normalize(module: &str, mut result: ProcessResult) -> ProcessResult {
    match result.action {
        Action::Block if result.block_reason.as_deref().map_or(true, str::is_empty) => {
            result.block_reason = Some(format!("blocked by {}", module));
        }
        Action::Transform if !result.has_mutation() => {
            warn!(module = %module, "Transform without mutation, treating as continue");
            result.action = Action::Continue;
        }
        _ => {}
    }
    result
}

/// Keys the pipeline writes itself when recording failures and blocks
fn is_reserved_metadata(key: &str) -> bool {
    key == "blocked_by" || key.starts_with("failures.")
}

fn namespaced(module: &str, key: &str) -> String {
    match key.strip_prefix(module) {
        Some(rest) if rest.starts_with('.') => key.to_string(),
        _ => format!("{}.{}", module, key),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
