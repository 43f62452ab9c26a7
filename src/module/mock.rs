//! Scriptable module used by unit tests across the crate

use super::{
    HealthState, HealthStatus, Module, ModuleConfig, ModuleRuntime, ModuleState, ModuleStatus,
    ModuleType, ProcessRequestContext, ProcessRequestResult, ProcessResponseContext,
    ProcessResponseResult, ProcessResult,
};
use crate::error::{ModuleError, ModuleResult};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub(crate) enum Behavior {
    Return(ProcessResult),
    Fail(String),
    Panic,
    Sleep(Duration),
}

pub(crate) struct MockModule {
    name: String,
    module_type: ModuleType,
    dependencies: Vec<String>,
    api_version: String,
    runtime: ModuleRuntime,
    config: Mutex<ModuleConfig>,
    behavior: Mutex<Behavior>,
    health: Mutex<HealthState>,
    fail_init: bool,
    reject_config: Option<String>,
    update_delay: Duration,
    pub calls: AtomicU64,
    pub last_body: Mutex<Option<String>>,
}

impl MockModule {
    pub fn new(name: &str, module_type: ModuleType) -> Self {
        Self {
            name: name.to_string(),
            module_type,
            dependencies: Vec::new(),
            api_version: super::MODULE_API_VERSION.to_string(),
            runtime: ModuleRuntime::new(name),
            config: Mutex::new(ModuleConfig::new(name, module_type)),
            behavior: Mutex::new(Behavior::Return(ProcessResult::allow())),
            health: Mutex::new(HealthState::Healthy),
            fail_init: false,
            reject_config: None,
            update_delay: Duration::ZERO,
            calls: AtomicU64::new(0),
            last_body: Mutex::new(None),
        }
    }

    pub fn returning(self, result: ProcessResult) -> Self {
        self.set_behavior(Behavior::Return(result));
        self
    }

    pub fn behaving(self, behavior: Behavior) -> Self {
        self.set_behavior(behavior);
        self
    }

    pub fn depends_on(mut self, dep: &str) -> Self {
        self.dependencies.push(dep.to_string());
        self
    }

    pub fn with_api_version(mut self, v: &str) -> Self {
        self.api_version = v.to_string();
        self
    }

    pub fn failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    pub fn rejecting_config(mut self, reason: &str) -> Self {
        self.reject_config = Some(reason.to_string());
        self
    }

    pub fn slow_reconfigure(mut self, delay: Duration) -> Self {
        self.update_delay = delay;
        self
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn set_health(&self, state: HealthState) {
        *self.health.lock().unwrap() = state;
    }

    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn runtime(&self) -> &ModuleRuntime {
        &self.runtime
    }

    async fn run(&self, body: &str) -> ModuleResult<ProcessResult> {
        self.runtime.ensure_running()?;
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_body.lock().unwrap() = Some(body.to_string());
        let started = Instant::now();
        let behavior = self.behavior.lock().unwrap().clone();
        match behavior {
            Behavior::Return(result) => {
                self.runtime.record_success(started.elapsed());
                Ok(result)
            }
            Behavior::Fail(reason) => {
                self.runtime.record_failure(started.elapsed(), reason.clone());
                Err(ModuleError::processing(&self.name, reason))
            }
            Behavior::Panic => panic!("mock module '{}' panicked", self.name),
            Behavior::Sleep(d) => {
                tokio::time::sleep(d).await;
                self.runtime.record_success(started.elapsed());
                Ok(ProcessResult::allow())
            }
        }
    }
}

#[async_trait]
impl Module for MockModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn module_type(&self) -> ModuleType {
        self.module_type
    }

    fn dependencies(&self) -> Vec<String> {
        self.dependencies.clone()
    }

    fn api_version(&self) -> &str {
        &self.api_version
    }

    async fn initialize(&self, config: ModuleConfig) -> ModuleResult<()> {
        self.runtime.transition(ModuleState::Initializing)?;
        if self.fail_init {
            self.runtime.fail("init failed");
            return Err(ModuleError::Lifecycle {
                module: self.name.clone(),
                reason: "init failed".to_string(),
            });
        }
        *self.config.lock().unwrap() = config;
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
        if self.runtime.state() != ModuleState::Stopped {
            self.runtime.transition(ModuleState::Stopped)?;
        }
        Ok(())
    }

    async fn health(&self) -> HealthStatus {
        let state = *self.health.lock().unwrap();
        HealthStatus::new(state, "mock")
    }

    fn status(&self) -> ModuleStatus {
        self.runtime.status()
    }

    async fn process_request(
        &self,
        ctx: &ProcessRequestContext,
    ) -> ModuleResult<ProcessRequestResult> {
        self.run(&ctx.body).await
    }

    async fn process_response(
        &self,
        ctx: &ProcessResponseContext,
    ) -> ModuleResult<ProcessResponseResult> {
        self.run(&ctx.response_body).await
    }

    fn validate_config(&self, config: &ModuleConfig) -> ModuleResult<()> {
        match (&self.reject_config, config.config.get("reject")) {
            (Some(reason), _) => Err(ModuleError::invalid_config(&self.name, reason.clone())),
            (None, Some(_)) => Err(ModuleError::invalid_config(&self.name, "reject requested")),
            _ => Ok(()),
        }
    }

    async fn update_config(&self, config: ModuleConfig) -> ModuleResult<()> {
        self.validate_config(&config)?;
        if !self.update_delay.is_zero() {
            tokio::time::sleep(self.update_delay).await;
        }
        *self.config.lock().unwrap() = config;
        Ok(())
    }

    fn get_config(&self) -> ModuleConfig {
        self.config.lock().unwrap().clone()
    }
}
