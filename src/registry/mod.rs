//! Module registry
//!
//! Owns every registered module, enforces naming and dependency rules,
//! drives lifecycles and hands the pipeline a priority-ordered snapshot of
//! executable modules.

mod entry;
pub mod health;

pub use entry::RegisteredModule;
pub use health::{ModuleHealth, RegistryHealth};

use crate::error::{Error, Result};
use crate::module::{
    ConditionSet, HealthState, HealthStatus, Module, ModuleConfig, ModuleInfo, ModuleMetrics,
    ModuleState, ModuleStatus, ModuleType, MODULE_API_VERSION,
};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Registry timing
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub health_check_timeout: Duration,
    pub lifecycle_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            health_check_timeout: Duration::from_secs(2),
            lifecycle_timeout: Duration::from_secs(10),
        }
    }
}

/// Point-in-time view of one module for the management API
#[derive(Debug, Clone, Serialize)]
pub struct ModuleSummary {
    pub info: ModuleInfo,
    pub state: ModuleState,
    pub enabled: bool,
    pub priority: i32,
    pub required: bool,
    /// Counters reported by the module itself
    pub status: ModuleStatus,
    /// Invocation counters kept by the host
    pub invocations: ModuleStatus,
    pub metrics: ModuleMetrics,
    pub config: ModuleConfig,
}

/// The module registry
pub struct ModuleRegistry {
    modules: RwLock<HashMap<String, Arc<RegisteredModule>>>,
    next_seq: AtomicU64,
    config: RegistryConfig,
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

impl ModuleRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            modules: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            config,
        }
    }

    /// Register a module under `config.name`.
    ///
    /// Fails without side effects when the name is taken, the contract
    /// version is incompatible, a dependency is unresolved or the module
    /// rejects its config.
    pub async fn register(&self, module: Arc<dyn Module>, config: ModuleConfig) -> Result<()> {
        let name = config.name.clone();
        if module.name() != name {
            return Err(Error::Config(format!(
                "config name '{}' does not match module name '{}'",
                name,
                module.name()
            )));
        }
        if module.module_type() != config.module_type {
            return Err(Error::Config(format!(
                "module '{}' is a {} but configured as {}",
                name,
                module.module_type(),
                config.module_type
            )));
        }
        check_api_version(&name, module.api_version())?;
        config
            .validate()
            .map_err(|e| Error::Config(format!("module '{}': {}", name, e)))?;
        module
            .validate_config(&config)
            .map_err(|e| Error::Config(e.to_string()))?;
        let conditions = ConditionSet::compile(&config.conditions)
            .map_err(|e| Error::Config(format!("module '{}': {}", name, e)))?;

        let dependencies = module.dependencies();
        let mut modules = self.modules.write().await;
        if modules.contains_key(&name) {
            return Err(Error::AlreadyRegistered(name));
        }
        for dep in &dependencies {
            if dep == &name {
                return Err(Error::Dependency(format!(
                    "module '{}' depends on itself",
                    name
                )));
            }
            if !modules.contains_key(dep) {
                return Err(Error::Dependency(format!(
                    "module '{}' depends on unregistered module '{}'",
                    name, dep
                )));
            }
        }

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            module = %name,
            kind = %config.module_type,
            priority = config.priority,
            "Module registered"
        );
        modules.insert(
            name,
            Arc::new(RegisteredModule::new(module, config, conditions, seq)),
        );
        Ok(())
    }

    /// Remove a module, draining it first when it is serving traffic
    pub async fn unregister(&self, name: &str) -> Result<()> {
        let entry = {
            let mut modules = self.modules.write().await;
            let dependents: Vec<&str> = modules
                .values()
                .filter(|e| e.name() != name && e.module().dependencies().iter().any(|d| d == name))
                .map(|e| e.name())
                .collect();
            if !dependents.is_empty() {
                return Err(Error::Dependency(format!(
                    "module '{}' is required by: {}",
                    name,
                    dependents.join(", ")
                )));
            }
            modules
                .remove(name)
                .ok_or_else(|| Error::NotFound(name.to_string()))?
        };

        if entry.state().is_executable() {
            if let Err(e) = self.stop_entry(&entry).await {
                tracing::warn!(module = %name, error = %e, "Stop failed during unregister");
            }
        }
        if let Err(e) = self.shutdown_entry(&entry).await {
            tracing::warn!(module = %name, error = %e, "Shutdown failed during unregister");
        }
        tracing::info!(module = %name, "Module unregistered");
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Option<Arc<RegisteredModule>> {
        self.modules.read().await.get(name).cloned()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.modules.read().await.contains_key(name)
    }

    pub async fn len(&self) -> usize {
        self.modules.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.modules.read().await.is_empty()
    }

    /// All modules, ordered by (priority, registration order)
    pub async fn list(&self) -> Vec<Arc<RegisteredModule>> {
        let mut all: Vec<_> = self.modules.read().await.values().cloned().collect();
        all.sort_by_key(|e| e.sort_key());
        all
    }

    pub async fn list_by_type(&self, module_type: ModuleType) -> Vec<Arc<RegisteredModule>> {
        self.list()
            .await
            .into_iter()
            .filter(|e| e.config().module_type == module_type)
            .collect()
    }

    /// Enabled modules in `Ready`/`Running`, in execution order
    pub async fn executable(&self) -> Vec<Arc<RegisteredModule>> {
        self.list()
            .await
            .into_iter()
            .filter(|e| e.is_executable())
            .collect()
    }

    /// Initialize and start one module. On failure the module is left in
    /// `Failed` and is never executed.
    pub async fn activate(&self, name: &str) -> Result<()> {
        let entry = self.require(name).await?;
        let timeout = entry
            .config()
            .timeouts
            .as_ref()
            .and_then(|t| t.initialization)
            .unwrap_or(self.config.lifecycle_timeout);

        transition(&entry, ModuleState::Initializing)?;
        let config = entry.config().clone();
        if let Err(e) = bounded(timeout, entry.module().initialize(config)).await {
            return Err(fail(&entry, "initialize", e));
        }
        transition(&entry, ModuleState::Ready)?;

        if let Err(e) = bounded(timeout, entry.module().start()).await {
            return Err(fail(&entry, "start", e));
        }
        transition(&entry, ModuleState::Running)?;
        tracing::info!(module = %name, "Module running");
        Ok(())
    }

    /// Activate every enabled module in registration order.
    ///
    /// Returns the modules that failed; they stay registered in `Failed`.
    pub async fn start_all(&self) -> Vec<(String, Error)> {
        let mut entries = self.list().await;
        entries.sort_by_key(|e| e.seq());
        let mut failed = Vec::new();
        for entry in entries {
            if !entry.config().enabled || entry.state() == ModuleState::Running {
                continue;
            }
            if let Err(e) = self.activate(entry.name()).await {
                tracing::error!(module = %entry.name(), error = %e, "Module failed to start");
                failed.push((entry.name().to_string(), e));
            }
        }
        failed
    }

    /// Drain and stop one module; waits for in-flight invocations
    pub async fn deactivate(&self, name: &str) -> Result<()> {
        let entry = self.require(name).await?;
        self.stop_entry(&entry).await
    }

    /// Stop and shut down every module in reverse registration order
    pub async fn shutdown_all(&self) {
        let mut entries = self.list().await;
        entries.sort_by_key(|e| std::cmp::Reverse(e.seq()));
        for entry in entries {
            if entry.state().is_executable() {
                if let Err(e) = self.stop_entry(&entry).await {
                    tracing::warn!(module = %entry.name(), error = %e, "Stop failed");
                }
            }
            if let Err(e) = self.shutdown_entry(&entry).await {
                tracing::warn!(module = %entry.name(), error = %e, "Shutdown failed");
            }
        }
    }

    /// Replace a module's configuration atomically.
    ///
    /// The new config is validated first; on rejection nothing changes. The
    /// swap waits for in-flight invocations of this module and holds off new
    /// ones until it completes. Counters survive the reload.
    pub async fn reload(&self, name: &str, config: ModuleConfig) -> Result<()> {
        let entry = self.require(name).await?;
        if config.name != name {
            return Err(Error::Config(format!(
                "cannot rename module '{}' to '{}' on reload",
                name, config.name
            )));
        }
        if config.module_type != entry.config().module_type {
            return Err(Error::Config(format!(
                "cannot change type of module '{}' on reload",
                name
            )));
        }
        config
            .validate()
            .map_err(|e| Error::Config(format!("module '{}': {}", name, e)))?;
        entry
            .module()
            .validate_config(&config)
            .map_err(|e| Error::Config(e.to_string()))?;
        let conditions = ConditionSet::compile(&config.conditions)
            .map_err(|e| Error::Config(format!("module '{}': {}", name, e)))?;

        let _exclusive = entry.gate().write().await;
        entry
            .module()
            .update_config(config.clone())
            .await
            .map_err(|e| Error::Config(e.to_string()))?;

        let replacement = Arc::new(entry.with_config(config, conditions));
        let mut modules = self.modules.write().await;
        match modules.get(name) {
            // Unregistered (or replaced by a new registration) while reconfiguring
            Some(current) if Arc::ptr_eq(current.gate(), entry.gate()) => {
                modules.insert(name.to_string(), replacement);
            }
            _ => return Err(Error::NotFound(name.to_string())),
        }
        drop(modules);
        tracing::info!(module = %name, "Module configuration reloaded");
        Ok(())
    }

    /// Reload a module with the config it already has
    pub async fn reload_current(&self, name: &str) -> Result<()> {
        let entry = self.require(name).await?;
        self.reload(name, entry.config().clone()).await
    }

    /// Check every enabled module concurrently, each bounded by the health
    /// check timeout
    pub async fn health_check(&self) -> RegistryHealth {
        let started = Instant::now();
        let entries: Vec<_> = self
            .list()
            .await
            .into_iter()
            .filter(|e| e.config().enabled)
            .collect();
        let limit = self.config.health_check_timeout;

        let checks = entries.iter().map(|entry| async move {
            let lifecycle = entry.state();
            let health = match lifecycle {
                ModuleState::Failed => HealthStatus::unhealthy(
                    entry
                        .tracker()
                        .last_error()
                        .unwrap_or_else(|| "module failed".to_string()),
                ),
                ModuleState::Running | ModuleState::Ready => {
                    let t0 = Instant::now();
                    match tokio::time::timeout(limit, entry.module().health()).await {
                        Ok(mut h) => {
                            h.check_duration = t0.elapsed();
                            h
                        }
                        Err(_) => HealthStatus::unhealthy(format!(
                            "health check timed out after {:?}",
                            limit
                        )),
                    }
                }
                other => HealthStatus::new(HealthState::Unknown, format!("module is {}", other)),
            };
            (
                entry.name().to_string(),
                ModuleHealth {
                    required: entry.config().is_required(),
                    lifecycle,
                    health,
                },
            )
        });

        let modules: BTreeMap<_, _> = futures::future::join_all(checks).await.into_iter().collect();
        RegistryHealth {
            state: health::aggregate(modules.values()),
            modules,
            check_duration: started.elapsed(),
        }
    }

    /// Management view of one module
    pub async fn snapshot(&self, name: &str) -> Result<ModuleSummary> {
        let entry = self.require(name).await?;
        Ok(summarize(&entry))
    }

    /// Management view of every module, in execution order
    pub async fn snapshots(&self) -> Vec<ModuleSummary> {
        self.list().await.iter().map(|e| summarize(e)).collect()
    }

    async fn require(&self, name: &str) -> Result<Arc<RegisteredModule>> {
        self.get(name)
            .await
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    async fn stop_entry(&self, entry: &RegisteredModule) -> Result<()> {
        transition(entry, ModuleState::Draining)?;
        let _exclusive = entry.gate().write().await;
        let timeout = entry
            .config()
            .timeouts
            .as_ref()
            .and_then(|t| t.shutdown)
            .unwrap_or(self.config.lifecycle_timeout);
        if let Err(e) = bounded(timeout, entry.module().stop()).await {
            return Err(fail(entry, "stop", e));
        }
        transition(entry, ModuleState::Stopped)?;
        tracing::info!(module = %entry.name(), "Module stopped");
        Ok(())
    }

    async fn shutdown_entry(&self, entry: &RegisteredModule) -> Result<()> {
        let timeout = entry
            .config()
            .timeouts
            .as_ref()
            .and_then(|t| t.shutdown)
            .unwrap_or(self.config.lifecycle_timeout);
        let result = bounded(timeout, entry.module().shutdown()).await;
        if entry.state() != ModuleState::Stopped {
            let _ = entry.tracker().transition(ModuleState::Stopped);
        }
        result.map_err(|e| Error::Lifecycle(format!("module '{}' shutdown: {}", entry.name(), e)))
    }
}

fn summarize(entry: &RegisteredModule) -> ModuleSummary {
    let module = entry.module();
    ModuleSummary {
        info: module.info(),
        state: entry.state(),
        enabled: entry.config().enabled,
        priority: entry.config().priority,
        required: entry.config().is_required(),
        status: module.status(),
        invocations: entry.tracker().status(),
        metrics: module.metrics(),
        config: entry.config().clone(),
    }
}

fn check_api_version(name: &str, declared: &str) -> Result<()> {
    let major = |v: &str| v.split('.').next().unwrap_or("").trim().to_string();
    if major(declared) != major(MODULE_API_VERSION) {
        return Err(Error::Config(format!(
            "module '{}' targets contract version {}, host provides {}",
            name, declared, MODULE_API_VERSION
        )));
    }
    Ok(())
}

fn transition(entry: &RegisteredModule, next: ModuleState) -> Result<()> {
    entry
        .tracker()
        .transition(next)
        .map_err(|e| Error::Lifecycle(e.to_string()))
}

fn fail(entry: &RegisteredModule, step: &str, reason: String) -> Error {
    let message = format!("module '{}' {} failed: {}", entry.name(), step, reason);
    entry.tracker().fail(message.clone());
    tracing::error!(module = %entry.name(), step, error = %reason, "Lifecycle step failed");
    Error::Lifecycle(message)
}

/// Run a lifecycle call under a deadline, flattening both failure kinds
async fn bounded<F>(limit: Duration, call: F) -> std::result::Result<(), String>
where
    F: Future<Output = crate::error::ModuleResult<()>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("timed out after {:?}", limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::mock::MockModule;
    use crate::module::{Condition, ConditionOperator};

    fn mock(name: &str, t: ModuleType) -> (Arc<dyn Module>, ModuleConfig) {
        (Arc::new(MockModule::new(name, t)), ModuleConfig::new(name, t))
    }

    #[tokio::test]
    async fn test_register_and_get() {
        let registry = ModuleRegistry::default();
        let (m, c) = mock("a", ModuleType::Inspector);
        registry.register(m, c).await.unwrap();
        assert!(registry.contains("a").await);
        assert_eq!(registry.get("a").await.unwrap().state(), ModuleState::Loading);
        assert!(registry.get("b").await.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let registry = ModuleRegistry::default();
        let (m, c) = mock("a", ModuleType::Inspector);
        registry.register(m, c).await.unwrap();
        let (m, c) = mock("a", ModuleType::Inspector);
        let err = registry.register(m, c).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyRegistered(ref n) if n == "a"));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_unresolved_dependency_rejected() {
        let registry = ModuleRegistry::default();
        let m = Arc::new(MockModule::new("b", ModuleType::Policy).depends_on("a"));
        let err = registry
            .register(m, ModuleConfig::new("b", ModuleType::Policy))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Dependency(_)));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_self_dependency_rejected() {
        let registry = ModuleRegistry::default();
        let m = Arc::new(MockModule::new("a", ModuleType::Policy).depends_on("a"));
        let err = registry
            .register(m, ModuleConfig::new("a", ModuleType::Policy))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("depends on itself"));
    }

    #[tokio::test]
    async fn test_dependency_blocks_unregister() {
        let registry = ModuleRegistry::default();
        let (m, c) = mock("a", ModuleType::Inspector);
        registry.register(m, c).await.unwrap();
        let b = Arc::new(MockModule::new("b", ModuleType::Policy).depends_on("a"));
        registry
            .register(b, ModuleConfig::new("b", ModuleType::Policy))
            .await
            .unwrap();

        assert!(matches!(
            registry.unregister("a").await,
            Err(Error::Dependency(_))
        ));
        registry.unregister("b").await.unwrap();
        registry.unregister("a").await.unwrap();
        assert!(matches!(
            registry.unregister("a").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_incompatible_api_version_rejected() {
        let registry = ModuleRegistry::default();
        let m = Arc::new(MockModule::new("a", ModuleType::Sink).with_api_version("2.0"));
        let err = registry
            .register(m, ModuleConfig::new("a", ModuleType::Sink))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let m = Arc::new(MockModule::new("b", ModuleType::Sink).with_api_version("1.3"));
        registry
            .register(m, ModuleConfig::new("b", ModuleType::Sink))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_rejected_config_and_bad_condition() {
        let registry = ModuleRegistry::default();
        let m = Arc::new(MockModule::new("a", ModuleType::Policy).rejecting_config("nope"));
        let err = registry
            .register(m, ModuleConfig::new("a", ModuleType::Policy))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("nope"));

        let (m, c) = mock("b", ModuleType::Policy);
        let c = c.with_condition(Condition::new("model", ConditionOperator::Regex, "("));
        assert!(matches!(
            registry.register(m, c).await,
            Err(Error::Config(_))
        ));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_name_mismatch_rejected() {
        let registry = ModuleRegistry::default();
        let m: Arc<dyn Module> = Arc::new(MockModule::new("a", ModuleType::Policy));
        let err = registry
            .register(m, ModuleConfig::new("b", ModuleType::Policy))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_list_orders_by_priority_then_registration() {
        let registry = ModuleRegistry::default();
        for (name, prio) in [("late", 20), ("first", 10), ("second", 10)] {
            let (m, c) = mock(name, ModuleType::Inspector);
            registry.register(m, c.with_priority(prio)).await.unwrap();
        }
        let names: Vec<String> = registry
            .list()
            .await
            .iter()
            .map(|e| e.name().to_string())
            .collect();
        assert_eq!(names, vec!["first", "second", "late"]);
    }

    #[tokio::test]
    async fn test_list_by_type() {
        let registry = ModuleRegistry::default();
        for (name, t) in [
            ("p", ModuleType::Policy),
            ("s", ModuleType::Sink),
            ("p2", ModuleType::Policy),
        ] {
            let (m, c) = mock(name, t);
            registry.register(m, c).await.unwrap();
        }
        assert_eq!(registry.list_by_type(ModuleType::Policy).await.len(), 2);
        assert_eq!(registry.list_by_type(ModuleType::Transformer).await.len(), 0);
    }

    #[tokio::test]
    async fn test_lifecycle_controls_visibility() {
        let registry = ModuleRegistry::default();
        let (m, c) = mock("a", ModuleType::Inspector);
        registry.register(m, c).await.unwrap();
        assert!(registry.executable().await.is_empty());

        registry.activate("a").await.unwrap();
        assert_eq!(registry.get("a").await.unwrap().state(), ModuleState::Running);
        assert_eq!(registry.executable().await.len(), 1);

        registry.deactivate("a").await.unwrap();
        assert_eq!(registry.get("a").await.unwrap().state(), ModuleState::Stopped);
        assert!(registry.executable().await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_initialization_excludes_module() {
        let registry = ModuleRegistry::default();
        let bad = Arc::new(MockModule::new("bad", ModuleType::Policy).failing_init());
        registry
            .register(bad, ModuleConfig::new("bad", ModuleType::Policy))
            .await
            .unwrap();
        let (m, c) = mock("good", ModuleType::Inspector);
        registry.register(m, c).await.unwrap();

        let failed = registry.start_all().await;
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].0, "bad");
        assert_eq!(registry.get("bad").await.unwrap().state(), ModuleState::Failed);

        let names: Vec<String> = registry
            .executable()
            .await
            .iter()
            .map(|e| e.name().to_string())
            .collect();
        assert_eq!(names, vec!["good"]);

        let health = registry.health_check().await;
        assert_eq!(health.state, HealthState::Unhealthy);
        assert_eq!(health.modules["bad"].health.state, HealthState::Unhealthy);
    }

    #[tokio::test]
    async fn test_disabled_module_is_not_started() {
        let registry = ModuleRegistry::default();
        let (m, mut c) = mock("off", ModuleType::Inspector);
        c.enabled = false;
        registry.register(m, c).await.unwrap();
        assert!(registry.start_all().await.is_empty());
        assert_eq!(registry.get("off").await.unwrap().state(), ModuleState::Loading);
    }

    #[tokio::test]
    async fn test_reload_swaps_config_and_keeps_counters() {
        let registry = ModuleRegistry::default();
        let (m, c) = mock("a", ModuleType::Policy);
        registry.register(m, c).await.unwrap();
        registry.activate("a").await.unwrap();
        registry
            .get("a")
            .await
            .unwrap()
            .tracker()
            .record_success(Duration::from_millis(1));

        let next = ModuleConfig::new("a", ModuleType::Policy)
            .with_priority(5)
            .with_option("k", "v");
        registry.reload("a", next.clone()).await.unwrap();

        let entry = registry.get("a").await.unwrap();
        assert_eq!(entry.config(), &next);
        assert_eq!(entry.module().get_config(), next);
        assert_eq!(entry.tracker().requests_processed(), 1);
        assert_eq!(entry.state(), ModuleState::Running);
    }

    #[tokio::test]
    async fn test_reload_does_not_resurrect_unregistered_module() {
        let registry = Arc::new(ModuleRegistry::default());
        let m = Arc::new(
            MockModule::new("a", ModuleType::Inspector)
                .slow_reconfigure(Duration::from_millis(200)),
        );
        registry
            .register(m, ModuleConfig::new("a", ModuleType::Inspector))
            .await
            .unwrap();

        let reloading = {
            let registry = registry.clone();
            tokio::spawn(async move {
                let next = ModuleConfig::new("a", ModuleType::Inspector).with_priority(7);
                registry.reload("a", next).await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        registry.unregister("a").await.unwrap();

        let result = reloading.await.unwrap();
        assert!(matches!(result, Err(Error::NotFound(ref n)) if n == "a"));
        assert!(!registry.contains("a").await);
        assert!(registry.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_reload_rejected_leaves_config_untouched() {
        let registry = ModuleRegistry::default();
        let (m, c) = mock("a", ModuleType::Policy);
        registry.register(m, c.clone()).await.unwrap();

        let bad = c.clone().with_option("reject", true);
        assert!(matches!(
            registry.reload("a", bad).await,
            Err(Error::Config(_))
        ));
        assert_eq!(registry.get("a").await.unwrap().config(), &c);

        let renamed = ModuleConfig::new("z", ModuleType::Policy);
        assert!(registry.reload("a", renamed).await.is_err());
        assert!(matches!(
            registry.reload("missing", c).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_health_aggregation() {
        let registry = ModuleRegistry::default();
        let policy = Arc::new(MockModule::new("p", ModuleType::Policy));
        let sink = Arc::new(MockModule::new("s", ModuleType::Sink));
        registry
            .register(policy.clone(), ModuleConfig::new("p", ModuleType::Policy))
            .await
            .unwrap();
        registry
            .register(sink.clone(), ModuleConfig::new("s", ModuleType::Sink))
            .await
            .unwrap();
        registry.start_all().await;

        assert_eq!(registry.health_check().await.state, HealthState::Healthy);

        sink.set_health(HealthState::Unhealthy);
        let report = registry.health_check().await;
        assert_eq!(report.state, HealthState::Degraded);
        assert!(!report.modules["s"].required);

        policy.set_health(HealthState::Unhealthy);
        assert_eq!(registry.health_check().await.state, HealthState::Unhealthy);
    }

    #[tokio::test]
    async fn test_shutdown_all_stops_everything() {
        let registry = ModuleRegistry::default();
        let (m, c) = mock("a", ModuleType::Inspector);
        registry.register(m, c).await.unwrap();
        let b = Arc::new(MockModule::new("b", ModuleType::Sink).depends_on("a"));
        registry
            .register(b, ModuleConfig::new("b", ModuleType::Sink))
            .await
            .unwrap();
        registry.start_all().await;
        assert_eq!(registry.executable().await.len(), 2);

        registry.shutdown_all().await;
        for entry in registry.list().await {
            assert_eq!(entry.state(), ModuleState::Stopped);
        }
    }

    #[tokio::test]
    async fn test_summary() {
        let registry = ModuleRegistry::default();
        let (m, c) = mock("a", ModuleType::Transformer);
        registry.register(m, c.with_priority(3)).await.unwrap();
        let summary = registry.snapshot("a").await.unwrap();
        assert_eq!(summary.info.name, "a");
        assert_eq!(summary.priority, 3);
        assert!(summary.required);
        assert_eq!(registry.snapshots().await.len(), 1);
        assert!(registry.snapshot("nope").await.is_err());
    }
}
