//! The module contract
//!
//! Every inspector, policy enforcer, transformer and sink implements
//! [`Module`]. The registry and pipeline only ever see `Arc<dyn Module>`; how
//! the implementation reached the process is not their concern.

use super::config::ModuleConfig;
use super::status::{
    HealthStatus, ModuleInfo, ModuleMetrics, ModuleStatus, ModuleType, MODULE_API_VERSION,
};
use super::types::{
    ProcessRequestContext, ProcessRequestResult, ProcessResponseContext, ProcessResponseResult,
};
use crate::error::ModuleResult;
use async_trait::async_trait;

/// Capability interface of a pluggable policy unit.
///
/// # Lifecycle
///
/// `initialize` is called once with the module's config, then `start`.
/// `stop` drains, `shutdown` releases resources. Processing methods called
/// before `start` or after `stop` must fail with
/// [`ModuleError::NotRunning`](crate::error::ModuleError::NotRunning) rather
/// than silently succeed.
///
/// # Concurrency
///
/// Processing methods are invoked concurrently from independent pipeline
/// runs; internal state needs its own synchronization.
///
/// # Example
///
/// ```ignore
/// struct HeaderStamp { runtime: ModuleRuntime, config: RwLock<ModuleConfig> }
///
/// #[async_trait]
/// impl Module for HeaderStamp {
///     fn name(&self) -> &str { "header_stamp" }
///     fn module_type(&self) -> ModuleType { ModuleType::Transformer }
///
///     async fn process_request(&self, _ctx: &ProcessRequestContext)
///         -> ModuleResult<ProcessRequestResult>
///     {
///         self.runtime.ensure_running()?;
///         Ok(ProcessResult::allow().with_header("x-gateway", "modhost"))
///     }
///     // ...
/// }
/// ```
#[async_trait]
pub trait Module: Send + Sync {
    // ----- identity -------------------------------------------------------

    /// Unique module name
    fn name(&self) -> &str;

    /// Implementation version
    fn version(&self) -> &str {
        "0.0.0"
    }

    /// Module kind
    fn module_type(&self) -> ModuleType;

    fn description(&self) -> &str {
        ""
    }

    fn author(&self) -> &str {
        ""
    }

    /// Names of modules that must be registered before this one
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    /// Contract version the module was built against
    fn api_version(&self) -> &str {
        MODULE_API_VERSION
    }

    /// Identity as one serializable record
    fn info(&self) -> ModuleInfo {
        ModuleInfo {
            name: self.name().to_string(),
            version: self.version().to_string(),
            module_type: self.module_type(),
            description: self.description().to_string(),
            author: self.author().to_string(),
            dependencies: self.dependencies(),
            api_version: self.api_version().to_string(),
        }
    }

    // ----- lifecycle ------------------------------------------------------

    async fn initialize(&self, config: ModuleConfig) -> ModuleResult<()>;

    async fn start(&self) -> ModuleResult<()>;

    async fn stop(&self) -> ModuleResult<()>;

    async fn shutdown(&self) -> ModuleResult<()>;

    // ----- health / status ------------------------------------------------

    /// Produce a fresh health report
    async fn health(&self) -> HealthStatus;

    fn status(&self) -> ModuleStatus;

    fn metrics(&self) -> ModuleMetrics {
        ModuleMetrics::new()
    }

    // ----- processing -----------------------------------------------------

    async fn process_request(
        &self,
        ctx: &ProcessRequestContext,
    ) -> ModuleResult<ProcessRequestResult>;

    async fn process_response(
        &self,
        ctx: &ProcessResponseContext,
    ) -> ModuleResult<ProcessResponseResult>;

    // ----- configuration --------------------------------------------------

    /// Check a config without side effects; callable before `initialize`
    fn validate_config(&self, config: &ModuleConfig) -> ModuleResult<()>;

    /// Replace the live config wholesale
    async fn update_config(&self, config: ModuleConfig) -> ModuleResult<()>;

    /// Copy of the live config
    fn get_config(&self) -> ModuleConfig;
}
