//! Module host process object

use crate::adapter::ProxyAdapter;
use crate::config::HostConfig;
use crate::error::{Error, Result};
use crate::metrics::{self, HostMetrics};
use crate::module::{Module, ModuleConfig, ModuleInfo};
use crate::modules::{BuiltinFactory, ModuleFactory};
use crate::pipeline::{Pipeline, PipelineConfig};
use crate::registry::{ModuleRegistry, RegistryConfig};
use prometheus_client::registry::Registry;
use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Host lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HostState {
    /// Not started
    Stopped,
    /// Registering and activating modules
    Starting,
    /// Serving traffic
    Running,
    /// Draining modules
    ShuttingDown,
}

/// Host summary for `/health`
#[derive(Debug, Clone, Serialize)]
pub struct HostStatus {
    pub state: HostState,
    pub version: String,
    pub modules: usize,
    pub uptime_secs: u64,
}

type PendingModule = (Arc<dyn Module>, ModuleConfig);

/// The module host: one registry, one pipeline, one proxy adapter
pub struct ModuleHost {
    config: HostConfig,
    state: RwLock<HostState>,
    registry: Arc<ModuleRegistry>,
    pipeline: Arc<Pipeline>,
    adapter: Arc<ProxyAdapter>,
    metrics: Arc<HostMetrics>,
    metrics_registry: Registry,
    factory: Arc<dyn ModuleFactory>,
    /// Modules supplied in code, registered on start after configured ones
    pending: Mutex<Vec<PendingModule>>,
    /// Cancelled on stop so in-flight runs abort
    shutdown: Mutex<CancellationToken>,
    started_at: Instant,
}

impl ModuleHost {
    /// Create a host from configuration
    pub fn new(config: HostConfig, factory: Arc<dyn ModuleFactory>) -> Result<Self> {
        config.validate()?;

        let mut metrics_registry = Registry::default();
        let metrics = Arc::new(HostMetrics::new(&mut metrics_registry));

        let registry = Arc::new(ModuleRegistry::new(RegistryConfig {
            health_check_timeout: config.pipeline.health_check_timeout,
            lifecycle_timeout: config.pipeline.lifecycle_timeout,
        }));
        let pipeline = Arc::new(Pipeline::new(
            registry.clone(),
            PipelineConfig {
                default_processing_timeout: config.pipeline.default_processing_timeout,
            },
            metrics.clone(),
        ));
        let adapter = Arc::new(ProxyAdapter::new(
            pipeline.clone(),
            config.pipeline.request_deadline,
        ));

        Ok(Self {
            config,
            state: RwLock::new(HostState::Stopped),
            registry,
            pipeline,
            adapter,
            metrics,
            metrics_registry,
            factory,
            pending: Mutex::new(Vec::new()),
            shutdown: Mutex::new(CancellationToken::new()),
            started_at: Instant::now(),
        })
    }

    pub async fn state(&self) -> HostState {
        *self.state.read().await
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn adapter(&self) -> &Arc<ProxyAdapter> {
        &self.adapter
    }

    pub fn metrics(&self) -> &Arc<HostMetrics> {
        &self.metrics
    }

    /// Token for one exchange; cancelled when the host stops
    pub fn request_token(&self) -> CancellationToken {
        self.shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .child_token()
    }

    /// Queue a module built in code; it is registered and activated by `start`
    pub fn add_module(&self, module: Arc<dyn Module>, config: ModuleConfig) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((module, config));
    }

    /// Register every configured module, then activate them in order.
    ///
    /// Registration errors abort the start. Activation failures leave the
    /// module `Failed` and are reported through health, not here.
    pub async fn start(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if *state != HostState::Stopped {
            return Err(Error::Lifecycle("host already running".to_string()));
        }
        *state = HostState::Starting;
        drop(state);

        tracing::info!(modules = self.config.modules.len(), "Starting module host");

        if let Err(e) = self.register_all().await {
            *self.state.write().await = HostState::Stopped;
            return Err(e);
        }
        self.metrics
            .set_modules_registered(self.registry.len().await);

        for (name, error) in self.registry.start_all().await {
            tracing::error!(module = %name, error = %error, "Module failed to start");
        }

        *self.shutdown.lock().unwrap_or_else(PoisonError::into_inner) = CancellationToken::new();
        *self.state.write().await = HostState::Running;
        tracing::info!(
            host = %self.config.server.host,
            port = self.config.server.port,
            "Module host started"
        );
        Ok(())
    }

    /// Abort in-flight runs and shut every module down
    pub async fn stop(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if *state != HostState::Running {
            return Ok(());
        }
        *state = HostState::ShuttingDown;
        drop(state);

        tracing::info!("Stopping module host");
        self.shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
        self.registry.shutdown_all().await;

        *self.state.write().await = HostState::Stopped;
        tracing::info!("Module host stopped");
        Ok(())
    }

    async fn register_all(&self) -> Result<()> {
        for module_config in &self.config.modules {
            if self.registry.contains(&module_config.name).await {
                continue;
            }
            let module = self.factory.create(module_config)?;
            self.registry.register(module, module_config.clone()).await?;
        }
        let pending = std::mem::take(
            &mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for (module, config) in pending {
            self.registry.register(module, config).await?;
        }
        Ok(())
    }

    pub async fn status(&self) -> HostStatus {
        HostStatus {
            state: self.state().await,
            version: env!("CARGO_PKG_VERSION").to_string(),
            modules: self.registry.len().await,
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }

    /// OpenMetrics exposition of the host metrics
    pub async fn render_metrics(&self) -> Result<String> {
        self.metrics
            .set_modules_registered(self.registry.len().await);
        metrics::encode(&self.metrics_registry).map_err(|e| Error::Internal(e.to_string()))
    }

    /// Bind the configured address and serve until `shutdown` resolves
    pub async fn serve<F>(self: Arc<Self>, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = format!("{}:{}", self.config.server.host, self.config.server.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!(address = %addr, "HTTP surface listening");
        let app = crate::api::build_app(self.clone(), &self.config.server.cors_origins);
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }
}

/// Check a configuration without initializing anything.
///
/// Every module is built through the factory and registered into a scratch
/// registry, which runs the config checks, `validate_config`, condition
/// compilation and dependency resolution.
pub async fn dry_run(config: &HostConfig, factory: &dyn ModuleFactory) -> Result<Vec<ModuleInfo>> {
    config.validate()?;
    let scratch = ModuleRegistry::default();
    let mut infos = Vec::with_capacity(config.modules.len());
    for module_config in &config.modules {
        let module = factory.create(module_config)?;
        infos.push(module.info());
        scratch.register(module, module_config.clone()).await?;
    }
    Ok(infos)
}

/// Builder for [`ModuleHost`]
pub struct ModuleHostBuilder {
    config: HostConfig,
    factory: Arc<dyn ModuleFactory>,
    modules: Vec<PendingModule>,
}

impl ModuleHostBuilder {
    /// Builder with default config and the built-in factory
    pub fn new() -> Self {
        Self {
            config: HostConfig::default(),
            factory: Arc::new(BuiltinFactory),
            modules: Vec::new(),
        }
    }

    pub fn config(mut self, config: HostConfig) -> Self {
        self.config = config;
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.server.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.server.port = port;
        self
    }

    /// Factory used for `[[modules]]` entries
    pub fn factory(mut self, factory: Arc<dyn ModuleFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Add a module built in code
    pub fn module(mut self, module: Arc<dyn Module>, config: ModuleConfig) -> Self {
        self.modules.push((module, config));
        self
    }

    pub fn build(self) -> Result<ModuleHost> {
        let host = ModuleHost::new(self.config, self.factory)?;
        for (module, config) in self.modules {
            host.add_module(module, config);
        }
        Ok(host)
    }
}

impl Default for ModuleHostBuilder {
    fn default() -> Self {
        Self::new()
    }
}
