//! Host configuration management

pub mod duration_format;

use crate::error::{Error, Result};
use crate::module::ModuleConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main host configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// HTTP server configuration
    pub server: ServerConfig,

    /// Pipeline and lifecycle timing
    pub pipeline: PipelineSettings,

    /// Log output configuration
    pub logging: LoggingConfig,

    /// Modules to register, in registration order
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub modules: Vec<ModuleConfig>,
}

impl HostConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&raw)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: HostConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Internal(e.to_string()))
    }

    /// Structural validation of the whole file
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.default_processing_timeout.is_zero() {
            return Err(Error::Config(
                "pipeline.default_processing_timeout must be greater than zero".to_string(),
            ));
        }
        if self.pipeline.request_deadline.is_zero() {
            return Err(Error::Config(
                "pipeline.request_deadline must be greater than zero".to_string(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for module in &self.modules {
            module
                .validate()
                .map_err(|e| Error::Config(format!("module '{}': {}", module.name, e)))?;
            if !seen.insert(module.name.as_str()) {
                return Err(Error::Config(format!(
                    "module '{}' is configured more than once",
                    module.name
                )));
            }
        }
        Ok(())
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Allowed CORS origins (empty = any)
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            cors_origins: Vec::new(),
        }
    }
}

/// Pipeline and lifecycle timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Per-module processing deadline when a module sets none
    #[serde(with = "duration_format")]
    pub default_processing_timeout: Duration,

    /// Per-module bound on `health()`
    #[serde(with = "duration_format")]
    pub health_check_timeout: Duration,

    /// Bound on initialize/start/stop/shutdown when a module sets none
    #[serde(with = "duration_format")]
    pub lifecycle_timeout: Duration,

    /// Upstream deadline applied by the proxy adapter to a whole pipeline run
    #[serde(with = "duration_format")]
    pub request_deadline: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            default_processing_timeout: Duration::from_secs(5),
            health_check_timeout: Duration::from_secs(2),
            lifecycle_timeout: Duration::from_secs(10),
            request_deadline: Duration::from_secs(30),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Log output configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub level: String,

    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "modhost=info,tower_http=info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}
