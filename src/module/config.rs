//! Per-module configuration record

use super::status::ModuleType;
use crate::config::duration_format;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// Configuration of one module.
///
/// Handed to a module by value on `initialize` / `update_config` and replaced
/// wholesale; modules never share a config instance with the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleConfig {
    /// Registered name, unique per host
    pub name: String,

    /// Module kind
    #[serde(rename = "type")]
    pub module_type: ModuleType,

    /// Implementation id for the built-in factory (defaults to `name`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Lower runs first
    #[serde(default)]
    pub priority: i32,

    /// Module-specific options
    #[serde(default)]
    pub config: Map<String, Value>,

    /// All must match for the module to run (AND)
    #[serde(default)]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceLimits>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeouts: Option<Timeouts>,

    /// Failures of a fail-closed module type are absorbed instead of blocking
    #[serde(default)]
    pub advisory: bool,

    /// Overrides the type default used by health aggregation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
}

fn default_true() -> bool {
    true
}

impl ModuleConfig {
    /// Create a config with defaults for everything but name and type
    pub fn new(name: impl Into<String>, module_type: ModuleType) -> Self {
        Self {
            name: name.into(),
            module_type,
            module: None,
            enabled: true,
            priority: 0,
            config: Map::new(),
            conditions: Vec::new(),
            resources: None,
            timeouts: None,
            advisory: false,
            required: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_processing_timeout(mut self, timeout: Duration) -> Self {
        let mut timeouts = self.timeouts.unwrap_or_default();
        timeouts.processing = Some(timeout);
        self.timeouts = Some(timeouts);
        self
    }

    pub fn advisory(mut self) -> Self {
        self.advisory = true;
        self
    }

    /// Implementation id used by the built-in factory
    pub fn implementation(&self) -> &str {
        self.module.as_deref().unwrap_or(&self.name)
    }

    /// Deserialize the module-specific options into a typed struct
    pub fn options<T: DeserializeOwned>(&self) -> Result<T, String> {
        serde_json::from_value(Value::Object(self.config.clone()))
            .map_err(|e| format!("invalid options for module '{}': {}", self.name, e))
    }

    /// Processing deadline: the configured processing timeout, capped by
    /// `resources.max_execution_time`, else the pipeline default
    pub fn processing_timeout(&self, default: Duration) -> Duration {
        let configured = self
            .timeouts
            .as_ref()
            .and_then(|t| t.processing)
            .unwrap_or(default);
        match self.resources.as_ref().and_then(|r| r.max_execution_time) {
            Some(cap) => configured.min(cap),
            None => configured,
        }
    }

    /// Structural checks that do not depend on the module implementation
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("module name must not be empty".to_string());
        }
        if let Some(t) = &self.timeouts {
            for (label, d) in [
                ("initialization", t.initialization),
                ("processing", t.processing),
                ("shutdown", t.shutdown),
            ] {
                if d == Some(Duration::ZERO) {
                    return Err(format!("timeouts.{} must be greater than zero", label));
                }
            }
        }
        if let Some(r) = &self.resources {
            if r.max_execution_time == Some(Duration::ZERO) {
                return Err("resources.max_execution_time must be greater than zero".to_string());
            }
            if let Some(cpu) = r.max_cpu_percent {
                if !(0.0..=100.0).contains(&cpu) {
                    return Err(format!("resources.max_cpu_percent out of range: {}", cpu));
                }
            }
        }
        Ok(())
    }
}

/// Condition operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Eq,
    Ne,
    In,
    NotIn,
    Regex,
}

/// Predicate gating whether a module runs for a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Context field: `tenant`, `provider`, `model`, `method`, `path`,
    /// `request_id`, `header.<name>`, `client.<key>`, `annotation.<key>`,
    /// and on responses `status_code`, `response_header.<name>`
    pub field: String,
    pub operator: ConditionOperator,
    pub value: Value,
}

impl Condition {
    pub fn new(field: impl Into<String>, operator: ConditionOperator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }
}

/// Advisory resource caps
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    #[serde(default)]
    pub max_memory_mb: Option<u64>,
    #[serde(default)]
    pub max_cpu_percent: Option<f64>,
    #[serde(default, with = "duration_format::option")]
    pub max_execution_time: Option<Duration>,
}

/// Phase-specific timeouts enforced by the registry and pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Timeouts {
    #[serde(default, with = "duration_format::option")]
    pub initialization: Option<Duration>,
    #[serde(default, with = "duration_format::option")]
    pub processing: Option<Duration>,
    #[serde(default, with = "duration_format::option")]
    pub shutdown: Option<Duration>,
}
