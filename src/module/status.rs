//! Module identity, lifecycle state, runtime status and health

use crate::config::duration_format;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

/// Version of the in-process module contract.
///
/// Modules built against another major version are rejected at registration.
pub const MODULE_API_VERSION: &str = "1";

/// Closed set of module kinds.
///
/// Execution rules (fail-open vs fail-closed, required-by-default) are keyed
/// by this type in [`ExecutionRule`](super::rules::ExecutionRule).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleType {
    /// Observes traffic and annotates; never gates
    Inspector,
    /// Enforces policy; may block
    Policy,
    /// Rewrites bodies/headers
    Transformer,
    /// Ships data elsewhere (logs, audit); never gates
    Sink,
}

impl fmt::Display for ModuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModuleType::Inspector => "inspector",
            ModuleType::Policy => "policy",
            ModuleType::Transformer => "transformer",
            ModuleType::Sink => "sink",
        };
        f.write_str(s)
    }
}

/// Lifecycle state of a module.
///
/// `Loading → Initializing → Ready → Running → Draining → Stopped`, with
/// `Failed` reachable from any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleState {
    /// Registered, not yet initialized
    Loading,
    /// `initialize` in progress
    Initializing,
    /// Initialized, not started
    Ready,
    /// Serving traffic
    Running,
    /// `stop` in progress
    Draining,
    /// Stopped
    Stopped,
    /// A lifecycle step failed
    Failed,
}

impl ModuleState {
    /// Whether the pipeline may execute a module in this state
    pub fn is_executable(self) -> bool {
        matches!(self, ModuleState::Ready | ModuleState::Running)
    }

    /// Whether `self → next` is a legal lifecycle transition
    pub fn can_transition_to(self, next: ModuleState) -> bool {
        use ModuleState::*;
        if next == Failed {
            return true;
        }
        matches!(
            (self, next),
            (Loading, Initializing)
                | (Ready, Initializing)
                | (Stopped, Initializing)
                | (Failed, Initializing)
                | (Initializing, Ready)
                | (Ready, Running)
                | (Running, Draining)
                | (Ready, Draining)
                | (Draining, Stopped)
                | (Loading, Stopped)
                | (Failed, Stopped)
        )
    }

    pub(crate) fn as_u8(self) -> u8 {
        match self {
            ModuleState::Loading => 0,
            ModuleState::Initializing => 1,
            ModuleState::Ready => 2,
            ModuleState::Running => 3,
            ModuleState::Draining => 4,
            ModuleState::Stopped => 5,
            ModuleState::Failed => 6,
        }
    }

    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            0 => ModuleState::Loading,
            1 => ModuleState::Initializing,
            2 => ModuleState::Ready,
            3 => ModuleState::Running,
            4 => ModuleState::Draining,
            5 => ModuleState::Stopped,
            _ => ModuleState::Failed,
        }
    }
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Static description of a module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleInfo {
    pub name: String,
    pub version: String,
    #[serde(rename = "type")]
    pub module_type: ModuleType,
    pub description: String,
    pub author: String,
    pub dependencies: Vec<String>,
    pub api_version: String,
}

/// Advisory resource consumption reported by a module
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub memory_mb: Option<f64>,
    pub cpu_percent: Option<f64>,
}

/// Runtime status counters of a module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleStatus {
    pub state: ModuleState,
    pub requests_processed: u64,
    pub error_count: u64,
    #[serde(with = "duration_format")]
    pub average_latency: Duration,
    pub resource_usage: ResourceUsage,
    pub last_error: Option<String>,
}

/// Free-form numeric metrics a module exposes through `metrics()`
pub type ModuleMetrics = BTreeMap<String, f64>;

/// Health verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

/// On-demand health report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub state: HealthState,
    pub message: String,
    pub details: HashMap<String, serde_json::Value>,
    pub last_check: DateTime<Utc>,
    #[serde(with = "duration_format")]
    pub check_duration: Duration,
}

impl HealthStatus {
    /// Build a health report stamped with the current time
    pub fn new(state: HealthState, message: impl Into<String>) -> Self {
        Self {
            state,
            message: message.into(),
            details: HashMap::new(),
            last_check: Utc::now(),
            check_duration: Duration::ZERO,
        }
    }

    pub fn healthy(message: impl Into<String>) -> Self {
        Self::new(HealthState::Healthy, message)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::new(HealthState::Degraded, message)
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::new(HealthState::Unhealthy, message)
    }

    /// Attach a detail entry
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_executable_states() {
        assert!(ModuleState::Ready.is_executable());
        assert!(ModuleState::Running.is_executable());
        for s in [
            ModuleState::Loading,
            ModuleState::Initializing,
            ModuleState::Draining,
            ModuleState::Stopped,
            ModuleState::Failed,
        ] {
            assert!(!s.is_executable(), "{} must not be executable", s);
        }
    }

    #[test]
    fn test_transitions() {
        assert!(ModuleState::Loading.can_transition_to(ModuleState::Initializing));
        assert!(ModuleState::Running.can_transition_to(ModuleState::Draining));
        assert!(ModuleState::Stopped.can_transition_to(ModuleState::Failed));
        assert!(!ModuleState::Loading.can_transition_to(ModuleState::Running));
        assert!(!ModuleState::Stopped.can_transition_to(ModuleState::Running));
    }

    #[test]
    fn test_state_u8_roundtrip() {
        for s in [
            ModuleState::Loading,
            ModuleState::Initializing,
            ModuleState::Ready,
            ModuleState::Running,
            ModuleState::Draining,
            ModuleState::Stopped,
            ModuleState::Failed,
        ] {
            assert_eq!(ModuleState::from_u8(s.as_u8()), s);
        }
    }

    #[test]
    fn test_module_type_serde() {
        let t: ModuleType = serde_json::from_str("\"policy\"").unwrap();
        assert_eq!(t, ModuleType::Policy);
        assert_eq!(ModuleType::Sink.to_string(), "sink");
    }
}
