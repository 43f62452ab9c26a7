//! Aggregate health over all registered modules

use crate::config::duration_format;
use crate::module::{HealthState, HealthStatus, ModuleState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Health of one module inside the aggregate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleHealth {
    pub required: bool,
    pub lifecycle: ModuleState,
    pub health: HealthStatus,
}

/// Aggregate health report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryHealth {
    pub state: HealthState,
    pub modules: BTreeMap<String, ModuleHealth>,
    #[serde(with = "duration_format")]
    pub check_duration: Duration,
}

impl RegistryHealth {
    pub fn is_healthy(&self) -> bool {
        self.state == HealthState::Healthy
    }
}

/// Fold per-module health into one verdict.
///
/// A required module that is unhealthy (or unknown) makes the host
/// unhealthy; anything short of healthy elsewhere only degrades it.
pub fn aggregate<'a>(modules: impl IntoIterator<Item = &'a ModuleHealth>) -> HealthState {
    let mut overall = HealthState::Healthy;
    for m in modules {
        match (m.health.state, m.required) {
            (HealthState::Healthy, _) => {}
            (HealthState::Unhealthy | HealthState::Unknown, true) => {
                return HealthState::Unhealthy;
            }
            _ => overall = HealthState::Degraded,
        }
    }
    overall
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(state: HealthState, required: bool) -> ModuleHealth {
        ModuleHealth {
            required,
            lifecycle: ModuleState::Running,
            health: HealthStatus::new(state, ""),
        }
    }

    #[test]
    fn test_all_healthy() {
        let all = [
            entry(HealthState::Healthy, true),
            entry(HealthState::Healthy, false),
        ];
        assert_eq!(aggregate(&all), HealthState::Healthy);
        assert_eq!(aggregate(std::iter::empty()), HealthState::Healthy);
    }

    #[test]
    fn test_optional_failure_degrades() {
        let all = [
            entry(HealthState::Healthy, true),
            entry(HealthState::Unhealthy, false),
        ];
        assert_eq!(aggregate(&all), HealthState::Degraded);
    }

    #[test]
    fn test_required_failure_is_unhealthy() {
        let all = [
            entry(HealthState::Degraded, false),
            entry(HealthState::Unhealthy, true),
        ];
        assert_eq!(aggregate(&all), HealthState::Unhealthy);
    }

    #[test]
    fn test_required_degraded_only_degrades() {
        let all = [entry(HealthState::Degraded, true)];
        assert_eq!(aggregate(&all), HealthState::Degraded);
    }
}
