//! Execution policy keyed by module type
//!
//! | Type        | On failure  | Required by default |
//! |-------------|-------------|---------------------|
//! | Inspector   | fail-open   | no                  |
//! | Policy      | fail-closed | yes                 |
//! | Transformer | fail-closed | yes                 |
//! | Sink        | fail-open   | no                  |

use super::config::ModuleConfig;
use super::status::ModuleType;

/// How a module's internal failure affects the verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// Failure is treated as `Block`
    Closed,
    /// Failure is logged and treated as `Continue`
    Open,
}

/// Execution rule for one module type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionRule {
    pub failure_mode: FailureMode,
    pub required_by_default: bool,
}

const FAIL_CLOSED_GATE: ExecutionRule = ExecutionRule {
    failure_mode: FailureMode::Closed,
    required_by_default: true,
};

const FAIL_OPEN_OBSERVER: ExecutionRule = ExecutionRule {
    failure_mode: FailureMode::Open,
    required_by_default: false,
};

impl ModuleType {
    /// The rule table entry for this type
    pub const fn rule(self) -> ExecutionRule {
        match self {
            ModuleType::Policy | ModuleType::Transformer => FAIL_CLOSED_GATE,
            ModuleType::Inspector | ModuleType::Sink => FAIL_OPEN_OBSERVER,
        }
    }
}

impl ModuleConfig {
    /// Effective failure mode: `advisory` downgrades fail-closed to fail-open
    pub fn failure_mode(&self) -> FailureMode {
        if self.advisory {
            FailureMode::Open
        } else {
            self.module_type.rule().failure_mode
        }
    }

    /// Whether the module counts as required for aggregate health
    pub fn is_required(&self) -> bool {
        self.required
            .unwrap_or_else(|| !self.advisory && self.module_type.rule().required_by_default)
    }
}
