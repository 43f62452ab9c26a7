//! Module contract and shared types
//!
//! Everything a module implementation needs: the [`Module`] trait, the
//! request/response contexts it sees, the results it returns, its
//! configuration record, execution conditions and a reusable
//! [`ModuleRuntime`] for lifecycle and counter bookkeeping.

pub mod condition;
pub mod config;
mod contract;
#[cfg(test)]
pub(crate) mod mock;
pub mod rules;
pub mod runtime;
pub mod status;
pub mod types;

pub use condition::{CompiledCondition, ConditionSet, ConditionSubject};
pub use config::{Condition, ConditionOperator, ModuleConfig, ResourceLimits, Timeouts};
pub use contract::Module;
pub use rules::{ExecutionRule, FailureMode};
pub use runtime::ModuleRuntime;
pub use status::{
    HealthState, HealthStatus, ModuleInfo, ModuleMetrics, ModuleState, ModuleStatus, ModuleType,
    ResourceUsage, MODULE_API_VERSION,
};
pub use types::{
    Action, ProcessRequestContext, ProcessRequestResult, ProcessResponseContext,
    ProcessResponseResult, ProcessResult, TokenUsage,
};
