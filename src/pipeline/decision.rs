//! Pipeline output types

use crate::config::duration_format;
use crate::module::Action;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// Folded verdict of one pipeline run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineDecision {
    /// Highest-severity action observed
    pub action: Action,
    pub block_reason: Option<String>,
    /// Namespaced `<module>.<key>` annotations from every module that ran
    pub annotations: HashMap<String, Value>,
    /// Final body after all transformations, if any module changed it
    pub modified_body: Option<String>,
    pub modified_headers: HashMap<String, String>,
    /// Sum of module processing times
    #[serde(with = "duration_format")]
    pub processing_time: Duration,
    /// Wall clock for the whole run
    #[serde(with = "duration_format")]
    pub elapsed: Duration,
    /// Module metadata plus `failures.<module>` and `blocked_by` entries
    pub metadata: HashMap<String, Value>,
    /// Modules invoked, in order
    pub modules_invoked: Vec<String>,
    /// Modules whose conditions did not match
    pub modules_skipped: Vec<String>,
}

impl PipelineDecision {
    /// `Continue`, `Annotate` and `Transform` all let the exchange through
    pub fn is_allowed(&self) -> bool {
        self.action.is_allow()
    }

    pub fn is_blocked(&self) -> bool {
        self.action == Action::Block
    }

    /// Failure reason recorded for a module, if it failed
    pub fn failure(&self, module: &str) -> Option<&str> {
        self.metadata
            .get(&format!("failures.{}", module))
            .and_then(Value::as_str)
    }
}

/// Result of one pipeline run
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    /// The pipeline reached a verdict
    Decision(PipelineDecision),
    /// The caller cancelled before a verdict was reached; no decision exists
    Aborted { elapsed: Duration, reason: String },
}

impl PipelineOutcome {
    pub fn decision(&self) -> Option<&PipelineDecision> {
        match self {
            PipelineOutcome::Decision(d) => Some(d),
            PipelineOutcome::Aborted { .. } => None,
        }
    }

    pub fn into_decision(self) -> Option<PipelineDecision> {
        match self {
            PipelineOutcome::Decision(d) => Some(d),
            PipelineOutcome::Aborted { .. } => None,
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, PipelineOutcome::Aborted { .. })
    }
}
