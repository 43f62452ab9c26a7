//! Execution conditions
//!
//! Conditions are compiled once when a module is registered or reloaded, so a
//! bad regex or a mistyped value is a configuration error and never reaches
//! the pipeline.

use super::config::{Condition, ConditionOperator};
use super::types::{lookup_header, ProcessRequestContext, ProcessResponseContext};
use regex::Regex;
use serde_json::Value;
use std::borrow::Cow;

/// Something conditions can be evaluated against
pub trait ConditionSubject {
    /// Resolve a condition field to its string value, `None` when absent
    fn field(&self, name: &str) -> Option<Cow<'_, str>>;
}

impl ConditionSubject for ProcessRequestContext {
    fn field(&self, name: &str) -> Option<Cow<'_, str>> {
        match name {
            "tenant" | "tenant_id" => non_empty(&self.tenant_id),
            "provider" => non_empty(&self.provider),
            "model" => non_empty(&self.model),
            "request_id" => non_empty(&self.request_id),
            "method" => Some(Cow::Borrowed(self.method.as_str())),
            "path" => Some(Cow::Borrowed(self.path.as_str())),
            _ => {
                if let Some(h) = name.strip_prefix("header.") {
                    self.header(h).map(Cow::Borrowed)
                } else if let Some(k) = name.strip_prefix("client.") {
                    self.client.get(k).map(|v| Cow::Borrowed(v.as_str()))
                } else if let Some(k) = name.strip_prefix("annotation.") {
                    self.annotations.get(k).map(value_to_string)
                } else {
                    None
                }
            }
        }
    }
}

impl ConditionSubject for ProcessResponseContext {
    fn field(&self, name: &str) -> Option<Cow<'_, str>> {
        match name {
            "status_code" => Some(Cow::Owned(self.status_code.to_string())),
            _ => match name.strip_prefix("response_header.") {
                Some(h) => lookup_header(&self.response_headers, h).map(Cow::Borrowed),
                None => self.request.field(name),
            },
        }
    }
}

fn non_empty(s: &str) -> Option<Cow<'_, str>> {
    (!s.is_empty()).then_some(Cow::Borrowed(s))
}

fn value_to_string(v: &Value) -> Cow<'_, str> {
    match v {
        Value::String(s) => Cow::Borrowed(s.as_str()),
        other => Cow::Owned(other.to_string()),
    }
}

#[derive(Debug, Clone)]
enum Matcher {
    Eq(String),
    Ne(String),
    In(Vec<String>),
    NotIn(Vec<String>),
    Regex(Regex),
}

/// A condition ready for evaluation
#[derive(Debug, Clone)]
pub struct CompiledCondition {
    field: String,
    matcher: Matcher,
}

impl CompiledCondition {
    /// Compile a condition, rejecting malformed values and regexes
    pub fn compile(condition: &Condition) -> Result<Self, String> {
        if condition.field.trim().is_empty() {
            return Err("condition field must not be empty".to_string());
        }
        let matcher = match condition.operator {
            ConditionOperator::Eq => Matcher::Eq(scalar(&condition.field, &condition.value)?),
            ConditionOperator::Ne => Matcher::Ne(scalar(&condition.field, &condition.value)?),
            ConditionOperator::In => Matcher::In(list(&condition.field, &condition.value)?),
            ConditionOperator::NotIn => Matcher::NotIn(list(&condition.field, &condition.value)?),
            ConditionOperator::Regex => {
                let pattern = scalar(&condition.field, &condition.value)?;
                let re = Regex::new(&pattern).map_err(|e| {
                    format!("invalid regex for condition on '{}': {}", condition.field, e)
                })?;
                Matcher::Regex(re)
            }
        };
        Ok(Self {
            field: condition.field.clone(),
            matcher,
        })
    }

    /// Evaluate against a subject.
    ///
    /// An absent field never equals anything: `eq`/`in`/`regex` fail and
    /// `ne`/`not_in` pass.
    pub fn matches(&self, subject: &dyn ConditionSubject) -> bool {
        let value = subject.field(&self.field);
        match (&self.matcher, value) {
            (Matcher::Eq(expected), Some(v)) => v == expected.as_str(),
            (Matcher::Ne(expected), Some(v)) => v != expected.as_str(),
            (Matcher::In(set), Some(v)) => set.iter().any(|s| s.as_str() == v),
            (Matcher::NotIn(set), Some(v)) => !set.iter().any(|s| s.as_str() == v),
            (Matcher::Regex(re), Some(v)) => re.is_match(&v),
            (Matcher::Ne(_), None) | (Matcher::NotIn(_), None) => true,
            (_, None) => false,
        }
    }
}

fn scalar(field: &str, value: &Value) -> Result<String, String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        _ => Err(format!(
            "condition on '{}' expects a scalar value, got {}",
            field, value
        )),
    }
}

fn list(field: &str, value: &Value) -> Result<Vec<String>, String> {
    match value {
        Value::Array(items) => items.iter().map(|v| scalar(field, v)).collect(),
        other => scalar(field, other).map(|s| vec![s]),
    }
}

/// AND-combined set of compiled conditions
#[derive(Debug, Clone, Default)]
pub struct ConditionSet {
    conditions: Vec<CompiledCondition>,
}

impl ConditionSet {
    /// Compile every condition; the first failure aborts
    pub fn compile(conditions: &[Condition]) -> Result<Self, String> {
        let conditions = conditions
            .iter()
            .map(CompiledCondition::compile)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { conditions })
    }

    /// True when every condition matches (vacuously true when empty)
    pub fn matches(&self, subject: &dyn ConditionSubject) -> bool {
        self.conditions.iter().all(|c| c.matches(subject))
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }
}
