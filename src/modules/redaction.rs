//! PII redaction for audit output

use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;

/// Placeholder written over redacted field values
pub const REDACTED: &str = "[REDACTED]";

/// Built-in PII patterns, by name
const DEFAULT_RULES: &[(&str, &str)] = &[
    ("credit_card", r"\b(?:\d{4}[-\s]?){3}\d{4}\b"),
    ("ssn", r"\b\d{3}-\d{2}-\d{4}\b"),
    ("email", r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b"),
    ("phone", r"\b\(?\d{3}\)?[-.\s]\d{3}[-.\s]\d{4}\b"),
    ("api_key", r"\b(?:sk|pk|rk)-[A-Za-z0-9_-]{16,}\b"),
    (
        "ipv4",
        r"\b(?:(?:25[0-5]|2[0-4]\d|[01]?\d\d?)\.){3}(?:25[0-5]|2[0-4]\d|[01]?\d\d?)\b",
    ),
];

struct CompiledRule {
    name: String,
    pattern: Regex,
}

/// Regex-driven PII redactor
pub struct Redactor {
    rules: Vec<CompiledRule>,
}

impl std::fmt::Debug for Redactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Redactor")
            .field("rules", &self.rules.iter().map(|r| &r.name).collect::<Vec<_>>())
            .finish()
    }
}

impl Redactor {
    /// Redactor with the built-in PII patterns
    pub fn with_defaults() -> Self {
        let rules = DEFAULT_RULES
            .iter()
            .filter_map(|(name, pattern)| {
                Regex::new(pattern).ok().map(|pattern| CompiledRule {
                    name: name.to_string(),
                    pattern,
                })
            })
            .collect();
        Self { rules }
    }

    /// Redact sensitive data in text
    pub fn redact(&self, text: &str) -> String {
        let mut result = text.to_string();
        for rule in &self.rules {
            if rule.pattern.is_match(&result) {
                result = rule
                    .pattern
                    .replace_all(&result, |caps: &regex::Captures<'_>| {
                        redact_text(&caps[0], &rule.name)
                    })
                    .into_owned();
            }
        }
        result
    }

    /// Redact every string leaf of a JSON value
    pub fn redact_value(&self, value: &mut Value) {
        match value {
            Value::String(s) => *s = self.redact(s),
            Value::Array(items) => items.iter_mut().for_each(|v| self.redact_value(v)),
            Value::Object(map) => map.values_mut().for_each(|v| self.redact_value(v)),
            _ => {}
        }
    }
}

/// Redact text based on the type of sensitive data
fn redact_text(text: &str, rule_name: &str) -> String {
    let digits: String = text.chars().filter(char::is_ascii_digit).collect();
    match rule_name {
        "credit_card" if digits.len() >= 4 => {
            format!("****-****-****-{}", &digits[digits.len() - 4..])
        }
        "ssn" => "***-**-****".to_string(),
        "email" => match text.find('@') {
            Some(at) => format!("****{}", &text[at..]),
            None => REDACTED.to_string(),
        },
        "phone" if digits.len() >= 4 => format!("***-***-{}", &digits[digits.len() - 4..]),
        "api_key" => "[API_KEY_REDACTED]".to_string(),
        _ => REDACTED.to_string(),
    }
}

/// Replace values of the named object keys, at any depth (case-insensitive)
pub fn redact_fields(value: &mut Value, fields: &[String]) {
    if fields.is_empty() {
        return;
    }
    match value {
        Value::Object(map) => {
            for (key, v) in map.iter_mut() {
                if fields.iter().any(|f| f.eq_ignore_ascii_case(key)) {
                    *v = Value::String(REDACTED.to_string());
                } else {
                    redact_fields(v, fields);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(|v| redact_fields(v, fields)),
        _ => {}
    }
}

/// Copy of `headers` with the named headers replaced (case-insensitive)
pub fn redact_headers(
    headers: &HashMap<String, String>,
    fields: &[String],
) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(k, v)| {
            if fields.iter().any(|f| f.eq_ignore_ascii_case(k)) {
                (k.clone(), REDACTED.to_string())
            } else {
                (k.clone(), v.clone())
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_redact_credit_card_and_email() {
        let r = Redactor::with_defaults();
        let out = r.redact("card 4111-1111-1111-1111, mail bob@example.com");
        assert!(out.contains("****-****-****-1111"));
        assert!(out.contains("****@example.com"));
        assert!(!out.contains("4111-1111"));
    }

    #[test]
    fn test_redact_ssn_and_key() {
        let r = Redactor::with_defaults();
        let out = r.redact("ssn 123-45-6789 key sk-abcdefghijklmnop1234");
        assert!(out.contains("***-**-****"));
        assert!(out.contains("[API_KEY_REDACTED]"));
        assert_eq!(r.redact("nothing to see"), "nothing to see");
    }

    #[test]
    fn test_all_default_rules_compile() {
        assert_eq!(Redactor::with_defaults().rules.len(), DEFAULT_RULES.len());
    }

    #[test]
    fn test_redact_fields_nested() {
        let mut v = json!({
            "api_key": "secret",
            "messages": [{"role": "user", "Password": "hunter2"}],
            "model": "gpt-4o"
        });
        redact_fields(&mut v, &["api_key".to_string(), "password".to_string()]);
        assert_eq!(v["api_key"], REDACTED);
        assert_eq!(v["messages"][0]["Password"], REDACTED);
        assert_eq!(v["model"], "gpt-4o");
    }

    #[test]
    fn test_redact_headers() {
        let mut h = HashMap::new();
        h.insert("Authorization".to_string(), "Bearer x".to_string());
        h.insert("Accept".to_string(), "*/*".to_string());
        let out = redact_headers(&h, &["authorization".to_string()]);
        assert_eq!(out["Authorization"], REDACTED);
        assert_eq!(out["Accept"], "*/*");
    }

    #[test]
    fn test_redact_value_walks_strings() {
        let r = Redactor::with_defaults();
        let mut v = json!({"content": ["call 555-123-4567"]});
        r.redact_value(&mut v);
        assert_eq!(v["content"][0], "call ***-***-4567");
    }
}
