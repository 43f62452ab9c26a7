//! Duration fields in configuration files and API payloads.
//!
//! Durations are written as humantime strings (`50ms`, `1h 30m`, `2s`).

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::Duration;

/// Parse a humantime duration string.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    humantime::parse_duration(s.trim())
        .map_err(|e| format!("invalid duration '{}': {} (expected e.g. 50ms, 2s, 1h)", s, e))
}

/// Format a duration as a humantime string.
pub fn format_duration(d: Duration) -> String {
    humantime::format_duration(d).to_string()
}

/// Deserialize a duration from a string.
pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    parse_duration(&s).map_err(serde::de::Error::custom)
}

/// Serialize a duration to a humantime string.
pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    format_duration(*duration).serialize(serializer)
}

/// Optional variant, for `Option<Duration>` fields.
pub mod option {
    use super::*;

    /// Deserialize an optional duration from a string.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt: Option<String> = Option::deserialize(deserializer)?;
        match opt {
            Some(s) => parse_duration(&s)
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }

    /// Serialize an optional duration to a humantime string.
    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&format_duration(*d)),
            None => serializer.serialize_none(),
        }
    }
}
