// SPDX-License-Identifier: Apache-2.0

//! Log entries attached to reported operations.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::timestamp::Timestamp;

/// Severity of a log entry.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum LogSeverity {
    /// No severity assigned.
    #[default]
    Default,
    /// Debug or trace information.
    Debug,
    /// Routine information.
    Info,
    /// Normal but significant events.
    Notice,
    /// Events that might cause problems.
    Warning,
    /// Events likely to cause problems.
    Error,
    /// Critical events.
    Critical,
}

/// The payload of a log entry: either plain text or structured data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogPayload {
    /// Unstructured text.
    Text(String),
    /// A structured JSON object.
    Struct(serde_json::Value),
}

/// One log record attached to an operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// The log stream this entry belongs to.
    pub name: String,
    /// When the logged event happened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,
    /// Severity of the entry.
    #[serde(default)]
    pub severity: LogSeverity,
    /// Labels attached to the entry.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// The logged payload.
    pub payload: LogPayload,
}

impl LogEntry {
    /// Creates a text log entry on the given stream.
    #[must_use]
    pub fn text(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            timestamp: None,
            severity: LogSeverity::default(),
            labels: BTreeMap::new(),
            payload: LogPayload::Text(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_entry_defaults() {
        let entry = LogEntry::text("endpoints_log", "served");
        assert_eq!(entry.name, "endpoints_log");
        assert_eq!(entry.severity, LogSeverity::Default);
        assert_eq!(entry.payload, LogPayload::Text("served".into()));
    }

    #[test]
    fn structured_payload_round_trips() {
        let entry = LogEntry {
            name: "audit".into(),
            timestamp: Some(Timestamp::new(12, 0)),
            severity: LogSeverity::Warning,
            labels: BTreeMap::new(),
            payload: LogPayload::Struct(serde_json::json!({"status": 403})),
        };
        let json = serde_json::to_string(&entry).expect("serialize");
        let back: LogEntry = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, entry);
    }
}
