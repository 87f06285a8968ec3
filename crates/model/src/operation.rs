// SPDX-License-Identifier: Apache-2.0

//! The operation: the smallest unit of checking and reporting.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::log_entry::LogEntry;
use crate::metric::MetricValueSet;
use crate::timestamp::Timestamp;

/// How much an operation's delivery matters.
///
/// High-importance operations (billing events) cannot tolerate the loss
/// window created by aggregation and must be sent upstream directly.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Importance {
    /// The operation may be aggregated and delivered with delay.
    #[default]
    Low,
    /// The operation bypasses aggregation entirely.
    High,
}

/// One API call, identified by its method and consumer, carrying the
/// metrics and log entries recorded for it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Unique id of this operation instance.
    pub operation_id: String,
    /// The API method selector, e.g. `ListShelves`.
    pub operation_name: String,
    /// Either `api_key:<key>` when the key is valid, or `project:<id>`.
    pub consumer_id: String,
    /// When the call started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<Timestamp>,
    /// When the call completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<Timestamp>,
    /// Labels describing the call.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Metrics recorded for the call, one set per metric name.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metric_value_sets: Vec<MetricValueSet>,
    /// Log entries recorded for the call.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub log_entries: Vec<LogEntry>,
    /// Delivery importance.
    #[serde(default)]
    pub importance: Importance,
}

impl Operation {
    /// Creates an operation with a fresh random id.
    #[must_use]
    pub fn new(operation_name: impl Into<String>, consumer_id: impl Into<String>) -> Self {
        Self {
            operation_id: new_operation_id(),
            operation_name: operation_name.into(),
            consumer_id: consumer_id.into(),
            ..Self::default()
        }
    }
}

/// Generates a fresh operation id.
#[must_use]
pub fn new_operation_id() -> String {
    Uuid::new_v4().to_string()
}
