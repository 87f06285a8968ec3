// SPDX-License-Identifier: Apache-2.0

//! Metric values and the kinds that govern how they aggregate.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::distribution::Distribution;
use crate::timestamp::Timestamp;

/// How successive values of a metric combine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Incremental values that sum under aggregation (requests, bytes).
    #[default]
    Delta,
    /// Point-in-time values; aggregation keeps the latest (queue depth).
    Gauge,
    /// Running totals; aggregation keeps the latest.
    Cumulative,
}

/// The payload of a single metric value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricValuePayload {
    /// A signed 64-bit integer value.
    Int64(i64),
    /// A double-precision floating point value.
    Double(f64),
    /// A bucketed histogram with running summary statistics.
    Distribution(Distribution),
}

impl Default for MetricValuePayload {
    fn default() -> Self {
        Self::Int64(0)
    }
}

/// One value of a metric, carrying its own label map and time range.
///
/// The label map is part of the value's identity inside a
/// [`MetricValueSet`]: two values with different labels are distinct series
/// of the same metric.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricValue {
    /// Labels identifying this series within the metric.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Start of the time range the value covers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<Timestamp>,
    /// End of the time range the value covers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<Timestamp>,
    /// The value itself.
    pub value: MetricValuePayload,
}

impl MetricValue {
    /// Creates an int64 value with no labels or time range.
    #[must_use]
    pub fn int64(value: i64) -> Self {
        Self {
            value: MetricValuePayload::Int64(value),
            ..Self::default()
        }
    }

    /// Creates a double value with no labels or time range.
    #[must_use]
    pub fn double(value: f64) -> Self {
        Self {
            value: MetricValuePayload::Double(value),
            ..Self::default()
        }
    }

    /// Creates a distribution value with no labels or time range.
    #[must_use]
    pub fn distribution(value: Distribution) -> Self {
        Self {
            value: MetricValuePayload::Distribution(value),
            ..Self::default()
        }
    }
}

/// All reported values of one named metric.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricValueSet {
    /// The metric's fully qualified name.
    pub metric_name: String,
    /// The values reported for the metric, one per label combination.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<MetricValue>,
}

impl MetricValueSet {
    /// Creates a set holding a single value.
    #[must_use]
    pub fn single(metric_name: impl Into<String>, value: MetricValue) -> Self {
        Self {
            metric_name: metric_name.into(),
            values: vec![value],
        }
    }
}
