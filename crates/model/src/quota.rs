// SPDX-License-Identifier: Apache-2.0

//! Request and response shapes for the allocate-quota call.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::metric::{MetricValue, MetricValueSet};

/// How strictly an allocation should be enforced upstream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaMode {
    /// Allocate what is available; succeed even when the full amount
    /// cannot be granted.
    #[default]
    BestEffort,
    /// Allocate exactly the requested amount or fail.
    Normal,
    /// Only check that the amount is available, without consuming it.
    CheckOnly,
}

/// The quota-consuming half of an operation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QuotaOperation {
    /// Unique id of this allocation attempt.
    pub operation_id: String,
    /// The API method consuming quota.
    pub method_name: String,
    /// Either `api_key:<key>` or `project:<id>`.
    pub consumer_id: String,
    /// Labels describing the call.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// The amounts to allocate, one set per metric.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub quota_metrics: Vec<MetricValueSet>,
    /// Enforcement mode for this allocation.
    #[serde(default)]
    pub quota_mode: QuotaMode,
}

impl QuotaOperation {
    /// Creates an operation allocating `cost` units of `metric_name`.
    #[must_use]
    pub fn allocation(
        operation_id: impl Into<String>,
        method_name: impl Into<String>,
        consumer_id: impl Into<String>,
        metric_name: impl Into<String>,
        cost: i64,
    ) -> Self {
        Self {
            operation_id: operation_id.into(),
            method_name: method_name.into(),
            consumer_id: consumer_id.into(),
            quota_metrics: vec![MetricValueSet::single(metric_name, MetricValue::int64(cost))],
            ..Self::default()
        }
    }
}

/// A resource-consumption query: reserve N units of a metric.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AllocateQuotaRequest {
    /// The service the call targets.
    pub service_name: String,
    /// The service configuration the caller is running against.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_config_id: String,
    /// The allocation to perform.
    pub allocate_operation: QuotaOperation,
}

/// Machine-readable reasons an allocation can fail.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuotaErrorCode {
    /// No reason given.
    #[default]
    Unspecified,
    /// Not enough quota remains for the consumer.
    ResourceExhausted,
    /// Billing is not active on the consumer's project.
    BillingNotActive,
    /// The consumer's project has been deleted.
    ProjectDeleted,
    /// The API key is malformed.
    ApiKeyInvalid,
    /// The API key has expired.
    ApiKeyExpired,
}

/// One reason an allocation did not succeed.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QuotaError {
    /// The machine-readable reason.
    pub code: QuotaErrorCode,
    /// The quota group or metric the error applies to.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subject: String,
    /// Free-form description of the failure.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// The upstream's answer to an allocation.
///
/// An empty `allocate_errors` list means the allocation succeeded.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AllocateQuotaResponse {
    /// Echo of the allocation's operation id.
    pub operation_id: String,
    /// Reasons the allocation failed; empty means granted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allocate_errors: Vec<QuotaError>,
    /// Post-allocation state of the touched metrics.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub quota_metrics: Vec<MetricValueSet>,
    /// The service configuration the answer was computed against.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_config_id: String,
}

impl AllocateQuotaResponse {
    /// Whether the allocation was granted.
    #[must_use]
    pub fn is_granted(&self) -> bool {
        self.allocate_errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::MetricValuePayload;

    #[test]
    fn allocation_builds_one_metric_set() {
        let op = QuotaOperation::allocation("id1", "ListShelves", "project:p", "reads", 3);
        assert_eq!(op.quota_metrics.len(), 1);
        assert_eq!(op.quota_metrics[0].metric_name, "reads");
        assert_eq!(
            op.quota_metrics[0].values[0].value,
            MetricValuePayload::Int64(3)
        );
        assert_eq!(op.quota_mode, QuotaMode::BestEffort);
    }

    #[test]
    fn empty_errors_mean_granted() {
        assert!(AllocateQuotaResponse::default().is_granted());
        let denied = AllocateQuotaResponse {
            allocate_errors: vec![QuotaError {
                code: QuotaErrorCode::ResourceExhausted,
                ..QuotaError::default()
            }],
            ..AllocateQuotaResponse::default()
        };
        assert!(!denied.is_granted());
    }
}
