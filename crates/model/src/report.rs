// SPDX-License-Identifier: Apache-2.0

//! Request and response shapes for the report call.

use serde::{Deserialize, Serialize};

use crate::operation::Operation;

/// A record of completed calls, carrying their metrics and log entries.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportRequest {
    /// The service the operations belong to.
    pub service_name: String,
    /// The service configuration the caller is running against.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_config_id: String,
    /// The operations to record. At most
    /// [`MAX_OPERATIONS_PER_REPORT`](crate::MAX_OPERATIONS_PER_REPORT)
    /// per request.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operations: Vec<Operation>,
}

/// A partial failure while recording one operation of a report.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportError {
    /// The id of the operation that failed.
    pub operation_id: String,
    /// Description of the failure.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// The upstream's answer to a report.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportResponse {
    /// Operations that could not be recorded; empty means full success.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub report_errors: Vec<ReportError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_round_trips() {
        let req = ReportRequest {
            service_name: "svc".into(),
            service_config_id: "cfg-1".into(),
            operations: vec![Operation::new("m", "project:p")],
        };
        let json = serde_json::to_string(&req).expect("serialize");
        let back: ReportRequest = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, req);
    }
}
