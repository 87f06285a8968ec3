// SPDX-License-Identifier: Apache-2.0

//! Request and response shapes for the check call.

use serde::{Deserialize, Serialize};

use crate::check_error::CheckErrorCode;
use crate::operation::Operation;

/// An authorization query: may this call proceed?
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckRequest {
    /// The service the call targets.
    pub service_name: String,
    /// The service configuration the caller is running against.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_config_id: String,
    /// The operation being checked.
    pub operation: Operation,
}

/// One reason a check did not pass cleanly.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckError {
    /// The machine-readable reason.
    pub code: CheckErrorCode,
    /// Free-form detail for the reason.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub detail: String,
}

impl CheckError {
    /// Creates an error with the given code and no detail.
    #[must_use]
    pub fn new(code: CheckErrorCode) -> Self {
        Self {
            code,
            detail: String::new(),
        }
    }
}

/// The upstream's answer to a check.
///
/// An empty `check_errors` list means the call may proceed.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckResponse {
    /// Echo of the checked operation's id.
    pub operation_id: String,
    /// The service configuration the answer was computed against.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_config_id: String,
    /// Reasons the call should be denied; empty means allowed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub check_errors: Vec<CheckError>,
}

impl CheckResponse {
    /// Whether the response permits the call.
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        self.check_errors.is_empty()
    }

    /// The first error code, when the response carries any.
    #[must_use]
    pub fn first_error_code(&self) -> Option<CheckErrorCode> {
        self.check_errors.first().map(|e| e.code)
    }
}
