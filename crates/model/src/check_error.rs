// SPDX-License-Identifier: Apache-2.0

//! Check error codes and their HTTP-facing classification.
//!
//! The classification table gives HTTP filters an unambiguous mapping from
//! upstream denial reasons to status codes and user-visible messages.
//! Availability-related codes fail open: the caller is allowed through on
//! the assumption that a downstream will enforce policy if needed.

use serde::{Deserialize, Serialize};

/// Machine-readable reasons a check can fail.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckErrorCode {
    /// No reason given.
    #[default]
    Unspecified,
    /// The consumer's project was not found.
    NotFound,
    /// The consumer is not allowed to call the API.
    PermissionDenied,
    /// Quota for the consumer is exhausted.
    ResourceExhausted,
    /// The service is not activated on the consumer's project.
    ServiceNotActivated,
    /// Billing is disabled on the consumer's project.
    BillingDisabled,
    /// The consumer's project has been deleted.
    ProjectDeleted,
    /// The consumer's project id is malformed.
    ProjectInvalid,
    /// The caller's IP address is blocked.
    IpAddressBlocked,
    /// The caller's referer is blocked.
    RefererBlocked,
    /// The calling application is blocked.
    ClientAppBlocked,
    /// The consumer cannot see this API.
    VisibilityDenied,
    /// The API key is malformed.
    ApiKeyInvalid,
    /// The API key has expired.
    ApiKeyExpired,
    /// The API key does not exist.
    ApiKeyNotFound,
    /// Consumer namespace lookup was unavailable.
    NamespaceLookupUnavailable,
    /// Service status could not be determined.
    ServiceStatusUnavailable,
    /// Billing status could not be determined.
    BillingStatusUnavailable,
    /// Quota state could not be determined.
    QuotaCheckUnavailable,
}

impl CheckErrorCode {
    /// Whether the code reports a transient availability problem rather
    /// than a policy decision. Such codes fail open.
    #[must_use]
    pub fn is_availability_failure(&self) -> bool {
        matches!(
            self,
            Self::NamespaceLookupUnavailable
                | Self::ServiceStatusUnavailable
                | Self::BillingStatusUnavailable
                | Self::QuotaCheckUnavailable
        )
    }
}

/// HTTP-facing classification of a check outcome.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckErrorInfo {
    /// HTTP status the filter should answer with.
    pub http_status: u16,
    /// User-visible message; empty when the call is allowed through.
    pub message: String,
    /// Whether the failure concerns the caller's API key.
    pub is_api_key_error: bool,
}

impl CheckErrorInfo {
    fn allowed() -> Self {
        Self {
            http_status: 200,
            message: String::new(),
            is_api_key_error: false,
        }
    }

    fn denied(http_status: u16, message: impl Into<String>) -> Self {
        Self {
            http_status,
            message: message.into(),
            is_api_key_error: false,
        }
    }

    fn api_key(http_status: u16, message: impl Into<String>) -> Self {
        Self {
            http_status,
            message: message.into(),
            is_api_key_error: true,
        }
    }

    /// Classification for a request that arrived without an API key on a
    /// method that requires an established caller identity.
    #[must_use]
    pub fn missing_api_key() -> Self {
        Self::api_key(
            401,
            "Method doesn't allow callers without established identity. \
             Please use an API key or other form of API consumer identity \
             to call this API.",
        )
    }
}

/// Classifies the first check error of a response.
///
/// `project_id` and the error's `detail` expand the `{project_id}` and
/// `{detail}` placeholders of the message templates. A `None` error (clean
/// response) classifies as allowed, as do availability failures.
#[must_use]
pub fn classify(
    first_error: Option<(CheckErrorCode, &str)>,
    project_id: &str,
) -> CheckErrorInfo {
    use CheckErrorCode as Code;
    let Some((code, detail)) = first_error else {
        return CheckErrorInfo::allowed();
    };
    match code {
        Code::NamespaceLookupUnavailable
        | Code::ServiceStatusUnavailable
        | Code::BillingStatusUnavailable
        | Code::QuotaCheckUnavailable => CheckErrorInfo::allowed(),
        Code::NotFound => {
            CheckErrorInfo::denied(400, format!("Client project not found: {project_id}"))
        }
        Code::ProjectInvalid => {
            CheckErrorInfo::denied(400, format!("Client project not valid: {project_id}"))
        }
        Code::VisibilityDenied => CheckErrorInfo::denied(
            400,
            format!("Project {project_id} has no visibility access to the service"),
        ),
        Code::BillingDisabled => CheckErrorInfo::denied(
            400,
            format!("Project {project_id} has billing disabled. Please enable it"),
        ),
        Code::ApiKeyNotFound => CheckErrorInfo::api_key(400, "API key not found"),
        Code::ApiKeyExpired => CheckErrorInfo::api_key(400, "API key expired"),
        Code::ApiKeyInvalid => CheckErrorInfo::api_key(400, "API key not valid"),
        Code::ServiceNotActivated => CheckErrorInfo::denied(
            403,
            format!("API not activated for the project: {project_id}"),
        ),
        Code::PermissionDenied => {
            CheckErrorInfo::denied(403, format!("Permission denied: {detail}"))
        }
        Code::IpAddressBlocked => CheckErrorInfo::denied(403, detail),
        Code::RefererBlocked => CheckErrorInfo::denied(403, detail),
        Code::ClientAppBlocked => CheckErrorInfo::denied(403, detail),
        Code::ProjectDeleted => {
            CheckErrorInfo::denied(403, format!("Project {project_id} has been deleted"))
        }
        Code::Unspecified | Code::ResourceExhausted => CheckErrorInfo::denied(
            500,
            format!("Request blocked due to unsupported block reason {detail}"),
        ),
    }
}
