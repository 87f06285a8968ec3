// SPDX-License-Identifier: Apache-2.0

//! The wire seam between the aggregation engine and the upstream API.
//!
//! The engine never opens connections itself; it is handed an
//! implementation of [`Transport`] and treats every failure as "no
//! response". Production implementations wrap an HTTP or gRPC stack;
//! tests plug in a recording fake.

use svcctl_model::{
    AllocateQuotaRequest, AllocateQuotaResponse, CheckRequest, CheckResponse, ReportRequest,
    ReportResponse,
};

/// Failures raised by a transport implementation.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    /// The upstream endpoint could not be reached or timed out.
    #[error("failed to reach the service control endpoint: {0}")]
    Io(String),

    /// The upstream answered outside the request/response contract.
    #[error("upstream returned an unexpected status: {0}")]
    Status(u16),
}

/// The three unary calls of the service control API.
pub trait Transport: Send + Sync {
    /// Asks whether a call may proceed.
    fn check(&self, request: &CheckRequest) -> Result<CheckResponse, TransportError>;

    /// Reserves quota for a call.
    fn allocate_quota(
        &self,
        request: &AllocateQuotaRequest,
    ) -> Result<AllocateQuotaResponse, TransportError>;

    /// Records completed calls.
    fn report(&self, request: &ReportRequest) -> Result<ReportResponse, TransportError>;
}
