// SPDX-License-Identifier: Apache-2.0

//! Test doubles for driving the facade without a wire.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use svcctl_model::{
    AllocateQuotaRequest, AllocateQuotaResponse, CheckRequest, CheckResponse, ReportRequest,
    ReportResponse,
};

use crate::client::ThreadSource;
use crate::transport::{Transport, TransportError};

#[derive(Default)]
struct Recorded {
    check_results: VecDeque<Result<CheckResponse, TransportError>>,
    quota_results: VecDeque<Result<AllocateQuotaResponse, TransportError>>,
    report_results: VecDeque<Result<ReportResponse, TransportError>>,
    checks: Vec<CheckRequest>,
    quotas: Vec<AllocateQuotaRequest>,
    reports: Vec<ReportRequest>,
}

/// A transport that records every request and answers from queues.
///
/// With no queued result, calls succeed with a response echoing the
/// request's operation id, which is what a healthy upstream does for the
/// cases the engine cares about.
#[derive(Default)]
pub struct FakeTransport {
    inner: Mutex<Recorded>,
}

impl FakeTransport {
    /// Creates a transport answering every call positively.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queues the result for the next check call.
    pub fn enqueue_check(&self, result: Result<CheckResponse, TransportError>) {
        self.inner.lock().check_results.push_back(result);
    }

    /// Queues the result for the next allocate-quota call.
    pub fn enqueue_quota(&self, result: Result<AllocateQuotaResponse, TransportError>) {
        self.inner.lock().quota_results.push_back(result);
    }

    /// Queues the result for the next report call.
    pub fn enqueue_report(&self, result: Result<ReportResponse, TransportError>) {
        self.inner.lock().report_results.push_back(result);
    }

    /// Check requests seen so far.
    #[must_use]
    pub fn checks(&self) -> Vec<CheckRequest> {
        self.inner.lock().checks.clone()
    }

    /// Allocate-quota requests seen so far.
    #[must_use]
    pub fn quotas(&self) -> Vec<AllocateQuotaRequest> {
        self.inner.lock().quotas.clone()
    }

    /// Report requests seen so far.
    #[must_use]
    pub fn reports(&self) -> Vec<ReportRequest> {
        self.inner.lock().reports.clone()
    }
}

impl Transport for FakeTransport {
    fn check(&self, request: &CheckRequest) -> Result<CheckResponse, TransportError> {
        let mut inner = self.inner.lock();
        inner.checks.push(request.clone());
        inner.check_results.pop_front().unwrap_or_else(|| {
            Ok(CheckResponse {
                operation_id: request.operation.operation_id.clone(),
                ..CheckResponse::default()
            })
        })
    }

    fn allocate_quota(
        &self,
        request: &AllocateQuotaRequest,
    ) -> Result<AllocateQuotaResponse, TransportError> {
        let mut inner = self.inner.lock();
        inner.quotas.push(request.clone());
        inner.quota_results.pop_front().unwrap_or_else(|| {
            Ok(AllocateQuotaResponse {
                operation_id: request.allocate_operation.operation_id.clone(),
                ..AllocateQuotaResponse::default()
            })
        })
    }

    fn report(&self, request: &ReportRequest) -> Result<ReportResponse, TransportError> {
        let mut inner = self.inner.lock();
        inner.reports.push(request.clone());
        inner
            .report_results
            .pop_front()
            .unwrap_or_else(|| Ok(ReportResponse::default()))
    }
}

/// A thread source that never provides a thread, forcing the client into
/// inline dispatch.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoThreadSource;

impl ThreadSource for NoThreadSource {
    fn spawn(&self, _name: &str, _body: Box<dyn FnOnce() + Send>) -> io::Result<JoinHandle<()>> {
        Err(io::Error::other("thread creation disabled"))
    }
}
