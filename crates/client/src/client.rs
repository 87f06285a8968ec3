// SPDX-License-Identifier: Apache-2.0

//! The client facade: lifecycle, dispatch, and background flushing.

use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use parking_lot::Mutex;

use svcctl_aggregation::{
    CheckAggregationOptions, CheckAggregator, Clock, QuotaAggregationOptions, QuotaAggregator,
    ReportAggregationOptions, ReportAggregator, SystemClock,
};
use svcctl_model::{
    AllocateQuotaRequest, AllocateQuotaResponse, CheckRequest, CheckResponse, MetricKind,
    ReportRequest,
};

use crate::error::Error;
use crate::scheduler::Scheduler;
use crate::stats::Statistics;
use crate::transport::Transport;

/// Heap tie-break priorities for the recurring flushes. Checks outrank
/// reports so stale authorization data refreshes first.
const FLUSH_CHECKS_PRIORITY: u32 = 0;
const FLUSH_REPORTS_PRIORITY: u32 = 1;
const FLUSH_QUOTA_PRIORITY: u32 = 2;

/// Source of the background flush thread.
///
/// Pluggable so embedders can route the thread through their own pools,
/// and so tests can force the inline-dispatch fallback.
pub trait ThreadSource: Send + Sync {
    /// Spawns a thread running `body`, or reports that none is
    /// available.
    fn spawn(&self, name: &str, body: Box<dyn FnOnce() + Send>) -> io::Result<JoinHandle<()>>;
}

/// Spawns plain standard-library threads.
#[derive(Clone, Copy, Debug, Default)]
pub struct StdThreadSource;

impl ThreadSource for StdThreadSource {
    fn spawn(&self, name: &str, body: Box<dyn FnOnce() + Send>) -> io::Result<JoinHandle<()>> {
        std::thread::Builder::new().name(name.to_owned()).spawn(body)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Created,
    Running,
    Stopped,
}

impl State {
    fn name(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Stopped => "stopped",
        }
    }
}

struct Lifecycle {
    state: State,
    worker: Option<JoinHandle<()>>,
}

/// Client-side front for the service control API.
///
/// Answers checks and allocations from the aggregation caches whenever it
/// safely can, and batches the remaining traffic upstream through the
/// configured [`Transport`]. Construct with [`ServiceControlClient::builder`],
/// call [`start`](Self::start) before the first operation, and
/// [`stop`](Self::stop) to flush outstanding reports on the way down.
pub struct ServiceControlClient {
    service_name: String,
    checks: Arc<CheckAggregator>,
    quotas: Arc<QuotaAggregator>,
    reports: Arc<ReportAggregator>,
    transport: Arc<dyn Transport>,
    scheduler: Arc<Scheduler>,
    stats: Arc<Statistics>,
    thread_source: Arc<dyn ThreadSource>,
    stats_log_frequency: i64,
    inline_dispatch: AtomicBool,
    lifecycle: Mutex<Lifecycle>,
}

impl ServiceControlClient {
    /// Starts configuring a client for `service_name`.
    #[must_use]
    pub fn builder(service_name: impl Into<String>) -> Builder {
        Builder::new(service_name)
    }

    /// The service this client fronts.
    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// This client's traffic counters.
    #[must_use]
    pub fn statistics(&self) -> &Statistics {
        &self.stats
    }

    /// Starts background flushing. Idempotent while running; fails once
    /// stopped.
    ///
    /// When the thread source cannot provide a thread the client stays
    /// usable: the scheduler then runs cooperatively at the tail of every
    /// [`report`](Self::report) call.
    pub fn start(&self) -> Result<(), Error> {
        let mut lifecycle = self.lifecycle.lock();
        match lifecycle.state {
            State::Running => return Ok(()),
            State::Stopped => return Err(Error::InvalidState(State::Stopped.name())),
            State::Created => {}
        }
        self.schedule_recurring_flushes();
        let scheduler = Arc::clone(&self.scheduler);
        match self
            .thread_source
            .spawn("svcctl-flush", Box::new(move || scheduler.run()))
        {
            Ok(handle) => lifecycle.worker = Some(handle),
            Err(error) => {
                tracing::warn!(
                    %error,
                    "no background thread available; flushing inline on report calls"
                );
                self.inline_dispatch.store(true, Ordering::Release);
            }
        }
        lifecycle.state = State::Running;
        Ok(())
    }

    /// Stops background flushing, synchronously flushes all aggregated
    /// reports (best effort), and clears the check and quota caches.
    /// Terminal: a stopped client cannot be restarted.
    pub fn stop(&self) -> Result<(), Error> {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state != State::Running {
            return Err(Error::InvalidState(lifecycle.state.name()));
        }
        self.scheduler.stop();
        if let Some(worker) = lifecycle.worker.take() {
            if worker.join().is_err() {
                tracing::warn!("background flush thread panicked");
            }
        }
        for request in self.reports.clear() {
            match self.transport.report(&request) {
                Ok(_) => self.stats.inc_transport_reports(),
                Err(error) => {
                    self.stats.inc_transport_failures();
                    tracing::warn!(
                        %error,
                        operations = request.operations.len(),
                        "shutdown report flush failed; operations dropped"
                    );
                }
            }
        }
        let _ = self.checks.clear();
        self.quotas.clear();
        lifecycle.state = State::Stopped;
        tracing::info!(stats = %self.stats.snapshot(), "service control client stopped");
        Ok(())
    }

    /// Asks whether a call may proceed.
    ///
    /// Answers from cache when possible; otherwise asks the transport and
    /// caches the answer. Fails open: a transport failure yields
    /// `Ok(None)` so the application can let the call through.
    pub fn check(&self, request: &CheckRequest) -> Result<Option<CheckResponse>, Error> {
        self.ensure_running()?;
        self.ensure_service(&request.service_name)?;
        self.stats.inc_total_checks();
        if let Some(response) = self.checks.check(request)? {
            self.stats.inc_check_hits();
            return Ok(Some(response));
        }
        match self.transport.check(request) {
            Ok(response) => {
                self.stats.inc_transport_checks();
                self.checks.add_response(request, &response)?;
                Ok(Some(response))
            }
            Err(error) => {
                self.stats.inc_transport_failures();
                tracing::warn!(%error, "check transport failed; failing open");
                Ok(None)
            }
        }
    }

    /// Reserves quota for a call, answering from local state.
    ///
    /// The answer is the cached upstream decision, or a synthesized
    /// positive one on first contact; refreshes ride out with the next
    /// quota flush.
    pub fn allocate_quota(
        &self,
        request: &AllocateQuotaRequest,
    ) -> Result<AllocateQuotaResponse, Error> {
        self.ensure_running()?;
        self.ensure_service(&request.service_name)?;
        self.stats.inc_total_quota_allocations();
        Ok(self.quotas.allocate_quota(request)?)
    }

    /// Records completed calls.
    ///
    /// Aggregatable requests merge into the report cache; requests with a
    /// high-importance operation go straight to the transport, where a
    /// failure is logged and the operations dropped (best effort).
    pub fn report(&self, request: &ReportRequest) -> Result<(), Error> {
        self.ensure_running()?;
        self.ensure_service(&request.service_name)?;
        self.stats.inc_total_reports();
        if self.reports.report(request)? {
            self.stats.inc_aggregated_reports();
        } else {
            self.stats.inc_direct_reports();
            match self.transport.report(request) {
                Ok(_) => self.stats.inc_transport_reports(),
                Err(error) => {
                    self.stats.inc_transport_failures();
                    tracing::warn!(
                        %error,
                        operations = request.operations.len(),
                        "direct report failed; operations dropped"
                    );
                }
            }
        }
        if self.inline_dispatch.load(Ordering::Acquire) {
            self.scheduler.run_pending();
        }
        Ok(())
    }

    fn ensure_running(&self) -> Result<(), Error> {
        let state = self.lifecycle.lock().state;
        if state == State::Running {
            Ok(())
        } else {
            Err(Error::InvalidState(state.name()))
        }
    }

    fn ensure_service(&self, service_name: &str) -> Result<(), Error> {
        if service_name == self.service_name {
            Ok(())
        } else {
            Err(Error::ServiceNameMismatch {
                expected: self.service_name.clone(),
                actual: service_name.to_owned(),
            })
        }
    }

    fn schedule_recurring_flushes(&self) {
        let checks = Arc::clone(&self.checks);
        let transport = Arc::clone(&self.transport);
        let stats = Arc::clone(&self.stats);
        self.scheduler.schedule_periodic(
            self.checks.flush_interval(),
            FLUSH_CHECKS_PRIORITY,
            move || flush_checks(&checks, transport.as_ref(), &stats),
        );

        let reports = Arc::clone(&self.reports);
        let transport = Arc::clone(&self.transport);
        let stats = Arc::clone(&self.stats);
        let stats_log_frequency = self.stats_log_frequency;
        self.scheduler.schedule_periodic(
            self.reports.flush_interval(),
            FLUSH_REPORTS_PRIORITY,
            move || flush_reports(&reports, transport.as_ref(), &stats, stats_log_frequency),
        );

        let quotas = Arc::clone(&self.quotas);
        let transport = Arc::clone(&self.transport);
        let stats = Arc::clone(&self.stats);
        self.scheduler.schedule_periodic(
            self.quotas.refresh_interval(),
            FLUSH_QUOTA_PRIORITY,
            move || flush_quota(&quotas, transport.as_ref(), &stats),
        );
    }
}

fn flush_checks(checks: &CheckAggregator, transport: &dyn Transport, stats: &Statistics) {
    for request in checks.flush() {
        match transport.check(&request) {
            Ok(response) => {
                stats.inc_transport_checks();
                if let Err(error) = checks.add_response(&request, &response) {
                    tracing::warn!(%error, "refreshed check response could not be cached");
                }
            }
            Err(error) => {
                stats.inc_transport_failures();
                tracing::warn!(%error, "check refresh failed; entry expires on its own");
            }
        }
    }
}

fn flush_quota(quotas: &QuotaAggregator, transport: &dyn Transport, stats: &Statistics) {
    for request in quotas.flush() {
        match transport.allocate_quota(&request) {
            Ok(response) => {
                stats.inc_transport_quota_refreshes();
                if let Err(error) = quotas.cache_response(&request, &response) {
                    tracing::warn!(%error, "quota refresh response could not be cached");
                }
            }
            Err(error) => {
                stats.inc_transport_failures();
                tracing::warn!(
                    %error,
                    "quota refresh failed; cached decision stays until timeout"
                );
            }
        }
    }
}

fn flush_reports(
    reports: &ReportAggregator,
    transport: &dyn Transport,
    stats: &Statistics,
    stats_log_frequency: i64,
) {
    for request in reports.flush() {
        match transport.report(&request) {
            Ok(_) => stats.inc_transport_reports(),
            Err(error) => {
                stats.inc_transport_failures();
                tracing::warn!(
                    %error,
                    operations = request.operations.len(),
                    "report flush failed; operations dropped"
                );
            }
        }
    }
    let cycles = stats.inc_flush_cycles();
    if stats_log_frequency > 0 && cycles % stats_log_frequency as u64 == 0 {
        tracing::info!(stats = %stats.snapshot(), "service control client statistics");
    }
}

/// Configures and builds a [`ServiceControlClient`].
pub struct Builder {
    service_name: String,
    check_options: CheckAggregationOptions,
    quota_options: QuotaAggregationOptions,
    report_options: ReportAggregationOptions,
    metric_kinds: BTreeMap<String, MetricKind>,
    transport: Option<Arc<dyn Transport>>,
    thread_source: Arc<dyn ThreadSource>,
    clock: Arc<dyn Clock>,
    stats_log_frequency: i64,
}

impl Builder {
    fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            check_options: CheckAggregationOptions::default(),
            quota_options: QuotaAggregationOptions::default(),
            report_options: ReportAggregationOptions::default(),
            metric_kinds: BTreeMap::new(),
            transport: None,
            thread_source: Arc::new(StdThreadSource),
            clock: Arc::new(SystemClock),
            stats_log_frequency: 0,
        }
    }

    /// Overrides check caching options.
    #[must_use]
    pub fn check_options(mut self, options: CheckAggregationOptions) -> Self {
        self.check_options = options;
        self
    }

    /// Overrides quota caching options.
    #[must_use]
    pub fn quota_options(mut self, options: QuotaAggregationOptions) -> Self {
        self.quota_options = options;
        self
    }

    /// Overrides report aggregation options.
    #[must_use]
    pub fn report_options(mut self, options: ReportAggregationOptions) -> Self {
        self.report_options = options;
        self
    }

    /// Declares a metric's kind so report merging applies the right rule.
    /// Undeclared metrics merge as delta.
    #[must_use]
    pub fn metric_kind(mut self, metric_name: impl Into<String>, kind: MetricKind) -> Self {
        let _ = self.metric_kinds.insert(metric_name.into(), kind);
        self
    }

    /// Sets the wire transport. Required.
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Overrides how the background flush thread is obtained.
    #[must_use]
    pub fn thread_source(mut self, thread_source: Arc<dyn ThreadSource>) -> Self {
        self.thread_source = thread_source;
        self
    }

    /// Overrides the time source.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Logs a statistics snapshot every `frequency` report-flush cycles.
    /// Zero or negative disables the log.
    #[must_use]
    pub fn stats_log_frequency(mut self, frequency: i64) -> Self {
        self.stats_log_frequency = frequency;
        self
    }

    /// Builds the client. Fails without a transport.
    pub fn build(self) -> Result<ServiceControlClient, Error> {
        let transport = self.transport.ok_or(Error::MissingTransport)?;
        let checks = Arc::new(CheckAggregator::new(
            self.service_name.clone(),
            &self.check_options,
            Arc::clone(&self.clock),
        ));
        let quotas = Arc::new(QuotaAggregator::new(
            self.service_name.clone(),
            &self.quota_options,
            Arc::clone(&self.clock),
        ));
        let reports = Arc::new(ReportAggregator::new(
            self.service_name.clone(),
            &self.report_options,
            self.metric_kinds,
            Arc::clone(&self.clock),
        ));
        Ok(ServiceControlClient {
            service_name: self.service_name,
            checks,
            quotas,
            reports,
            transport,
            scheduler: Arc::new(Scheduler::new(self.clock)),
            stats: Arc::new(Statistics::default()),
            thread_source: self.thread_source,
            stats_log_frequency: self.stats_log_frequency,
            inline_dispatch: AtomicBool::new(false),
            lifecycle: Mutex::new(Lifecycle {
                state: State::Created,
                worker: None,
            }),
        })
    }
}
