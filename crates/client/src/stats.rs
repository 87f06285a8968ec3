// SPDX-License-Identifier: Apache-2.0

//! Monotonic counters describing one client's traffic.
//!
//! One [`Statistics`] instance lives per facade, never process-wide.
//! Counters only increase; a [`StatisticsSnapshot`] is a coherent-enough
//! copy for logging and assertions.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Atomic counters recorded by the client facade.
#[derive(Debug, Default)]
pub struct Statistics {
    total_checks: AtomicU64,
    check_hits: AtomicU64,
    transport_checks: AtomicU64,
    total_quota_allocations: AtomicU64,
    transport_quota_refreshes: AtomicU64,
    total_reports: AtomicU64,
    aggregated_reports: AtomicU64,
    direct_reports: AtomicU64,
    transport_reports: AtomicU64,
    flush_cycles: AtomicU64,
    transport_failures: AtomicU64,
}

impl Statistics {
    pub(crate) fn inc_total_checks(&self) {
        let _ = self.total_checks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_check_hits(&self) {
        let _ = self.check_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_transport_checks(&self) {
        let _ = self.transport_checks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_total_quota_allocations(&self) {
        let _ = self.total_quota_allocations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_transport_quota_refreshes(&self) {
        let _ = self.transport_quota_refreshes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_total_reports(&self) {
        let _ = self.total_reports.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_aggregated_reports(&self) {
        let _ = self.aggregated_reports.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_direct_reports(&self) {
        let _ = self.direct_reports.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_transport_reports(&self) {
        let _ = self.transport_reports.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_transport_failures(&self) {
        let _ = self.transport_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Bumps the flush-cycle counter and returns the new value.
    pub(crate) fn inc_flush_cycles(&self) -> u64 {
        self.flush_cycles.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Copies the counters.
    #[must_use]
    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            total_checks: self.total_checks.load(Ordering::Relaxed),
            check_hits: self.check_hits.load(Ordering::Relaxed),
            transport_checks: self.transport_checks.load(Ordering::Relaxed),
            total_quota_allocations: self.total_quota_allocations.load(Ordering::Relaxed),
            transport_quota_refreshes: self.transport_quota_refreshes.load(Ordering::Relaxed),
            total_reports: self.total_reports.load(Ordering::Relaxed),
            aggregated_reports: self.aggregated_reports.load(Ordering::Relaxed),
            direct_reports: self.direct_reports.load(Ordering::Relaxed),
            transport_reports: self.transport_reports.load(Ordering::Relaxed),
            flush_cycles: self.flush_cycles.load(Ordering::Relaxed),
            transport_failures: self.transport_failures.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of a client's counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StatisticsSnapshot {
    /// Checks answered, from cache or upstream.
    pub total_checks: u64,
    /// Checks answered from cache.
    pub check_hits: u64,
    /// Check calls issued to the transport.
    pub transport_checks: u64,
    /// Allocations answered.
    pub total_quota_allocations: u64,
    /// Quota refreshes issued to the transport.
    pub transport_quota_refreshes: u64,
    /// Report calls accepted by the facade.
    pub total_reports: u64,
    /// Reports absorbed into the aggregation cache.
    pub aggregated_reports: u64,
    /// Reports that bypassed aggregation.
    pub direct_reports: u64,
    /// Report calls issued to the transport.
    pub transport_reports: u64,
    /// Completed report-flush cycles.
    pub flush_cycles: u64,
    /// Transport calls that failed.
    pub transport_failures: u64,
}

impl fmt::Display for StatisticsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "checks={}/{} (cached/total) transport_checks={} quota={} \
             quota_refreshes={} reports={}/{}/{} (aggregated/direct/total) \
             transport_reports={} flush_cycles={} transport_failures={}",
            self.check_hits,
            self.total_checks,
            self.transport_checks,
            self.total_quota_allocations,
            self.transport_quota_refreshes,
            self.aggregated_reports,
            self.direct_reports,
            self.total_reports,
            self.transport_reports,
            self.flush_cycles,
            self.transport_failures,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_independently() {
        let stats = Statistics::default();
        stats.inc_total_checks();
        stats.inc_total_checks();
        stats.inc_check_hits();
        assert_eq!(stats.inc_flush_cycles(), 1);
        assert_eq!(stats.inc_flush_cycles(), 2);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_checks, 2);
        assert_eq!(snapshot.check_hits, 1);
        assert_eq!(snapshot.flush_cycles, 2);
        assert_eq!(snapshot.total_reports, 0);
    }

    #[test]
    fn display_is_single_line() {
        let stats = Statistics::default();
        stats.inc_total_reports();
        let line = stats.snapshot().to_string();
        assert!(line.contains("reports=0/0/1"));
        assert!(!line.contains('\n'));
    }
}
