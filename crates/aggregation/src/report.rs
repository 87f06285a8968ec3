// SPDX-License-Identifier: Apache-2.0

//! Merging reported operations until they are flushed upstream.
//!
//! Operations with the same fingerprint collapse into one
//! [`OperationAggregator`]: log entries append, metric values merge by
//! kind, and the start/end times envelope. Eviction is flush: whether an
//! aggregator leaves the cache because it aged out, because the cache is
//! full, or because the client is shutting down, it lands on the outbound
//! queue and becomes part of a report request. High-importance operations
//! never enter the cache; the caller must send them directly.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use svcctl_model::timestamp::envelope;
use svcctl_model::{
    Importance, LogEntry, MAX_OPERATIONS_PER_REPORT, MetricKind, MetricValue, MetricValueSet,
    Operation, ReportRequest, Timestamp,
};

use crate::cache::BoundedCache;
use crate::clock::Clock;
use crate::error::Error;
use crate::merge::merge;
use crate::signature::{Signature, sign_labels, sign_operation};

/// Tuning knobs for report aggregation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReportAggregationOptions {
    /// Maximum number of open aggregators; zero or negative disables
    /// aggregation entirely.
    pub num_entries: i64,
    /// How long an aggregator accumulates before it is flushed.
    #[serde(with = "humantime_serde")]
    pub flush_interval: Duration,
}

impl Default for ReportAggregationOptions {
    fn default() -> Self {
        Self {
            num_entries: 1000,
            flush_interval: Duration::from_secs(4),
        }
    }
}

/// Accumulates every operation reported against one fingerprint.
pub struct OperationAggregator {
    base: Operation,
    start_time: Option<Timestamp>,
    end_time: Option<Timestamp>,
    logs: Vec<LogEntry>,
    metrics: BTreeMap<(String, Signature), MetricValue>,
    kinds: Arc<BTreeMap<String, MetricKind>>,
}

impl OperationAggregator {
    /// Starts an aggregator from the first operation, capturing its
    /// identity and consuming its payload.
    pub fn new(
        operation: &Operation,
        kinds: Arc<BTreeMap<String, MetricKind>>,
    ) -> Result<Self, Error> {
        let mut base = operation.clone();
        base.metric_value_sets = Vec::new();
        base.log_entries = Vec::new();
        let mut aggregator = Self {
            base,
            start_time: None,
            end_time: None,
            logs: Vec::new(),
            metrics: BTreeMap::new(),
            kinds,
        };
        aggregator.merge_operation(operation)?;
        Ok(aggregator)
    }

    /// Folds a sibling operation in: logs append, metric values merge by
    /// their own label fingerprint under the metric's kind, and the time
    /// range widens.
    pub fn merge_operation(&mut self, operation: &Operation) -> Result<(), Error> {
        self.logs.extend(operation.log_entries.iter().cloned());
        let (start, end) = envelope(
            (self.start_time, self.end_time),
            (operation.start_time, operation.end_time),
        );
        self.start_time = start;
        self.end_time = end;

        for set in &operation.metric_value_sets {
            for value in &set.values {
                let key = (set.metric_name.clone(), sign_labels(&value.labels));
                match self.metrics.entry(key) {
                    Entry::Occupied(mut occupied) => {
                        let kind = self
                            .kinds
                            .get(&set.metric_name)
                            .copied()
                            .unwrap_or_default();
                        let merged = merge(kind, occupied.get(), value)?;
                        *occupied.get_mut() = merged;
                    }
                    Entry::Vacant(vacant) => {
                        let _ = vacant.insert(value.clone());
                    }
                }
            }
        }
        Ok(())
    }

    /// Rebuilds the wire operation carrying everything accumulated.
    #[must_use]
    pub fn into_operation(self) -> Operation {
        let mut operation = self.base;
        operation.start_time = self.start_time;
        operation.end_time = self.end_time;
        operation.log_entries = self.logs;

        // The map key sorts by metric name first, so one pass groups
        // values back into their sets.
        let mut sets: Vec<MetricValueSet> = Vec::new();
        for ((metric_name, _labels), value) in self.metrics {
            match sets.last_mut() {
                Some(last) if last.metric_name == metric_name => last.values.push(value),
                _ => sets.push(MetricValueSet {
                    metric_name,
                    values: vec![value],
                }),
            }
        }
        operation.metric_value_sets = sets;
        operation
    }
}

struct ReportState {
    cache: BoundedCache<Signature, OperationAggregator>,
    outbound: VecDeque<Operation>,
}

/// Bounded cache of open operation aggregators keyed by fingerprint.
pub struct ReportAggregator {
    service_name: String,
    flush_interval: Duration,
    flush_interval_nanos: u64,
    kinds: Arc<BTreeMap<String, MetricKind>>,
    state: Option<Mutex<ReportState>>,
    clock: Arc<dyn Clock>,
}

impl ReportAggregator {
    /// Creates an aggregator for `service_name` with the given options.
    ///
    /// `metric_kinds` overrides the merge rule per metric name; metrics
    /// not listed merge as delta.
    #[must_use]
    pub fn new(
        service_name: impl Into<String>,
        options: &ReportAggregationOptions,
        metric_kinds: BTreeMap<String, MetricKind>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let state = (options.num_entries > 0).then(|| {
            Mutex::new(ReportState {
                cache: BoundedCache::new(options.num_entries as usize),
                outbound: VecDeque::new(),
            })
        });
        Self {
            service_name: service_name.into(),
            flush_interval: options.flush_interval,
            flush_interval_nanos: options.flush_interval.as_nanos() as u64,
            kinds: Arc::new(metric_kinds),
            state,
            clock,
        }
    }

    /// The service this aggregator reports for.
    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Cadence at which [`ReportAggregator::flush`] should be driven.
    #[must_use]
    pub fn flush_interval(&self) -> Duration {
        self.flush_interval
    }

    /// Merges a request's operations into the cache.
    ///
    /// Returns `false` without touching the cache when any operation has
    /// high importance (or when aggregation is disabled); the caller must
    /// send the request directly.
    pub fn report(&self, request: &ReportRequest) -> Result<bool, Error> {
        if request
            .operations
            .iter()
            .any(|op| op.importance == Importance::High)
        {
            return Ok(false);
        }
        let Some(state) = &self.state else {
            return Ok(false);
        };
        let now = self.clock.now_nanos();
        let mut guard = state.lock();
        let ReportState { cache, outbound } = &mut *guard;
        for operation in &request.operations {
            let signature = sign_operation(operation)?;
            if let Some(aggregator) = cache.get_mut(&signature) {
                aggregator.merge_operation(operation)?;
            } else {
                let aggregator = OperationAggregator::new(operation, Arc::clone(&self.kinds))?;
                if let Some((_evicted_signature, evicted)) =
                    cache.insert(signature, aggregator, now)
                {
                    outbound.push_back(evicted.into_operation());
                }
            }
        }
        Ok(true)
    }

    /// Expires aged aggregators and drains everything queued into report
    /// requests of at most [`MAX_OPERATIONS_PER_REPORT`] operations.
    pub fn flush(&self) -> Vec<ReportRequest> {
        let Some(state) = &self.state else {
            return Vec::new();
        };
        let now = self.clock.now_nanos();
        let mut guard = state.lock();
        let ReportState { cache, outbound } = &mut *guard;
        for (_signature, aggregator) in cache.sweep_expired(now, self.flush_interval_nanos) {
            outbound.push_back(aggregator.into_operation());
        }
        let operations: Vec<Operation> = outbound.drain(..).collect();
        pack(&self.service_name, operations)
    }

    /// Drains every open aggregator into report requests and empties the
    /// cache.
    pub fn clear(&self) -> Vec<ReportRequest> {
        let Some(state) = &self.state else {
            return Vec::new();
        };
        let mut guard = state.lock();
        let ReportState { cache, outbound } = &mut *guard;
        for (_signature, aggregator) in cache.drain() {
            outbound.push_back(aggregator.into_operation());
        }
        let operations: Vec<Operation> = outbound.drain(..).collect();
        pack(&self.service_name, operations)
    }
}

fn pack(service_name: &str, operations: Vec<Operation>) -> Vec<ReportRequest> {
    let mut requests = Vec::new();
    let mut remaining = operations.into_iter().peekable();
    while remaining.peek().is_some() {
        let batch: Vec<Operation> = remaining
            .by_ref()
            .take(MAX_OPERATIONS_PER_REPORT)
            .collect();
        requests.push(ReportRequest {
            service_name: service_name.to_owned(),
            service_config_id: String::new(),
            operations: batch,
        });
    }
    requests
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use pretty_assertions::assert_eq;
    use svcctl_model::{LogPayload, MetricValuePayload};

    fn operation(name: &str) -> Operation {
        let mut op = Operation::new(name, "project:p");
        op.start_time = Some(Timestamp::new(10, 0));
        op.end_time = Some(Timestamp::new(20, 0));
        op.metric_value_sets = vec![MetricValueSet::single("requests", MetricValue::int64(1))];
        op
    }

    fn request(ops: Vec<Operation>) -> ReportRequest {
        ReportRequest {
            service_name: "testService".into(),
            operations: ops,
            ..ReportRequest::default()
        }
    }

    fn aggregator() -> (ReportAggregator, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        let agg = ReportAggregator::new(
            "testService",
            &ReportAggregationOptions::default(),
            BTreeMap::new(),
            clock.clone(),
        );
        (agg, clock)
    }

    #[test]
    fn repeated_operations_collapse_to_one_fingerprint() {
        let (agg, clock) = aggregator();
        for _ in 0..5 {
            assert!(
                agg.report(&request(vec![operation("op1"), operation("op2")]))
                    .expect("report")
            );
        }
        assert!(agg.flush().is_empty());

        clock.advance(Duration::from_secs(4));
        let flushed = agg.flush();
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].operations.len(), 2);
        for op in &flushed[0].operations {
            match op.metric_value_sets[0].values[0].value {
                MetricValuePayload::Int64(v) => assert_eq!(v, 5),
                ref other => panic!("expected int64, got {other:?}"),
            }
        }
    }

    #[test]
    fn merging_appends_logs_and_envelopes_times() {
        let (agg, clock) = aggregator();
        let mut first = operation("op1");
        first.log_entries = vec![LogEntry::text("log", "a")];
        let mut second = operation("op1");
        second.log_entries = vec![LogEntry::text("log", "b")];
        second.start_time = Some(Timestamp::new(5, 0));
        second.end_time = Some(Timestamp::new(30, 0));

        assert!(agg.report(&request(vec![first])).expect("report"));
        assert!(agg.report(&request(vec![second])).expect("report"));
        clock.advance(Duration::from_secs(4));
        let flushed = agg.flush();
        let op = &flushed[0].operations[0];
        assert_eq!(op.start_time, Some(Timestamp::new(5, 0)));
        assert_eq!(op.end_time, Some(Timestamp::new(30, 0)));
        let texts: Vec<&str> = op
            .log_entries
            .iter()
            .map(|entry| match &entry.payload {
                LogPayload::Text(text) => text.as_str(),
                LogPayload::Struct(_) => panic!("expected text payloads"),
            })
            .collect();
        assert_eq!(texts, vec!["a", "b"]);
    }

    #[test]
    fn gauge_overrides_keep_the_latest_value() {
        let clock = Arc::new(ManualClock::new(0));
        let kinds: BTreeMap<String, MetricKind> =
            [("queue_depth".to_owned(), MetricKind::Gauge)].into();
        let agg = ReportAggregator::new(
            "testService",
            &ReportAggregationOptions::default(),
            kinds,
            clock.clone(),
        );
        let mut first = operation("op1");
        first.metric_value_sets = vec![MetricValueSet::single("queue_depth", MetricValue {
            end_time: Some(Timestamp::new(1, 0)),
            ..MetricValue::int64(10)
        })];
        let mut second = operation("op1");
        second.metric_value_sets = vec![MetricValueSet::single("queue_depth", MetricValue {
            end_time: Some(Timestamp::new(2, 0)),
            ..MetricValue::int64(3)
        })];
        assert!(agg.report(&request(vec![first])).expect("report"));
        assert!(agg.report(&request(vec![second])).expect("report"));
        clock.advance(Duration::from_secs(4));
        let flushed = agg.flush();
        assert_eq!(
            flushed[0].operations[0].metric_value_sets[0].values[0].value,
            MetricValuePayload::Int64(3)
        );
    }

    #[test]
    fn values_with_distinct_labels_stay_distinct() {
        let (agg, clock) = aggregator();
        let mut first = operation("op1");
        let mut labelled = MetricValue::int64(1);
        let _ = labelled.labels.insert("zone".into(), "a".into());
        first.metric_value_sets = vec![MetricValueSet::single("requests", labelled)];
        let second = operation("op1");
        assert!(agg.report(&request(vec![first])).expect("report"));
        assert!(agg.report(&request(vec![second])).expect("report"));
        clock.advance(Duration::from_secs(4));
        let flushed = agg.flush();
        assert_eq!(flushed[0].operations[0].metric_value_sets[0].values.len(), 2);
    }

    #[test]
    fn high_importance_is_refused_and_cache_untouched() {
        let (agg, clock) = aggregator();
        let mut important = operation("op1");
        important.importance = Importance::High;
        assert!(
            !agg.report(&request(vec![operation("op2"), important]))
                .expect("report")
        );
        clock.advance(Duration::from_secs(4));
        assert!(agg.flush().is_empty());
    }

    #[test]
    fn capacity_eviction_flushes_the_victim() {
        let clock = Arc::new(ManualClock::new(0));
        let options = ReportAggregationOptions {
            num_entries: 1,
            ..ReportAggregationOptions::default()
        };
        let agg = ReportAggregator::new("testService", &options, BTreeMap::new(), clock);
        assert!(agg.report(&request(vec![operation("op1")])).expect("report"));
        assert!(agg.report(&request(vec![operation("op2")])).expect("report"));
        // The evicted aggregator is flushed out even though its age is
        // still inside the flush interval.
        let flushed = agg.flush();
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].operations.len(), 1);
        assert_eq!(flushed[0].operations[0].operation_name, "op1");
    }

    #[test]
    fn flushes_pack_at_most_one_thousand_operations() {
        let clock = Arc::new(ManualClock::new(0));
        let options = ReportAggregationOptions {
            num_entries: 2000,
            ..ReportAggregationOptions::default()
        };
        let agg = ReportAggregator::new("testService", &options, BTreeMap::new(), clock.clone());
        let ops: Vec<Operation> = (0..1001).map(|i| operation(&format!("op{i}"))).collect();
        assert!(agg.report(&request(ops)).expect("report"));
        clock.advance(Duration::from_secs(4));
        let flushed = agg.flush();
        assert_eq!(flushed.len(), 2);
        assert_eq!(flushed[0].operations.len(), 1000);
        assert_eq!(flushed[1].operations.len(), 1);
    }

    #[test]
    fn clear_drains_everything_immediately() {
        let (agg, _clock) = aggregator();
        assert!(
            agg.report(&request(vec![operation("op1"), operation("op2")]))
                .expect("report")
        );
        let cleared = agg.clear();
        assert_eq!(cleared.len(), 1);
        assert_eq!(cleared[0].operations.len(), 2);
        assert!(agg.clear().is_empty());
    }

    #[test]
    fn disabled_aggregation_refuses_everything() {
        let clock = Arc::new(ManualClock::new(0));
        let options = ReportAggregationOptions {
            num_entries: 0,
            ..ReportAggregationOptions::default()
        };
        let agg = ReportAggregator::new("testService", &options, BTreeMap::new(), clock);
        assert!(!agg.report(&request(vec![operation("op1")])).expect("report"));
        assert!(agg.flush().is_empty());
    }
}
