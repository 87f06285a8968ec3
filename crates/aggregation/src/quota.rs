// SPDX-License-Identifier: Apache-2.0

//! Optimistic caching of allocate-quota decisions.
//!
//! The first allocation for a fingerprint answers immediately with a
//! synthesized positive response while the real request rides out on the
//! next flush; a flurry of near-simultaneous first hits therefore produces
//! one upstream call. Subsequent hits accumulate their token cost into a
//! [`QuotaOperationAggregator`] so the periodic refresh carries everything
//! consumed since the last upstream answer. A cached denial keeps
//! answering hits unchanged while its refresh is in progress, so callers
//! observe a stable decision.
//!
//! Per fingerprint, at most one refresh is in flight: the `in_flight`
//! flag blocks further emission until [`QuotaAggregator::cache_response`]
//! clears it or the entry ages out.

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::collections::btree_map::Entry;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use svcctl_model::{
    AllocateQuotaRequest, AllocateQuotaResponse, MetricKind, MetricValue, MetricValueSet,
    QuotaMode, QuotaOperation,
};

use crate::cache::BoundedCache;
use crate::clock::Clock;
use crate::error::Error;
use crate::merge::merge;
use crate::signature::{Signature, sign_quota_request};

/// Tuning knobs for allocate-quota caching.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QuotaAggregationOptions {
    /// Maximum cache size; zero or negative disables caching entirely.
    pub num_entries: i64,
    /// How often a cached decision is refreshed upstream.
    #[serde(with = "humantime_serde")]
    pub refresh_interval: Duration,
    /// Hard eviction age for entries with no upstream activity.
    #[serde(with = "humantime_serde")]
    pub expiration: Duration,
}

impl Default for QuotaAggregationOptions {
    fn default() -> Self {
        Self {
            num_entries: 1000,
            refresh_interval: Duration::from_secs(1),
            expiration: Duration::from_secs(60),
        }
    }
}

/// Accumulates the quota consumed against one fingerprint between
/// refreshes.
#[derive(Clone, Debug)]
pub struct QuotaOperationAggregator {
    base: QuotaOperation,
    metrics: BTreeMap<String, MetricValue>,
}

impl QuotaOperationAggregator {
    /// Starts an accumulator from the first operation, capturing its
    /// identity and consuming its metrics.
    pub fn new(operation: &QuotaOperation) -> Result<Self, Error> {
        let mut base = operation.clone();
        base.quota_metrics = Vec::new();
        let mut aggregator = Self {
            base,
            metrics: BTreeMap::new(),
        };
        aggregator.merge_operation(operation)?;
        Ok(aggregator)
    }

    /// Folds a sibling operation's metrics in. Amounts sum per metric
    /// name.
    pub fn merge_operation(&mut self, operation: &QuotaOperation) -> Result<(), Error> {
        for set in &operation.quota_metrics {
            let Some(first) = set.values.first() else {
                continue;
            };
            match self.metrics.entry(set.metric_name.clone()) {
                Entry::Occupied(mut occupied) => {
                    let merged = merge(MetricKind::Delta, occupied.get(), first)?;
                    *occupied.get_mut() = merged;
                }
                Entry::Vacant(vacant) => {
                    let _ = vacant.insert(first.clone());
                }
            }
        }
        Ok(())
    }

    /// Rebuilds a wire operation carrying the accumulated amounts.
    #[must_use]
    pub fn into_operation(self) -> QuotaOperation {
        let mut operation = self.base;
        operation.quota_metrics = self
            .metrics
            .into_iter()
            .map(|(metric_name, value)| MetricValueSet {
                metric_name,
                values: vec![value],
            })
            .collect();
        operation
    }
}

struct QuotaEntry {
    request: AllocateQuotaRequest,
    response: AllocateQuotaResponse,
    last_refresh_nanos: u64,
    in_flight: bool,
    aggregator: Option<QuotaOperationAggregator>,
}

impl QuotaEntry {
    fn take_refresh_request(&mut self) -> AllocateQuotaRequest {
        let operation = match self.aggregator.take() {
            Some(aggregator) => aggregator.into_operation(),
            None => self.request.allocate_operation.clone(),
        };
        let mut refresh = AllocateQuotaRequest {
            service_name: self.request.service_name.clone(),
            service_config_id: self.request.service_config_id.clone(),
            allocate_operation: operation,
        };
        if !self.response.is_granted() {
            // Cached denials refresh in enforcing mode so a recovered
            // upstream can flip the decision.
            refresh.allocate_operation.quota_mode = QuotaMode::Normal;
        }
        refresh
    }
}

struct QuotaState {
    cache: BoundedCache<Signature, QuotaEntry>,
    outbound: VecDeque<AllocateQuotaRequest>,
}

/// Bounded cache of allocate-quota decisions with token aggregation.
pub struct QuotaAggregator {
    service_name: String,
    refresh_interval: Duration,
    refresh_nanos: u64,
    expiration_nanos: u64,
    state: Option<Mutex<QuotaState>>,
    clock: Arc<dyn Clock>,
}

impl QuotaAggregator {
    /// Creates an aggregator for `service_name` with the given options.
    #[must_use]
    pub fn new(
        service_name: impl Into<String>,
        options: &QuotaAggregationOptions,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let state = (options.num_entries > 0).then(|| {
            Mutex::new(QuotaState {
                cache: BoundedCache::new(options.num_entries as usize),
                outbound: VecDeque::new(),
            })
        });
        Self {
            service_name: service_name.into(),
            refresh_interval: options.refresh_interval,
            refresh_nanos: options.refresh_interval.as_nanos() as u64,
            expiration_nanos: options.expiration.as_nanos() as u64,
            state,
            clock,
        }
    }

    /// The service this aggregator allocates quota for.
    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Cadence at which [`QuotaAggregator::flush`] should be driven.
    #[must_use]
    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    /// Answers an allocation, always from local state.
    ///
    /// A miss answers with the synthesized positive default and queues
    /// the request for the next flush; a hit answers with the cached
    /// decision, accumulating the request's cost when that decision is
    /// positive and queueing a refresh when it has gone stale.
    pub fn allocate_quota(
        &self,
        request: &AllocateQuotaRequest,
    ) -> Result<AllocateQuotaResponse, Error> {
        let signature = sign_quota_request(request)?;
        let default_response = AllocateQuotaResponse {
            operation_id: request.allocate_operation.operation_id.clone(),
            ..AllocateQuotaResponse::default()
        };
        let Some(state) = &self.state else {
            return Ok(default_response);
        };
        let now = self.clock.now_nanos();
        let mut guard = state.lock();
        let QuotaState { cache, outbound } = &mut *guard;

        if cache.written_nanos(&signature).is_none() {
            let entry = QuotaEntry {
                request: request.clone(),
                response: default_response.clone(),
                last_refresh_nanos: now,
                in_flight: true,
                aggregator: None,
            };
            // A capacity eviction discards the victim; its in-flight
            // refresh, if any, completes into nothing.
            let _ = cache.insert(signature, entry, now);
            outbound.push_back(request.clone());
            return Ok(default_response);
        }
        let Some(entry) = cache.get_mut(&signature) else {
            return Ok(default_response);
        };

        if entry.response.is_granted() {
            match entry.aggregator.as_mut() {
                Some(aggregator) => aggregator.merge_operation(&request.allocate_operation)?,
                None => {
                    entry.aggregator =
                        Some(QuotaOperationAggregator::new(&request.allocate_operation)?);
                }
            }
        }

        if !entry.in_flight && now.saturating_sub(entry.last_refresh_nanos) >= self.refresh_nanos
        {
            entry.in_flight = true;
            entry.last_refresh_nanos = now;
            let refresh = entry.take_refresh_request();
            outbound.push_back(refresh);
        }

        Ok(entry.response.clone())
    }

    /// Feeds an upstream answer back, clearing the in-flight flag.
    ///
    /// A denial drops the accumulator: no further cost is aggregated
    /// against a decision the upstream refused. The entry's eviction age
    /// restarts from this upstream activity. Answers for entries that
    /// were cleared or evicted are accepted and have no effect.
    pub fn cache_response(
        &self,
        request: &AllocateQuotaRequest,
        response: &AllocateQuotaResponse,
    ) -> Result<(), Error> {
        let signature = sign_quota_request(request)?;
        let Some(state) = &self.state else {
            return Ok(());
        };
        let now = self.clock.now_nanos();
        let mut guard = state.lock();
        let QuotaState { cache, .. } = &mut *guard;
        let mut updated = false;
        if let Some(entry) = cache.get_mut(&signature) {
            entry.in_flight = false;
            if !response.is_granted() {
                entry.aggregator = None;
            }
            entry.response = response.clone();
            updated = true;
        }
        if updated {
            let _ = cache.refresh_write(&signature, now);
        }
        Ok(())
    }

    /// Promotes every stale entry with accumulated cost to in-flight and
    /// returns all queued outbound requests. Aged-out entries are
    /// discarded first.
    pub fn flush(&self) -> Vec<AllocateQuotaRequest> {
        let Some(state) = &self.state else {
            return Vec::new();
        };
        let now = self.clock.now_nanos();
        let mut guard = state.lock();
        let QuotaState { cache, outbound } = &mut *guard;
        let expired = cache.sweep_expired(now, self.expiration_nanos);
        if !expired.is_empty() {
            tracing::debug!(
                service = %self.service_name,
                count = expired.len(),
                "discarded aged-out quota entries"
            );
        }
        for (_signature, _written_nanos, entry) in cache.iter_mut() {
            if entry.in_flight || entry.aggregator.is_none() {
                continue;
            }
            if now.saturating_sub(entry.last_refresh_nanos) < self.refresh_nanos {
                continue;
            }
            entry.in_flight = true;
            entry.last_refresh_nanos = now;
            let refresh = entry.take_refresh_request();
            outbound.push_back(refresh);
        }
        outbound.drain(..).collect()
    }

    /// Invalidates every entry and drops queued outbound work.
    pub fn clear(&self) {
        let Some(state) = &self.state else {
            return;
        };
        let mut guard = state.lock();
        let _ = guard.cache.drain();
        guard.outbound.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use svcctl_model::{MetricValuePayload, QuotaError, QuotaErrorCode};

    fn request(cost: i64) -> AllocateQuotaRequest {
        AllocateQuotaRequest {
            service_name: "testService".into(),
            allocate_operation: QuotaOperation::allocation(
                "op-1",
                "ListShelves",
                "api_key:k",
                "reads",
                cost,
            ),
            ..AllocateQuotaRequest::default()
        }
    }

    fn denial() -> AllocateQuotaResponse {
        AllocateQuotaResponse {
            operation_id: "op-1".into(),
            allocate_errors: vec![QuotaError {
                code: QuotaErrorCode::ResourceExhausted,
                ..QuotaError::default()
            }],
            ..AllocateQuotaResponse::default()
        }
    }

    fn aggregator() -> (QuotaAggregator, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        let agg = QuotaAggregator::new(
            "testService",
            &QuotaAggregationOptions::default(),
            clock.clone(),
        );
        (agg, clock)
    }

    fn total_cost(req: &AllocateQuotaRequest) -> i64 {
        match req.allocate_operation.quota_metrics[0].values[0].value {
            MetricValuePayload::Int64(v) => v,
            ref other => panic!("expected int64 cost, got {other:?}"),
        }
    }

    #[test]
    fn first_hits_for_one_fingerprint_produce_one_outbound_request() {
        let (agg, _clock) = aggregator();
        let a = agg.allocate_quota(&request(1)).expect("allocate");
        let b = agg.allocate_quota(&request(1)).expect("allocate");
        assert!(a.is_granted());
        assert!(b.is_granted());
        let outbound = agg.flush();
        assert_eq!(outbound.len(), 1);
    }

    #[test]
    fn positive_hits_accumulate_cost_into_the_refresh() {
        let (agg, clock) = aggregator();
        let req = request(2);
        let _ = agg.allocate_quota(&req).expect("allocate");
        let first = agg.flush();
        agg.cache_response(&first[0], &AllocateQuotaResponse::default())
            .expect("cache response");

        for _ in 0..3 {
            let _ = agg.allocate_quota(&req).expect("allocate");
        }
        clock.advance(Duration::from_secs(1));
        // The stale hit both aggregates its own cost and extracts the
        // accumulator as the refresh request.
        let _ = agg.allocate_quota(&req).expect("allocate");
        let outbound = agg.flush();
        assert_eq!(outbound.len(), 1);
        assert_eq!(total_cost(&outbound[0]), 8);
    }

    #[test]
    fn at_most_one_refresh_in_flight_per_fingerprint() {
        let (agg, clock) = aggregator();
        let req = request(1);
        let _ = agg.allocate_quota(&req).expect("allocate");
        assert_eq!(agg.flush().len(), 1);

        clock.advance(Duration::from_secs(5));
        // Still in flight: hits keep aggregating but nothing is emitted.
        let _ = agg.allocate_quota(&req).expect("allocate");
        let _ = agg.allocate_quota(&req).expect("allocate");
        assert!(agg.flush().is_empty());

        agg.cache_response(&req, &AllocateQuotaResponse::default())
            .expect("cache response");
        clock.advance(Duration::from_secs(1));
        assert_eq!(agg.flush().len(), 1);
    }

    #[test]
    fn cached_denials_answer_stably_and_refresh_in_normal_mode() {
        let (agg, clock) = aggregator();
        let req = request(1);
        let _ = agg.allocate_quota(&req).expect("allocate");
        let first = agg.flush();
        agg.cache_response(&first[0], &denial()).expect("cache response");

        let answered = agg.allocate_quota(&req).expect("allocate");
        assert!(!answered.is_granted());

        clock.advance(Duration::from_secs(1));
        let answered = agg.allocate_quota(&req).expect("allocate");
        assert!(!answered.is_granted());
        let outbound = agg.flush();
        assert_eq!(outbound.len(), 1);
        assert_eq!(
            outbound[0].allocate_operation.quota_mode,
            QuotaMode::Normal
        );
    }

    #[test]
    fn denial_response_drops_the_accumulator() {
        let (agg, clock) = aggregator();
        let req = request(5);
        let _ = agg.allocate_quota(&req).expect("allocate");
        let first = agg.flush();
        agg.cache_response(&first[0], &AllocateQuotaResponse::default())
            .expect("cache response");
        let _ = agg.allocate_quota(&req).expect("allocate");
        agg.cache_response(&req, &denial()).expect("cache response");

        // The denial cleared the accumulated 5; nothing is left to flush.
        clock.advance(Duration::from_secs(1));
        assert!(agg.flush().is_empty());
    }

    #[test]
    fn aged_out_entries_are_discarded_and_late_responses_ignored() {
        let (agg, clock) = aggregator();
        let req = request(1);
        let _ = agg.allocate_quota(&req).expect("allocate");
        let _ = agg.flush();
        clock.advance(Duration::from_secs(60));
        assert!(agg.flush().is_empty());
        // The in-flight request from before the eviction completes into
        // nothing.
        agg.cache_response(&req, &AllocateQuotaResponse::default())
            .expect("cache response");
        // The fingerprint now misses again.
        let _ = agg.allocate_quota(&req).expect("allocate");
        assert_eq!(agg.flush().len(), 1);
    }

    #[test]
    fn clear_invalidates_everything() {
        let (agg, _clock) = aggregator();
        let _ = agg.allocate_quota(&request(1)).expect("allocate");
        agg.clear();
        assert!(agg.flush().is_empty());
        agg.cache_response(&request(1), &AllocateQuotaResponse::default())
            .expect("cache response");
        assert!(agg.flush().is_empty());
    }

    #[test]
    fn disabled_cache_answers_the_default_and_queues_nothing() {
        let clock = Arc::new(ManualClock::new(0));
        let options = QuotaAggregationOptions {
            num_entries: 0,
            ..QuotaAggregationOptions::default()
        };
        let agg = QuotaAggregator::new("testService", &options, clock);
        let answered = agg.allocate_quota(&request(1)).expect("allocate");
        assert!(answered.is_granted());
        assert_eq!(answered.operation_id, "op-1");
        assert!(agg.flush().is_empty());
    }
}
