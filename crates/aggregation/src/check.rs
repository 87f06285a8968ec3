// SPDX-License-Identifier: Apache-2.0

//! Caching of check responses keyed by request fingerprint.
//!
//! A cached response answers repeated checks locally for its expiration
//! window. Entries nearing staleness are refreshed in the background: a
//! flush emits one outbound request per due entry, the transport's answer
//! re-enters through [`CheckAggregator::add_response`], and the window
//! extends. Denials with a recognizable policy cause are cached too
//! (negative caching); transient availability failures are not, so the
//! next call retries upstream.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use svcctl_model::{CheckErrorCode, CheckRequest, CheckResponse};

use crate::cache::BoundedCache;
use crate::clock::Clock;
use crate::error::Error;
use crate::signature::{Signature, sign_check_request};

/// Denial causes that are stable enough to cache.
const CACHEABLE_ERRORS: &[CheckErrorCode] = &[
    CheckErrorCode::NotFound,
    CheckErrorCode::PermissionDenied,
    CheckErrorCode::ServiceNotActivated,
    CheckErrorCode::BillingDisabled,
    CheckErrorCode::ProjectDeleted,
    CheckErrorCode::ProjectInvalid,
    CheckErrorCode::IpAddressBlocked,
    CheckErrorCode::RefererBlocked,
    CheckErrorCode::ClientAppBlocked,
    CheckErrorCode::VisibilityDenied,
    CheckErrorCode::ApiKeyInvalid,
    CheckErrorCode::ApiKeyExpired,
    CheckErrorCode::ApiKeyNotFound,
];

/// Tuning knobs for check response caching.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckAggregationOptions {
    /// Maximum cache size; zero or negative disables caching entirely.
    pub num_entries: i64,
    /// Background refresh cadence per entry.
    #[serde(with = "humantime_serde")]
    pub flush_interval: Duration,
    /// How long a cached response keeps answering checks. Values at or
    /// below the flush interval are silently bumped to one millisecond
    /// past it.
    #[serde(with = "humantime_serde")]
    pub response_expiration: Duration,
}

impl Default for CheckAggregationOptions {
    fn default() -> Self {
        Self {
            num_entries: 1000,
            flush_interval: Duration::from_secs(1),
            response_expiration: Duration::from_secs(2),
        }
    }
}

impl CheckAggregationOptions {
    /// The expiration actually applied, after the silent bump.
    #[must_use]
    pub fn effective_expiration(&self) -> Duration {
        self.response_expiration
            .max(self.flush_interval + Duration::from_millis(1))
    }
}

struct CheckEntry {
    request: CheckRequest,
    response: CheckResponse,
    last_refresh_nanos: u64,
}

/// Bounded cache of recent check responses.
pub struct CheckAggregator {
    service_name: String,
    flush_interval: Duration,
    flush_interval_nanos: u64,
    expiration_nanos: u64,
    state: Option<Mutex<BoundedCache<Signature, CheckEntry>>>,
    clock: Arc<dyn Clock>,
}

impl CheckAggregator {
    /// Creates an aggregator for `service_name` with the given options.
    #[must_use]
    pub fn new(
        service_name: impl Into<String>,
        options: &CheckAggregationOptions,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let state = (options.num_entries > 0)
            .then(|| Mutex::new(BoundedCache::new(options.num_entries as usize)));
        Self {
            service_name: service_name.into(),
            flush_interval: options.flush_interval,
            flush_interval_nanos: options.flush_interval.as_nanos() as u64,
            expiration_nanos: options.effective_expiration().as_nanos() as u64,
            state,
            clock,
        }
    }

    /// The service this aggregator caches checks for.
    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Cadence at which [`CheckAggregator::flush`] should be driven.
    #[must_use]
    pub fn flush_interval(&self) -> Duration {
        self.flush_interval
    }

    /// Answers a check from cache, or `None` when the caller must go
    /// upstream.
    ///
    /// A stale-but-unexpired entry still answers; the refresh it needs is
    /// emitted by the next [`CheckAggregator::flush`], never inline.
    pub fn check(&self, request: &CheckRequest) -> Result<Option<CheckResponse>, Error> {
        let signature = sign_check_request(request)?;
        let Some(state) = &self.state else {
            return Ok(None);
        };
        let now = self.clock.now_nanos();
        let mut cache = state.lock();
        let Some(written) = cache.written_nanos(&signature) else {
            return Ok(None);
        };
        if now.saturating_sub(written) >= self.expiration_nanos {
            let _ = cache.remove(&signature);
            return Ok(None);
        }
        Ok(cache.get(&signature).map(|entry| entry.response.clone()))
    }

    /// Inserts or updates the cached response for a request. Updating
    /// extends the expiration window.
    ///
    /// Responses denying for a transient availability reason are not
    /// cached, so the next identical check retries upstream.
    pub fn add_response(
        &self,
        request: &CheckRequest,
        response: &CheckResponse,
    ) -> Result<(), Error> {
        let Some(state) = &self.state else {
            return Ok(());
        };
        if !is_cacheable(response) {
            return Ok(());
        }
        let signature = sign_check_request(request)?;
        let now = self.clock.now_nanos();
        let entry = CheckEntry {
            request: request.clone(),
            response: response.clone(),
            last_refresh_nanos: now,
        };
        // A capacity eviction only drops a cached answer; the victim's
        // next check goes upstream again.
        let _ = state.lock().insert(signature, entry, now);
        Ok(())
    }

    /// Emits one refresh request per entry whose flush interval has
    /// elapsed, resetting their refresh timers. Expired entries are
    /// dropped.
    pub fn flush(&self) -> Vec<CheckRequest> {
        let Some(state) = &self.state else {
            return Vec::new();
        };
        let now = self.clock.now_nanos();
        let mut cache = state.lock();
        let expired = cache.sweep_expired(now, self.expiration_nanos);
        if !expired.is_empty() {
            tracing::debug!(
                service = %self.service_name,
                count = expired.len(),
                "dropped expired check responses"
            );
        }
        let mut due = Vec::new();
        for (_signature, written_nanos, entry) in cache.iter_mut() {
            let aged = now.saturating_sub(written_nanos) >= self.flush_interval_nanos;
            let refresh_due =
                now.saturating_sub(entry.last_refresh_nanos) >= self.flush_interval_nanos;
            if aged && refresh_due {
                entry.last_refresh_nanos = now;
                due.push(entry.request.clone());
            }
        }
        due
    }

    /// Evicts everything, returning the generating requests of the
    /// evicted entries.
    pub fn clear(&self) -> Vec<CheckRequest> {
        let Some(state) = &self.state else {
            return Vec::new();
        };
        state
            .lock()
            .drain()
            .into_iter()
            .map(|(_, entry)| entry.request)
            .collect()
    }
}

fn is_cacheable(response: &CheckResponse) -> bool {
    match response.first_error_code() {
        None => true,
        Some(code) => CACHEABLE_ERRORS.contains(&code),
    }
}
