// SPDX-License-Identifier: Apache-2.0

//! Aggregation and caching engine for the service control client.
//!
//! Application servers call the upstream service control API on every
//! inbound request; issuing one RPC per request would swamp both sides.
//! This crate answers locally whenever it safely can:
//!
//! - [`CheckAggregator`] caches recent check responses and schedules
//!   background refresh before they expire.
//! - [`QuotaAggregator`] answers allocations optimistically from cache,
//!   accumulating consumed tokens between refreshes, with at most one
//!   in-flight refresh per fingerprint.
//! - [`ReportAggregator`] merges reported operations by fingerprint until
//!   flushed, so a burst of identical calls becomes one wire operation.
//!
//! Fingerprints ([`signature`]) decide what "the same request" means;
//! [`merge`] decides how two metric values combine (delta values sum,
//! gauges take the latest).

pub mod cache;
pub mod check;
pub mod clock;
pub mod distribution;
pub mod error;
pub mod merge;
pub mod quota;
pub mod report;
pub mod signature;

pub use cache::BoundedCache;
pub use check::{CheckAggregationOptions, CheckAggregator};
pub use clock::{Clock, SystemClock};
pub use error::Error;
pub use quota::{QuotaAggregationOptions, QuotaAggregator, QuotaOperationAggregator};
pub use report::{OperationAggregator, ReportAggregationOptions, ReportAggregator};
pub use signature::Signature;

#[cfg(any(test, feature = "test-utils"))]
pub use clock::ManualClock;
