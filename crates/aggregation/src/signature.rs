// SPDX-License-Identifier: Apache-2.0

//! Fingerprints: the canonical digests used as aggregation keys.
//!
//! A fingerprint captures the salient identity of a check, allocation, or
//! reported operation: consumer, method, sorted labels, and metric names.
//! Two requests with the same fingerprint are "the same" for aggregation
//! purposes and collapse into one cache entry. Within a metric value set
//! only the metric name (and each value's own labels) contributes, never
//! the values themselves: the same metric reported twice for the same
//! consumer must collide so the values aggregate.
//!
//! Fields are separated by a null byte so `"a" + "bc"` and `"ab" + "c"`
//! cannot collide; label maps iterate in lexicographic key order. The hash
//! is not security-sensitive, only collision-resistant for realistic
//! label sets.

use std::collections::BTreeMap;
use std::fmt;

use xxhash_rust::xxh3::Xxh3;

use svcctl_model::{AllocateQuotaRequest, CheckRequest, MetricValueSet, Operation};

use crate::error::Error;

const SEP: &[u8] = &[0u8];

/// A 128-bit aggregation key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Signature(u128);

impl Signature {
    /// The digest as big-endian bytes.
    #[must_use]
    pub const fn to_bytes(self) -> [u8; 16] {
        self.0.to_be_bytes()
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({:032x})", self.0)
    }
}

fn update_str(hasher: &mut Xxh3, value: &str) {
    hasher.update(value.as_bytes());
    hasher.update(SEP);
}

fn update_labels(hasher: &mut Xxh3, labels: &BTreeMap<String, String>) {
    // BTreeMap iteration is already lexicographic by key.
    for (key, value) in labels {
        update_str(hasher, key);
        update_str(hasher, value);
    }
}

fn update_metric_sets(hasher: &mut Xxh3, sets: &[MetricValueSet]) {
    let mut sorted: Vec<&MetricValueSet> = sets.iter().collect();
    sorted.sort_by(|a, b| a.metric_name.cmp(&b.metric_name));
    for set in sorted {
        update_str(hasher, &set.metric_name);
        let mut value_keys: Vec<u128> =
            set.values.iter().map(|v| sign_labels(&v.labels).0).collect();
        value_keys.sort_unstable();
        for key in value_keys {
            hasher.update(&key.to_be_bytes());
        }
    }
}

fn require_operation_identity(operation_name: &str, consumer_id: &str) -> Result<(), Error> {
    if operation_name.is_empty() {
        return Err(Error::MissingField("operation_name"));
    }
    if consumer_id.is_empty() {
        return Err(Error::MissingField("consumer_id"));
    }
    Ok(())
}

/// Fingerprint of a check request.
pub fn sign_check_request(request: &CheckRequest) -> Result<Signature, Error> {
    let op = &request.operation;
    require_operation_identity(&op.operation_name, &op.consumer_id)?;
    let mut hasher = Xxh3::new();
    update_str(&mut hasher, &request.service_name);
    update_str(&mut hasher, &op.operation_name);
    update_str(&mut hasher, &op.consumer_id);
    update_labels(&mut hasher, &op.labels);
    hasher.update(SEP);
    update_metric_sets(&mut hasher, &op.metric_value_sets);
    Ok(Signature(hasher.digest128()))
}

/// Fingerprint of a reported operation.
pub fn sign_operation(operation: &Operation) -> Result<Signature, Error> {
    require_operation_identity(&operation.operation_name, &operation.consumer_id)?;
    let mut hasher = Xxh3::new();
    update_str(&mut hasher, &operation.consumer_id);
    update_str(&mut hasher, &operation.operation_name);
    update_labels(&mut hasher, &operation.labels);
    Ok(Signature(hasher.digest128()))
}

/// Fingerprint of an allocate-quota request.
pub fn sign_quota_request(request: &AllocateQuotaRequest) -> Result<Signature, Error> {
    let op = &request.allocate_operation;
    if op.method_name.is_empty() {
        return Err(Error::MissingField("method_name"));
    }
    if op.consumer_id.is_empty() {
        return Err(Error::MissingField("consumer_id"));
    }
    let mut hasher = Xxh3::new();
    update_str(&mut hasher, &op.method_name);
    update_str(&mut hasher, &op.consumer_id);
    let mut names: Vec<&str> = op
        .quota_metrics
        .iter()
        .map(|set| set.metric_name.as_str())
        .collect();
    names.sort_unstable();
    for name in names {
        update_str(&mut hasher, name);
    }
    Ok(Signature(hasher.digest128()))
}

/// Fingerprint of a metric value's label map, the value's identity inside
/// a metric value set.
#[must_use]
pub fn sign_labels(labels: &BTreeMap<String, String>) -> Signature {
    let mut hasher = Xxh3::new();
    update_labels(&mut hasher, labels);
    Signature(hasher.digest128())
}
