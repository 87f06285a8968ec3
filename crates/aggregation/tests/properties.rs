// SPDX-License-Identifier: Apache-2.0

//! Cross-module invariants of the aggregation engine.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use svcctl_aggregation::signature::{sign_operation, sign_labels};
use svcctl_aggregation::{
    ManualClock, OperationAggregator, ReportAggregationOptions, ReportAggregator,
};
use svcctl_model::{MetricValue, MetricValueSet, Operation, ReportRequest};

fn operation(name: &str, consumer: &str, labels: &[(&str, &str)], cost: i64) -> Operation {
    let mut op = Operation::new(name, consumer);
    for (k, v) in labels {
        let _ = op.labels.insert((*k).into(), (*v).into());
    }
    op.metric_value_sets = vec![MetricValueSet::single("requests", MetricValue::int64(cost))];
    op
}

#[test]
fn equal_identity_means_equal_fingerprint_and_nothing_else_does() {
    let variants = [
        ("ListShelves", "project:p", vec![("loc", "us"), ("zone", "a")]),
        ("ListShelves", "project:p", vec![("loc", "us")]),
        ("ListShelves", "project:q", vec![("loc", "us"), ("zone", "a")]),
        ("GetShelf", "project:p", vec![("loc", "us"), ("zone", "a")]),
        ("ListShelves", "project:p", vec![("loc", "eu"), ("zone", "a")]),
    ];
    let mut seen = HashSet::new();
    for (name, consumer, labels) in &variants {
        let a = operation(name, consumer, labels, 1);
        // Same identity, different id, label insertion order, and cost.
        let mut reversed = labels.clone();
        reversed.reverse();
        let b = operation(name, consumer, &reversed, 99);
        let sig_a = sign_operation(&a).expect("sign");
        let sig_b = sign_operation(&b).expect("sign");
        assert_eq!(sig_a, sig_b);
        assert!(seen.insert(sig_a), "fingerprint collided across variants");
    }
}

#[test]
fn flush_emits_exactly_the_distinct_fingerprints() {
    let clock = Arc::new(ManualClock::new(0));
    let aggregator = ReportAggregator::new(
        "testService",
        &ReportAggregationOptions::default(),
        BTreeMap::new(),
        clock.clone(),
    );

    let ops = [
        operation("op1", "project:p", &[], 1),
        operation("op2", "project:p", &[], 1),
        operation("op1", "project:q", &[], 1),
        operation("op1", "project:p", &[("loc", "us")], 1),
    ];
    let expected: HashSet<_> = ops
        .iter()
        .map(|op| sign_operation(op).expect("sign"))
        .collect();

    for _ in 0..7 {
        let request = ReportRequest {
            service_name: "testService".into(),
            operations: ops.to_vec(),
            ..ReportRequest::default()
        };
        assert!(aggregator.report(&request).expect("report"));
    }

    clock.advance(Duration::from_secs(4));
    let flushed = aggregator.flush();
    let emitted: HashSet<_> = flushed
        .iter()
        .flat_map(|request| &request.operations)
        .map(|op| sign_operation(op).expect("sign"))
        .collect();
    assert_eq!(emitted, expected);
    let total: usize = flushed.iter().map(|r| r.operations.len()).sum();
    assert_eq!(total, expected.len());
}

#[test]
fn repeated_merges_equal_one_insert_plus_accumulations() {
    let op = operation("op1", "project:p", &[("loc", "us")], 3);
    let kinds = Arc::new(BTreeMap::new());

    let mut merged = OperationAggregator::new(&op, Arc::clone(&kinds)).expect("new");
    for _ in 0..4 {
        merged.merge_operation(&op).expect("merge");
    }
    let merged = merged.into_operation();

    let mut accumulated = MetricValue::int64(3);
    for _ in 0..4 {
        accumulated = svcctl_aggregation::merge::merge(
            svcctl_model::MetricKind::Delta,
            &accumulated,
            &MetricValue::int64(3),
        )
        .expect("merge");
    }
    assert_eq!(merged.metric_value_sets[0].values[0].value, accumulated.value);
}

#[test]
fn flush_before_any_activity_is_empty() {
    let clock = Arc::new(ManualClock::new(0));
    let aggregator = ReportAggregator::new(
        "testService",
        &ReportAggregationOptions::default(),
        BTreeMap::new(),
        clock,
    );
    assert!(aggregator.flush().is_empty());
    assert!(aggregator.clear().is_empty());
}

#[test]
fn label_fingerprints_distinguish_series() {
    let mut with_zone = BTreeMap::new();
    let _ = with_zone.insert("zone".to_owned(), "a".to_owned());
    let empty = BTreeMap::new();
    assert_ne!(sign_labels(&with_zone), sign_labels(&empty));
    assert_eq!(sign_labels(&with_zone), sign_labels(&with_zone.clone()));
}
