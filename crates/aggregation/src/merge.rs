// SPDX-License-Identifier: Apache-2.0

//! Combining two values of one metric according to its kind.

use svcctl_model::timestamp::envelope;
use svcctl_model::{MetricKind, MetricValue, MetricValuePayload};

use crate::distribution::merge_distributions;
use crate::error::Error;

/// Merges `latest` into `prior` under the metric's kind.
///
/// Delta values sum and their time ranges envelope (min start, max end);
/// gauge and cumulative values keep whichever side ends later, with no
/// arithmetic. Payload types must match on both sides. Kinds unknown to a
/// deployment are treated as delta, which is why [`MetricKind`] defaults
/// to it.
pub fn merge(
    kind: MetricKind,
    prior: &MetricValue,
    latest: &MetricValue,
) -> Result<MetricValue, Error> {
    match kind {
        MetricKind::Delta => merge_delta(prior, latest),
        MetricKind::Gauge | MetricKind::Cumulative => pick_later(prior, latest),
    }
}

fn merge_delta(prior: &MetricValue, latest: &MetricValue) -> Result<MetricValue, Error> {
    use MetricValuePayload as Payload;
    let value = match (&prior.value, &latest.value) {
        (Payload::Int64(a), Payload::Int64(b)) => Payload::Int64(a + b),
        (Payload::Double(a), Payload::Double(b)) => Payload::Double(a + b),
        (Payload::Distribution(a), Payload::Distribution(b)) => {
            Payload::Distribution(merge_distributions(a, b)?)
        }
        _ => return Err(Error::TypeMismatch),
    };
    let (start_time, end_time) = envelope(
        (prior.start_time, prior.end_time),
        (latest.start_time, latest.end_time),
    );
    Ok(MetricValue {
        labels: latest.labels.clone(),
        start_time,
        end_time,
        value,
    })
}

fn pick_later(prior: &MetricValue, latest: &MetricValue) -> Result<MetricValue, Error> {
    if std::mem::discriminant(&prior.value) != std::mem::discriminant(&latest.value) {
        return Err(Error::TypeMismatch);
    }
    // An unset end time sorts earliest, so a timestamped side wins.
    let winner = if prior.end_time > latest.end_time {
        prior
    } else {
        latest
    };
    Ok(winner.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use svcctl_model::{Distribution, Timestamp};

    fn int_value(v: i64, start: i64, end: i64) -> MetricValue {
        MetricValue {
            start_time: Some(Timestamp::new(start, 0)),
            end_time: Some(Timestamp::new(end, 0)),
            ..MetricValue::int64(v)
        }
    }

    #[test]
    fn delta_int64_sums_and_envelopes() {
        let merged = merge(MetricKind::Delta, &int_value(3, 10, 20), &int_value(4, 5, 15))
            .expect("merge");
        assert_eq!(merged.value, MetricValuePayload::Int64(7));
        assert_eq!(merged.start_time, Some(Timestamp::new(5, 0)));
        assert_eq!(merged.end_time, Some(Timestamp::new(20, 0)));
    }

    #[test]
    fn delta_double_sums() {
        let merged = merge(
            MetricKind::Delta,
            &MetricValue::double(1.5),
            &MetricValue::double(2.25),
        )
        .expect("merge");
        assert_eq!(merged.value, MetricValuePayload::Double(3.75));
    }

    #[test]
    fn delta_keeps_latest_labels() {
        let prior = int_value(1, 0, 1);
        let mut latest = int_value(2, 2, 3);
        let _ = latest.labels.insert("zone".into(), "b".into());
        let merged = merge(MetricKind::Delta, &prior, &latest).expect("merge");
        assert_eq!(merged.labels.get("zone").map(String::as_str), Some("b"));
    }

    #[test]
    fn delta_distributions_merge() {
        let mut a = Distribution::linear(4, 1.0, 0.0);
        a.add_sample(0.5);
        let mut b = Distribution::linear(4, 1.0, 0.0);
        b.add_sample(2.5);
        let merged = merge(
            MetricKind::Delta,
            &MetricValue::distribution(a),
            &MetricValue::distribution(b),
        )
        .expect("merge");
        match merged.value {
            MetricValuePayload::Distribution(d) => assert_eq!(d.count, 2),
            other => panic!("expected a distribution, got {other:?}"),
        }
    }

    #[test]
    fn gauge_takes_later_end_time() {
        let older = int_value(10, 0, 5);
        let newer = int_value(20, 0, 9);
        let merged = merge(MetricKind::Gauge, &newer, &older).expect("merge");
        assert_eq!(merged.value, MetricValuePayload::Int64(20));
        let merged = merge(MetricKind::Gauge, &older, &newer).expect("merge");
        assert_eq!(merged.value, MetricValuePayload::Int64(20));
    }

    #[test]
    fn cumulative_behaves_like_gauge() {
        let older = int_value(10, 0, 5);
        let newer = int_value(7, 0, 9);
        let merged = merge(MetricKind::Cumulative, &older, &newer).expect("merge");
        assert_eq!(merged.value, MetricValuePayload::Int64(7));
    }

    #[test]
    fn payload_type_mismatch_is_rejected() {
        let a = MetricValue::int64(1);
        let b = MetricValue::double(1.0);
        assert_eq!(merge(MetricKind::Delta, &a, &b), Err(Error::TypeMismatch));
        assert_eq!(merge(MetricKind::Gauge, &a, &b), Err(Error::TypeMismatch));
    }
}
