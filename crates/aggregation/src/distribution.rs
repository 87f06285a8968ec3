// SPDX-License-Identifier: Apache-2.0

//! Combining distributions without revisiting their samples.

use svcctl_model::Distribution;

use crate::error::Error;

/// Merges two distributions with identical bucket layouts.
///
/// Bucket counts sum elementwise; the summary statistics combine with the
/// parallel-reduction identities, so the result is exactly what a single
/// distribution fed all samples of both inputs would hold (up to float
/// rounding).
pub fn merge_distributions(a: &Distribution, b: &Distribution) -> Result<Distribution, Error> {
    if !a.same_layout(b) {
        return Err(Error::BucketMismatch);
    }
    if a.count == 0 {
        return Ok(b.clone());
    }
    if b.count == 0 {
        return Ok(a.clone());
    }

    let count = a.count + b.count;
    let (ca, cb) = (a.count as f64, b.count as f64);
    let mean = (ca * a.mean + cb * b.mean) / (ca + cb);
    let mean_gap = a.mean - b.mean;
    let sum_of_squared_deviation = a.sum_of_squared_deviation
        + b.sum_of_squared_deviation
        + (ca * cb / (ca + cb)) * mean_gap * mean_gap;

    let bucket_counts = a
        .bucket_counts
        .iter()
        .zip(&b.bucket_counts)
        .map(|(x, y)| x + y)
        .collect();

    Ok(Distribution {
        count,
        mean,
        sum_of_squared_deviation,
        minimum: a.minimum.min(b.minimum),
        maximum: a.maximum.max(b.maximum),
        bucket_counts,
        buckets: a.buckets.clone(),
    })
}
