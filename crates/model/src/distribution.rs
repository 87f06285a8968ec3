// SPDX-License-Identifier: Apache-2.0

//! Bucketed histograms with running summary statistics.

use serde::{Deserialize, Serialize};

/// The bucket layout of a [`Distribution`].
///
/// All layouts carry an implicit underflow bucket below the first finite
/// boundary and an overflow bucket above the last one, so a distribution
/// with `n` finite buckets stores `n + 2` counts (`n + 1` for an explicit
/// layout with `n` boundaries).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketOptions {
    /// Buckets delimited by an explicit, strictly increasing boundary list.
    Explicit {
        /// The boundary values, low to high.
        bounds: Vec<f64>,
    },
    /// `num_finite_buckets` buckets of equal `width`, starting at `offset`.
    Linear {
        /// Number of finite buckets.
        num_finite_buckets: u32,
        /// Width of each finite bucket; must be positive.
        width: f64,
        /// Lower bound of the first finite bucket.
        offset: f64,
    },
    /// Buckets whose width grows by `growth_factor`, starting at `scale`.
    Exponential {
        /// Number of finite buckets.
        num_finite_buckets: u32,
        /// Ratio between adjacent bucket widths; must be greater than 1.
        growth_factor: f64,
        /// Lower bound of the first finite bucket; must be positive.
        scale: f64,
    },
}

impl BucketOptions {
    /// Number of counts a distribution with this layout stores.
    #[must_use]
    pub fn bucket_count(&self) -> usize {
        match self {
            Self::Explicit { bounds } => bounds.len() + 1,
            Self::Linear {
                num_finite_buckets, ..
            }
            | Self::Exponential {
                num_finite_buckets, ..
            } => *num_finite_buckets as usize + 2,
        }
    }

    /// Index of the bucket a sample falls into.
    #[must_use]
    pub fn bucket_index(&self, sample: f64) -> usize {
        match self {
            Self::Explicit { bounds } => bounds.partition_point(|b| sample >= *b),
            Self::Linear {
                num_finite_buckets,
                width,
                offset,
            } => {
                if sample < *offset {
                    0
                } else {
                    let idx = ((sample - offset) / width) as usize + 1;
                    idx.min(*num_finite_buckets as usize + 1)
                }
            }
            Self::Exponential {
                num_finite_buckets,
                growth_factor,
                scale,
            } => {
                if sample < *scale {
                    return 0;
                }
                let mut bound = *scale;
                let mut idx = 1usize;
                while idx <= *num_finite_buckets as usize && sample >= bound * growth_factor {
                    bound *= growth_factor;
                    idx += 1;
                }
                idx
            }
        }
    }
}

/// A histogram with bucket counts and running summary statistics.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Distribution {
    /// Total number of samples.
    pub count: i64,
    /// Arithmetic mean of the samples; 0 when `count` is 0.
    pub mean: f64,
    /// Sum of squared deviations from the mean; 0 when `count` is 0.
    pub sum_of_squared_deviation: f64,
    /// Smallest sample seen; meaningful only when `count` is positive.
    pub minimum: f64,
    /// Largest sample seen; meaningful only when `count` is positive.
    pub maximum: f64,
    /// Per-bucket sample counts, sized by the layout.
    pub bucket_counts: Vec<i64>,
    /// The bucket layout.
    pub buckets: BucketOptions,
}

impl Distribution {
    /// Creates an empty distribution with the given layout.
    #[must_use]
    pub fn new(buckets: BucketOptions) -> Self {
        let bucket_counts = vec![0; buckets.bucket_count()];
        Self {
            count: 0,
            mean: 0.0,
            sum_of_squared_deviation: 0.0,
            minimum: f64::INFINITY,
            maximum: f64::NEG_INFINITY,
            bucket_counts,
            buckets,
        }
    }

    /// Creates an empty distribution with explicit bucket boundaries.
    #[must_use]
    pub fn explicit(bounds: Vec<f64>) -> Self {
        Self::new(BucketOptions::Explicit { bounds })
    }

    /// Creates an empty distribution with a linear bucket layout.
    #[must_use]
    pub fn linear(num_finite_buckets: u32, width: f64, offset: f64) -> Self {
        Self::new(BucketOptions::Linear {
            num_finite_buckets,
            width,
            offset,
        })
    }

    /// Creates an empty distribution with an exponential bucket layout.
    #[must_use]
    pub fn exponential(num_finite_buckets: u32, growth_factor: f64, scale: f64) -> Self {
        Self::new(BucketOptions::Exponential {
            num_finite_buckets,
            growth_factor,
            scale,
        })
    }

    /// Adds one sample, updating bucket counts and summary statistics.
    pub fn add_sample(&mut self, sample: f64) {
        let idx = self.buckets.bucket_index(sample);
        self.bucket_counts[idx] += 1;
        self.count += 1;
        // Welford's online update keeps mean and squared deviation stable.
        let delta = sample - self.mean;
        self.mean += delta / self.count as f64;
        self.sum_of_squared_deviation += delta * (sample - self.mean);
        self.minimum = self.minimum.min(sample);
        self.maximum = self.maximum.max(sample);
    }

    /// Whether two distributions share the same bucket layout.
    #[must_use]
    pub fn same_layout(&self, other: &Self) -> bool {
        self.buckets == other.buckets && self.bucket_counts.len() == other.bucket_counts.len()
    }
}
