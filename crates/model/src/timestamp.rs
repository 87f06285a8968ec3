// SPDX-License-Identifier: Apache-2.0

//! Point-in-time values carried on operations, metric values, and log
//! entries.

use serde::{Deserialize, Serialize};

const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// A wall-clock instant with nanosecond resolution.
///
/// The `(seconds, nanos)` split follows the upstream wire shape; `nanos` is
/// always in `0..1_000_000_000` for values produced by this crate.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Timestamp {
    /// Whole seconds since the unix epoch.
    pub seconds: i64,
    /// Fractional nanoseconds, added to `seconds`.
    pub nanos: i32,
}

impl Timestamp {
    /// Creates a timestamp from a seconds/nanos pair.
    #[must_use]
    pub const fn new(seconds: i64, nanos: i32) -> Self {
        Self { seconds, nanos }
    }

    /// Creates a timestamp from nanoseconds since the unix epoch.
    #[must_use]
    pub const fn from_unix_nanos(nanos: i64) -> Self {
        Self {
            seconds: nanos.div_euclid(NANOS_PER_SECOND),
            nanos: nanos.rem_euclid(NANOS_PER_SECOND) as i32,
        }
    }

    /// Returns this timestamp as nanoseconds since the unix epoch.
    #[must_use]
    pub const fn as_unix_nanos(&self) -> i64 {
        self.seconds * NANOS_PER_SECOND + self.nanos as i64
    }

    /// Returns the earlier of two timestamps.
    #[must_use]
    pub fn earliest(a: Self, b: Self) -> Self {
        a.min(b)
    }

    /// Returns the later of two timestamps.
    #[must_use]
    pub fn latest(a: Self, b: Self) -> Self {
        a.max(b)
    }
}

/// Envelopes two optional time ranges: the earlier start and the later end.
///
/// `None` on either side yields the other side, so merging against an
/// unset range is the identity.
#[must_use]
pub fn envelope(
    a: (Option<Timestamp>, Option<Timestamp>),
    b: (Option<Timestamp>, Option<Timestamp>),
) -> (Option<Timestamp>, Option<Timestamp>) {
    let start = match (a.0, b.0) {
        (Some(x), Some(y)) => Some(x.min(y)),
        (x, y) => x.or(y),
    };
    let end = match (a.1, b.1) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (x, y) => x.or(y),
    };
    (start, end)
}
