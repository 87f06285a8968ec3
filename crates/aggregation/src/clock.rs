// SPDX-License-Identifier: Apache-2.0

//! Time source abstraction.
//!
//! Aggregator freshness decisions and scheduler deadlines all read time
//! through [`Clock`], so tests can drive expiry and flush windows
//! deterministically.

use std::time::{SystemTime, UNIX_EPOCH};

/// A monotonic-enough source of wall-clock nanoseconds.
pub trait Clock: Send + Sync {
    /// Nanoseconds since the unix epoch.
    fn now_nanos(&self) -> u64;
}

/// The process wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_nanos(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0)
    }
}

#[cfg(any(test, feature = "test-utils"))]
mod manual {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    use super::Clock;

    /// A hand-driven clock for tests.
    #[derive(Debug, Default)]
    pub struct ManualClock {
        nanos: AtomicU64,
    }

    impl ManualClock {
        /// Creates a clock reading `start_nanos`.
        #[must_use]
        pub fn new(start_nanos: u64) -> Self {
            Self {
                nanos: AtomicU64::new(start_nanos),
            }
        }

        /// Moves the clock forward.
        pub fn advance(&self, by: Duration) {
            let _ = self.nanos.fetch_add(by.as_nanos() as u64, Ordering::SeqCst);
        }

        /// Sets the clock to an absolute reading.
        pub fn set_nanos(&self, nanos: u64) {
            self.nanos.store(nanos, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now_nanos(&self) -> u64 {
            self.nanos.load(Ordering::SeqCst)
        }
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub use manual::ManualClock;
