// SPDX-License-Identifier: Apache-2.0

//! Client facade for the service control aggregation engine.
//!
//! [`ServiceControlClient`] ties the three aggregators to a pluggable
//! [`Transport`] and a priority-ordered flush [`Scheduler`]. Application
//! threads call [`check`](ServiceControlClient::check),
//! [`allocate_quota`](ServiceControlClient::allocate_quota), and
//! [`report`](ServiceControlClient::report) on every inbound request; a
//! background thread drains the aggregators upstream on their flush
//! intervals. When no background thread can be created the scheduler runs
//! cooperatively at the tail of every `report` call instead.

pub mod client;
pub mod error;
pub mod scheduler;
pub mod stats;
pub mod transport;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use client::{Builder, ServiceControlClient, StdThreadSource, ThreadSource};
pub use error::Error;
pub use scheduler::Scheduler;
pub use stats::{Statistics, StatisticsSnapshot};
pub use transport::{Transport, TransportError};
