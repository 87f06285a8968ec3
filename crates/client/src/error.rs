// SPDX-License-Identifier: Apache-2.0

//! Errors surfaced across the client facade.
//!
//! Only programmer errors cross this boundary: lifecycle misuse,
//! mismatched service names, missing configuration, and malformed
//! operations. Transient transport failures never do; the facade fails
//! open on checks, answers quota from cache, and drops reports after a
//! best-effort send.

/// Errors returned by the client facade.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// An operation was invoked outside the running state.
    #[error("client is {0}; start it before issuing calls")]
    InvalidState(&'static str),

    /// A request named a service other than the one this client serves.
    #[error("request targets service `{actual}` but this client serves `{expected}`")]
    ServiceNameMismatch {
        /// The service the client was built for.
        expected: String,
        /// The service named by the request.
        actual: String,
    },

    /// The builder was finalized without a transport.
    #[error("a transport is required to build the client")]
    MissingTransport,

    /// A malformed request was handed to an aggregator.
    #[error(transparent)]
    Aggregation(#[from] svcctl_aggregation::Error),
}
