// SPDX-License-Identifier: Apache-2.0

//! Errors raised by the aggregation engine.
//!
//! These are programmer errors: malformed operations or metric values that
//! cannot legally be aggregated. Upstream denials are data, not errors, and
//! transport failures never reach this crate.

/// Errors raised while signing or merging.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// An operation lacks a field required to compute its fingerprint.
    #[error("operation is missing required field `{0}`")]
    MissingField(&'static str),

    /// Two metric values with different payload types cannot merge.
    #[error("cannot merge metric values with different payload types")]
    TypeMismatch,

    /// Two distributions with different bucket layouts cannot merge.
    #[error("cannot merge distributions with different bucket layouts")]
    BucketMismatch,
}
