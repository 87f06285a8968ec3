// SPDX-License-Identifier: Apache-2.0

//! Wire data model for the service control client.
//!
//! The types in this crate mirror the service control v1 message shapes:
//! operations with their metric value sets and log entries, plus the
//! request/response pairs for the three upstream calls (check,
//! allocate-quota, report). They are plain serde-derived structs so that
//! embedding servers can snapshot or replay traffic without a protobuf
//! toolchain.

pub mod check;
pub mod check_error;
pub mod distribution;
pub mod log_entry;
pub mod metric;
pub mod operation;
pub mod quota;
pub mod report;
pub mod timestamp;

pub use check::{CheckError, CheckRequest, CheckResponse};
pub use check_error::{CheckErrorCode, CheckErrorInfo, classify};
pub use distribution::{BucketOptions, Distribution};
pub use log_entry::{LogEntry, LogPayload, LogSeverity};
pub use metric::{MetricKind, MetricValue, MetricValuePayload, MetricValueSet};
pub use operation::{Importance, Operation, new_operation_id};
pub use quota::{
    AllocateQuotaRequest, AllocateQuotaResponse, QuotaError, QuotaErrorCode, QuotaMode,
    QuotaOperation,
};
pub use report::{ReportError, ReportRequest, ReportResponse};
pub use timestamp::Timestamp;

/// Maximum number of operations a single report request may carry.
pub const MAX_OPERATIONS_PER_REPORT: usize = 1000;
