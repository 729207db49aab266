// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::metastore::{FunctionId, LocationId, MappingId, StacktraceId};
use std::borrow::Cow;

/// Errors returned by the external collaborators, the metadata store and the
/// sample storage. Both are treated as dependencies: the core never retries
/// them, it reports them to the caller.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backing store could not serve the call.
    #[error("store unavailable: {0}")]
    Unavailable(Cow<'static, str>),
    /// The call did not complete within the request deadline.
    #[error("operation timed out")]
    Timeout,
}

impl StoreError {
    pub fn unavailable(reason: impl Into<Cow<'static, str>>) -> Self {
        Self::Unavailable(reason.into())
    }
}

/// Faults while building or encoding a report. These are fatal for the
/// request; a partially built report is never returned.
#[derive(Debug, thiserror::Error)]
pub enum AggregationError {
    #[error("integer overflow while {0}")]
    Overflow(&'static str),
    #[error("stacktrace {0} not found")]
    MissingStacktrace(StacktraceId),
    #[error("location {0} not found")]
    MissingLocation(LocationId),
    #[error("function {0} not found")]
    MissingFunction(FunctionId),
    #[error("mapping {0} not found")]
    MissingMapping(MappingId),
    /// The pprof profile being encoded (or decoded) is not structurally valid.
    #[error("invalid pprof encode target: {0}")]
    InvalidEncodeTarget(Cow<'static, str>),
    /// A fold partition running on a blocking worker did not complete.
    #[error("fold worker failed: {0}")]
    Worker(Cow<'static, str>),
}

impl AggregationError {
    pub fn invalid_target(reason: impl Into<Cow<'static, str>>) -> Self {
        Self::InvalidEncodeTarget(reason.into())
    }
}

/// The error type crossing the query façade boundary.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// Malformed selector, missing or inverted time range, or a request whose
    /// mode, report type and options don't fit together. Detected before any
    /// I/O and never worth retrying.
    #[error("invalid input: {0}")]
    InvalidInput(Cow<'static, str>),
    /// A storage or metastore call failed or timed out. The whole request may
    /// be retried by the caller.
    #[error("{operation}: {source}")]
    Unavailable {
        operation: &'static str,
        #[source]
        source: StoreError,
    },
    #[error(transparent)]
    Aggregation(#[from] AggregationError),
    /// The caller cancelled the request.
    #[error("request cancelled")]
    Cancelled,
}

/// Coarse classification of a [`QueryError`], for mapping onto transport
/// status codes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    InvalidInput,
    Unavailable,
    Aggregation,
    Cancelled,
}

impl QueryError {
    pub fn invalid(reason: impl Into<Cow<'static, str>>) -> Self {
        Self::InvalidInput(reason.into())
    }

    /// Returns a closure wrapping a [`StoreError`] with the operation that
    /// produced it, for use with `map_err`.
    pub fn unavailable(operation: &'static str) -> impl FnOnce(StoreError) -> Self {
        move |source| Self::Unavailable { operation, source }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            QueryError::InvalidInput(_) => ErrorKind::InvalidInput,
            QueryError::Unavailable { .. } => ErrorKind::Unavailable,
            QueryError::Aggregation(_) => ErrorKind::Aggregation,
            QueryError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds() {
        assert_eq!(QueryError::invalid("x").kind(), ErrorKind::InvalidInput);
        assert_eq!(QueryError::Cancelled.kind(), ErrorKind::Cancelled);

        let err = QueryError::unavailable("storage.query_range")(StoreError::Timeout);
        assert_eq!(err.kind(), ErrorKind::Unavailable);
        assert_eq!(
            err.to_string(),
            "storage.query_range: operation timed out"
        );

        let err = QueryError::from(AggregationError::Overflow("folding stacks"));
        assert_eq!(err.kind(), ErrorKind::Aggregation);
        assert_eq!(err.to_string(), "integer overflow while folding stacks");
    }
}
