// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The sample row model and the columnar storage collaborator.

mod memory;

pub use memory::*;

use crate::error::{QueryError, StoreError};
use crate::labels::LabelSet;
use crate::metastore::StacktraceId;
use crate::selector::Selector;
use async_trait::async_trait;
use serde::Serialize;

/// What a value measures. Doubles as the profile type reported to callers.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize)]
pub struct SampleKind {
    pub name: String,
    pub sample_type: String,
    pub sample_unit: String,
    pub period_type: String,
    pub period_unit: String,
    /// Values are deltas since the previous profile of the series.
    pub delta: bool,
}

pub type ProfileType = SampleKind;

/// The atomic stored fact.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SampleRow {
    pub labels: LabelSet,
    pub stacktrace: StacktraceId,
    pub kind: SampleKind,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub value: i64,
}

/// A half-open interval of milliseconds, `[start, end)`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TimeWindow {
    pub start: i64,
    pub end: i64,
}

impl TimeWindow {
    pub fn new(start: i64, end: i64) -> Result<Self, QueryError> {
        if start > end {
            return Err(QueryError::invalid(format!(
                "start {start} is after end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    /// Builds a window from request fields, both of which are required.
    pub fn required(start: Option<i64>, end: Option<i64>) -> Result<Self, QueryError> {
        match (start, end) {
            (Some(start), Some(end)) => Self::new(start, end),
            (None, _) => Err(QueryError::invalid("start is required")),
            (_, None) => Err(QueryError::invalid("end is required")),
        }
    }

    pub fn contains(&self, timestamp: i64) -> bool {
        self.start <= timestamp && timestamp < self.end
    }
}

/// The columnar store holding sample rows. Implementations are expected to
/// be safe for concurrent use.
#[async_trait]
pub trait SampleStorage: Send + Sync {
    async fn append_rows(&self, rows: Vec<SampleRow>) -> Result<(), StoreError>;

    /// Rows selected by `selector` with a timestamp inside `window`.
    async fn query_range(
        &self,
        selector: &Selector,
        window: TimeWindow,
    ) -> Result<Vec<SampleRow>, StoreError>;

    /// Rows selected by `selector` at the latest instant not after
    /// `timestamp` that has any.
    async fn query_at(
        &self,
        selector: &Selector,
        timestamp: i64,
    ) -> Result<Vec<SampleRow>, StoreError>;

    /// Sorted, distinct label names of the series in `window`, optionally
    /// restricted to rows selected by `selector`.
    async fn distinct_label_names(
        &self,
        window: TimeWindow,
        selector: Option<&Selector>,
    ) -> Result<Vec<String>, StoreError>;

    async fn distinct_label_values(
        &self,
        name: &str,
        window: TimeWindow,
        selector: Option<&Selector>,
    ) -> Result<Vec<String>, StoreError>;

    async fn distinct_sample_kinds(&self, window: TimeWindow) -> Result<Vec<SampleKind>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn windows() {
        let window = TimeWindow::new(1, 3).unwrap();
        assert!(window.contains(1));
        assert!(window.contains(2));
        assert!(!window.contains(3));
        assert!(TimeWindow::new(2, 2).is_ok());
        assert_eq!(TimeWindow::new(3, 1).unwrap_err().kind(), ErrorKind::InvalidInput);
        assert_eq!(TimeWindow::required(None, Some(1)).unwrap_err().kind(), ErrorKind::InvalidInput);
        assert_eq!(TimeWindow::required(Some(1), None).unwrap_err().kind(), ErrorKind::InvalidInput);
    }
}
