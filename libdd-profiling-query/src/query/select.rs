// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::request::{
    DiffSelectionMode, MergeProfile, MetricsSample, MetricsSeries, ProfileDiffSelection,
    SelectionOptions, SingleProfile,
};
use crate::collections::identifiable::FxIndexMap;
use crate::context::RequestContext;
use crate::error::{AggregationError, QueryError};
use crate::labels::LabelSet;
use crate::metastore::StacktraceId;
use crate::selector::Selector;
use crate::storage::{SampleKind, SampleRow, SampleStorage, TimeWindow};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

const NANOS_PER_MILLI: i64 = 1_000_000;

/// A validated choice of rows: one instant or a merged range.
#[derive(Clone, Debug)]
pub enum Selection {
    At { selector: Selector, time: i64 },
    Range { selector: Selector, window: TimeWindow },
}

impl Selection {
    pub fn single(profile: &SingleProfile) -> Result<Self, QueryError> {
        let selector = Selector::parse(&profile.query)?;
        let time = profile
            .time
            .ok_or_else(|| QueryError::invalid("time is required"))?;
        Ok(Self::At { selector, time })
    }

    pub fn merge(profile: &MergeProfile) -> Result<Self, QueryError> {
        let selector = Selector::parse(&profile.query)?;
        let window = TimeWindow::required(profile.start, profile.end)?;
        Ok(Self::Range { selector, window })
    }

    /// One side of a diff. The mode must agree with the options given.
    pub fn diff_side(
        side: Option<&ProfileDiffSelection>,
        name: &'static str,
    ) -> Result<Self, QueryError> {
        let side = side.ok_or_else(|| QueryError::invalid(format!("diff side {name} is required")))?;
        match (DiffSelectionMode::try_from(side.mode)?, &side.options) {
            (DiffSelectionMode::SingleUnspecified, Some(SelectionOptions::Single(profile))) => {
                Self::single(profile)
            }
            (DiffSelectionMode::Merge, Some(SelectionOptions::Merge(profile))) => Self::merge(profile),
            (mode, options) => Err(QueryError::invalid(format!(
                "diff side {name}: mode {mode:?} doesn't fit options {}",
                options_name(options.as_ref())
            ))),
        }
    }

    /// `(time_nanos, duration_nanos)` for the pprof header.
    pub fn pprof_time(&self) -> (i64, i64) {
        match self {
            Selection::At { time, .. } => (time.saturating_mul(NANOS_PER_MILLI), 0),
            Selection::Range { window, .. } => (
                window.start.saturating_mul(NANOS_PER_MILLI),
                window
                    .end
                    .saturating_sub(window.start)
                    .saturating_mul(NANOS_PER_MILLI),
            ),
        }
    }
}

fn options_name(options: Option<&SelectionOptions>) -> &'static str {
    match options {
        Some(SelectionOptions::Single(_)) => "single",
        Some(SelectionOptions::Merge(_)) => "merge",
        None => "none",
    }
}

/// The rows of a selection, reduced to a value per stacktrace.
#[derive(Clone, Debug, Default)]
pub struct Selected {
    /// The one kind the rows share; `None` when nothing matched.
    pub kind: Option<SampleKind>,
    pub values: FxIndexMap<StacktraceId, i64>,
}

impl Selected {
    fn from_rows(rows: Vec<SampleRow>) -> Result<Self, QueryError> {
        let kinds: BTreeSet<&SampleKind> = rows.iter().map(|row| &row.kind).collect();
        if kinds.len() > 1 {
            return Err(QueryError::invalid(format!(
                "query matches {} profile types, select one",
                kinds.len()
            )));
        }
        let kind = kinds.into_iter().next().cloned();
        let mut values: FxIndexMap<StacktraceId, i64> = FxIndexMap::default();
        for row in &rows {
            let value = values.entry(row.stacktrace).or_insert(0);
            *value = value
                .checked_add(row.value)
                .ok_or(AggregationError::Overflow("summing selected rows"))?;
        }
        Ok(Self { kind, values })
    }
}

/// Retrieves rows from storage for a selection.
#[derive(Clone)]
pub struct QuerySelector {
    storage: Arc<dyn SampleStorage>,
}

impl QuerySelector {
    pub fn new(storage: Arc<dyn SampleStorage>) -> Self {
        Self { storage }
    }

    pub async fn rows(
        &self,
        ctx: &RequestContext,
        selection: &Selection,
    ) -> Result<Vec<SampleRow>, QueryError> {
        match selection {
            Selection::At { selector, time } => {
                let operation = "storage.query_at";
                ctx.run(operation, async {
                    self.storage
                        .query_at(selector, *time)
                        .await
                        .map_err(QueryError::unavailable(operation))
                })
                .await
            }
            Selection::Range { selector, window } => {
                let operation = "storage.query_range";
                ctx.run(operation, async {
                    self.storage
                        .query_range(selector, *window)
                        .await
                        .map_err(QueryError::unavailable(operation))
                })
                .await
            }
        }
    }

    pub async fn select(
        &self,
        ctx: &RequestContext,
        selection: &Selection,
    ) -> Result<Selected, QueryError> {
        Selected::from_rows(self.rows(ctx, selection).await?)
    }

    /// Groups the rows in `window` by kind and label set, with one point per
    /// timestamp. At most `limit` series are returned; 0 means all.
    pub async fn series(
        &self,
        ctx: &RequestContext,
        selector: Selector,
        window: TimeWindow,
        limit: usize,
    ) -> Result<Vec<MetricsSeries>, QueryError> {
        let rows = self
            .rows(ctx, &Selection::Range { selector, window })
            .await?;
        let mut series: BTreeMap<(SampleKind, LabelSet), BTreeMap<i64, i64>> = BTreeMap::new();
        for row in rows {
            let points = series.entry((row.kind, row.labels)).or_default();
            let value = points.entry(row.timestamp).or_insert(0);
            *value = value
                .checked_add(row.value)
                .ok_or(AggregationError::Overflow("summing series points"))?;
        }
        let limit = if limit == 0 { usize::MAX } else { limit };
        Ok(series
            .into_iter()
            .take(limit)
            .map(|((profile_type, labels), points)| MetricsSeries {
                profile_type,
                labels,
                samples: points
                    .into_iter()
                    .map(|(timestamp, value)| MetricsSample { timestamp, value })
                    .collect(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn diff_sides_must_agree() {
        let single = ProfileDiffSelection {
            mode: DiffSelectionMode::SingleUnspecified.into(),
            options: Some(SelectionOptions::Single(SingleProfile {
                query: "allocs".into(),
                time: Some(1),
            })),
        };
        assert!(Selection::diff_side(Some(&single), "a").is_ok());

        let mismatched = ProfileDiffSelection {
            mode: DiffSelectionMode::Merge.into(),
            ..single.clone()
        };
        let missing = ProfileDiffSelection {
            mode: DiffSelectionMode::SingleUnspecified.into(),
            options: None,
        };
        let unknown = ProfileDiffSelection {
            mode: 9,
            ..single
        };
        for side in [Some(&mismatched), Some(&missing), Some(&unknown), None] {
            let err = Selection::diff_side(side, "a").unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidInput);
        }
    }

    #[test]
    fn pprof_time() {
        let selection = Selection::merge(&MergeProfile {
            query: "allocs".into(),
            start: Some(2),
            end: Some(5),
        })
        .unwrap();
        assert_eq!(selection.pprof_time(), (2_000_000, 3_000_000));
    }
}
