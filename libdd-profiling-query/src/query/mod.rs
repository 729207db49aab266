// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The query façade.
//!
//! Each request goes through validate, select, aggregate, encode, in that
//! order. Validation happens before any storage or metastore call, so an
//! invalid request never costs I/O. Metadata requests (label names and
//! values, profile types) skip aggregation and read storage directly.

mod request;
mod select;

pub use request::*;
pub use select::*;

use crate::aggregate::{self, FoldOptions, Side, StackTree};
use crate::config::QueryConfig;
use crate::context::RequestContext;
use crate::error::{AggregationError, QueryError};
use crate::frames::WeightedStack;
use crate::ingest::Ingester;
use crate::metastore::{FunctionCache, MetadataStore, MetastoreClient};
use crate::report::pprof::{self as pprof_report, EncodeOptions};
use crate::report::{Flamegraph, Top};
use crate::selector::Selector;
use crate::storage::{ProfileType, SampleKind, SampleStorage, TimeWindow};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;
use tracing::{debug, debug_span, error, warn, Instrument};

/// A validated query.
enum Plan {
    Single(Selection),
    Diff { a: Selection, b: Selection },
}

impl Plan {
    fn validate(request: &QueryRequest) -> Result<(Plan, ReportType), QueryError> {
        let report_type = ReportType::try_from(request.report_type)?;
        let mode = Mode::try_from(request.mode)?;
        let plan = match (mode, &request.options) {
            (Mode::SingleUnspecified, Some(QueryOptions::Single(profile))) => {
                Plan::Single(Selection::single(profile)?)
            }
            (Mode::Merge, Some(QueryOptions::Merge(profile))) => Plan::Single(Selection::merge(profile)?),
            (Mode::Diff, Some(QueryOptions::Diff(diff))) => Plan::Diff {
                a: Selection::diff_side(diff.a.as_ref(), "a")?,
                b: Selection::diff_side(diff.b.as_ref(), "b")?,
            },
            (mode, None) => {
                return Err(QueryError::invalid(format!("mode {mode:?} requires options")))
            }
            (mode, Some(options)) => {
                let options = match options {
                    QueryOptions::Single(_) => "single",
                    QueryOptions::Merge(_) => "merge",
                    QueryOptions::Diff(_) => "diff",
                };
                return Err(QueryError::invalid(format!(
                    "mode {mode:?} doesn't fit {options} options"
                )));
            }
        };
        Ok((plan, report_type))
    }
}

pub struct QueryService {
    config: QueryConfig,
    client: MetastoreClient,
    storage: Arc<dyn SampleStorage>,
    selector: QuerySelector,
}

impl QueryService {
    pub fn new(
        config: QueryConfig,
        metastore: Arc<dyn MetadataStore>,
        storage: Arc<dyn SampleStorage>,
    ) -> Self {
        let functions = Arc::new(FunctionCache::new(config.function_cache_capacity));
        Self {
            client: MetastoreClient::new(metastore, functions),
            selector: QuerySelector::new(storage.clone()),
            storage,
            config,
        }
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    /// An ingester writing to the same collaborators and sharing the
    /// function cache.
    pub fn ingester(&self) -> Ingester {
        Ingester::new(self.client.clone(), self.storage.clone())
    }

    /// A context for one request, bounded by the configured timeout.
    pub fn context(&self, cancel: CancellationToken) -> RequestContext {
        RequestContext::new(cancel, self.config.request_timeout)
    }

    async fn traced<T, F>(
        &self,
        ctx: &RequestContext,
        operation: &'static str,
        fut: F,
    ) -> Result<T, QueryError>
    where
        F: Future<Output = Result<T, QueryError>>,
    {
        let span = debug_span!("profiling_query", operation, request_id = %ctx.request_id());
        let result = fut.instrument(span).await;
        if let Err(err) = &result {
            match err {
                QueryError::Aggregation(source) => error!(
                    request_id = %ctx.request_id(),
                    operation,
                    error = %source,
                    "aggregation failed"
                ),
                QueryError::Unavailable { .. } => {
                    warn!(request_id = %ctx.request_id(), operation, error = %err, "dependency unavailable")
                }
                QueryError::InvalidInput(_) | QueryError::Cancelled => {
                    debug!(request_id = %ctx.request_id(), operation, error = %err, "request rejected")
                }
            }
        }
        result
    }

    pub async fn query(
        &self,
        request: QueryRequest,
        cancel: CancellationToken,
    ) -> Result<QueryResponse, QueryError> {
        let ctx = self.context(cancel);
        self.traced(&ctx, "query", self.run_query(&ctx, request)).await
    }

    async fn run_query(
        &self,
        ctx: &RequestContext,
        request: QueryRequest,
    ) -> Result<QueryResponse, QueryError> {
        let (plan, report_type) = Plan::validate(&request)?;
        let options = FoldOptions::from(&self.config);
        match plan {
            Plan::Single(selection) => {
                let selected = self.selector.select(ctx, &selection).await?;
                let kind = selected.kind.clone().unwrap_or_default();
                let stacks = self.weighted(ctx, &[&selected]).await?.pop().unwrap_or_default();
                debug!(stacks = stacks.len(), "selected");
                let response = match report_type {
                    ReportType::Pprof => {
                        let (time_nanos, duration_nanos) = selection.pprof_time();
                        let options = self.encode_options(time_nanos, duration_nanos);
                        QueryResponse::Pprof(pprof_report::encode_single(&stacks, &kind, &options)?)
                    }
                    ReportType::FlamegraphUnspecified | ReportType::Top => {
                        let tree = aggregate::fold(stacks, Side::Single, options).await?;
                        self.encode_tree(&tree, &kind, report_type)?
                    }
                };
                Self::check_cancelled(ctx)?;
                Ok(response)
            }
            Plan::Diff { a, b } => {
                let selected_a = self.selector.select(ctx, &a).await?;
                let selected_b = self.selector.select(ctx, &b).await?;
                if let (Some(kind_a), Some(kind_b)) = (&selected_a.kind, &selected_b.kind) {
                    if kind_a != kind_b {
                        return Err(QueryError::invalid(format!(
                            "diff sides select different profile types: {}:{} and {}:{}",
                            kind_a.sample_type,
                            kind_a.sample_unit,
                            kind_b.sample_type,
                            kind_b.sample_unit,
                        )));
                    }
                }
                let kind = selected_b
                    .kind
                    .clone()
                    .or_else(|| selected_a.kind.clone())
                    .unwrap_or_default();
                let mut stacks = self.weighted(ctx, &[&selected_a, &selected_b]).await?;
                let stacks_b = stacks.pop().unwrap_or_default();
                let stacks_a = stacks.pop().unwrap_or_default();
                debug!(a = stacks_a.len(), b = stacks_b.len(), "selected");
                let response = match report_type {
                    ReportType::Pprof => {
                        let (time_nanos, duration_nanos) = b.pprof_time();
                        let options = self.encode_options(time_nanos, duration_nanos);
                        QueryResponse::Pprof(pprof_report::encode_diff(
                            &stacks_a, &stacks_b, &kind, &options,
                        )?)
                    }
                    ReportType::FlamegraphUnspecified | ReportType::Top => {
                        let tree = aggregate::diff(stacks_a, stacks_b, options).await?;
                        self.encode_tree(&tree, &kind, report_type)?
                    }
                };
                Self::check_cancelled(ctx)?;
                Ok(response)
            }
        }
    }

    /// Aggregation runs outside the collaborators' cancellation points, so a
    /// request cancelled meanwhile is only noticed here, and its result
    /// discarded.
    fn check_cancelled(ctx: &RequestContext) -> Result<(), QueryError> {
        if ctx.is_cancelled() {
            return Err(QueryError::Cancelled);
        }
        Ok(())
    }

    fn encode_options(&self, time_nanos: i64, duration_nanos: i64) -> EncodeOptions {
        EncodeOptions {
            compress: self.config.compress_pprof,
            time_nanos,
            duration_nanos,
        }
    }

    fn encode_tree(
        &self,
        tree: &StackTree,
        kind: &SampleKind,
        report_type: ReportType,
    ) -> Result<QueryResponse, QueryError> {
        Ok(match report_type {
            ReportType::Top => QueryResponse::Top(Top::new(tree, &kind.sample_unit, self.config.top_max_rows)?),
            ReportType::FlamegraphUnspecified | ReportType::Pprof => {
                QueryResponse::Flamegraph(Flamegraph::new(tree, &kind.sample_unit))
            }
        })
    }

    /// Resolves the stacks of every selection with one round of metastore
    /// calls, returning the weighted stacks of each selection in order.
    async fn weighted(
        &self,
        ctx: &RequestContext,
        selections: &[&Selected],
    ) -> Result<Vec<Vec<WeightedStack>>, QueryError> {
        let ids: Vec<_> = selections
            .iter()
            .flat_map(|selected| selected.values.keys().copied())
            .collect();
        let resolved = self.client.resolve_stacktraces(ctx, &ids).await?;
        let mut weighted = Vec::with_capacity(selections.len());
        for selected in selections {
            let mut stacks = Vec::with_capacity(selected.values.len());
            for (id, value) in &selected.values {
                let stack = resolved
                    .get(id)
                    .cloned()
                    .ok_or(AggregationError::MissingStacktrace(*id))?;
                stacks.push(WeightedStack {
                    stack,
                    value: *value,
                });
            }
            weighted.push(stacks);
        }
        Ok(weighted)
    }

    pub async fn query_range(
        &self,
        request: QueryRangeRequest,
        cancel: CancellationToken,
    ) -> Result<Vec<MetricsSeries>, QueryError> {
        let ctx = self.context(cancel);
        self.traced(&ctx, "query_range", self.run_query_range(&ctx, request))
            .await
    }

    async fn run_query_range(
        &self,
        ctx: &RequestContext,
        request: QueryRangeRequest,
    ) -> Result<Vec<MetricsSeries>, QueryError> {
        let selector = Selector::parse(&request.query)?;
        let window = TimeWindow::required(request.start, request.end)?;
        let limit = usize::try_from(request.limit).unwrap_or(usize::MAX);
        self.selector.series(ctx, selector, window, limit).await
    }

    pub async fn labels(
        &self,
        request: LabelsRequest,
        cancel: CancellationToken,
    ) -> Result<Vec<String>, QueryError> {
        let ctx = self.context(cancel);
        self.traced(&ctx, "labels", self.run_labels(&ctx, request))
            .await
    }

    async fn run_labels(
        &self,
        ctx: &RequestContext,
        request: LabelsRequest,
    ) -> Result<Vec<String>, QueryError> {
        let window = self.metadata_window(request.start, request.end)?;
        let selectors = parse_matchers(&request.matchers)?;
        let operation = "storage.distinct_label_names";
        let mut names = BTreeSet::new();
        for selector in optional(&selectors) {
            let found = ctx
                .run(operation, async {
                    self.storage
                        .distinct_label_names(window, selector)
                        .await
                        .map_err(QueryError::unavailable(operation))
                })
                .await?;
            names.extend(found);
        }
        Ok(names.into_iter().collect())
    }

    pub async fn values(
        &self,
        request: ValuesRequest,
        cancel: CancellationToken,
    ) -> Result<Vec<String>, QueryError> {
        let ctx = self.context(cancel);
        self.traced(&ctx, "values", self.run_values(&ctx, request))
            .await
    }

    async fn run_values(
        &self,
        ctx: &RequestContext,
        request: ValuesRequest,
    ) -> Result<Vec<String>, QueryError> {
        if request.label_name.is_empty() {
            return Err(QueryError::invalid("label name is required"));
        }
        let window = self.metadata_window(request.start, request.end)?;
        let selectors = parse_matchers(&request.matchers)?;
        let operation = "storage.distinct_label_values";
        let mut values = BTreeSet::new();
        for selector in optional(&selectors) {
            let found = ctx
                .run(operation, async {
                    self.storage
                        .distinct_label_values(&request.label_name, window, selector)
                        .await
                        .map_err(QueryError::unavailable(operation))
                })
                .await?;
            values.extend(found);
        }
        Ok(values.into_iter().collect())
    }

    /// The profile types seen in the configured recent window.
    pub async fn profile_types(
        &self,
        cancel: CancellationToken,
    ) -> Result<Vec<ProfileType>, QueryError> {
        let ctx = self.context(cancel);
        self.traced(&ctx, "profile_types", self.run_profile_types(&ctx))
            .await
    }

    async fn run_profile_types(&self, ctx: &RequestContext) -> Result<Vec<ProfileType>, QueryError> {
        let window = self.metadata_window(None, None)?;
        let operation = "storage.distinct_sample_kinds";
        let kinds = ctx
            .run(operation, async {
                self.storage
                    .distinct_sample_kinds(window)
                    .await
                    .map_err(QueryError::unavailable(operation))
            })
            .await?;
        let kinds: BTreeSet<ProfileType> = kinds.into_iter().collect();
        Ok(kinds.into_iter().collect())
    }

    fn metadata_window(&self, start: Option<i64>, end: Option<i64>) -> Result<TimeWindow, QueryError> {
        match (start, end) {
            (None, None) => {
                let now = now_millis();
                let window = i64::try_from(self.config.metadata_window.as_millis()).unwrap_or(i64::MAX);
                TimeWindow::new(now.saturating_sub(window), now.saturating_add(1))
            }
            (start, end) => TimeWindow::required(start, end),
        }
    }
}

fn parse_matchers(matchers: &[String]) -> Result<Vec<Selector>, QueryError> {
    matchers.iter().map(|matcher| Selector::parse(matcher)).collect()
}

/// Every selector, or a single `None` standing for "all rows" when there are
/// none.
fn optional(selectors: &[Selector]) -> Vec<Option<&Selector>> {
    if selectors.is_empty() {
        return vec![None];
    }
    selectors.iter().map(Some).collect()
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|since| i64::try_from(since.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}
