// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Turns profiles into sample rows.

mod profile_index;

pub use profile_index::ProfileIndex;

use crate::collections::identifiable::{FxIndexMap, FxIndexSet};
use crate::context::RequestContext;
use crate::error::{AggregationError, QueryError};
use crate::labels::{LabelSet, METRIC_NAME_LABEL};
use crate::metastore::{
    FunctionId, LineRecord, LocationId, LocationRecord, MappingId, MetastoreClient, StacktraceId,
};
use crate::pprof;
use crate::storage::{SampleKind, SampleRow, SampleStorage};
use rustc_hash::FxHashMap;
use std::hash::Hash;
use std::sync::Arc;
use tracing::debug;

const NANOS_PER_MILLI: i64 = 1_000_000;

pub struct Ingester {
    client: MetastoreClient,
    storage: Arc<dyn SampleStorage>,
}

impl Ingester {
    pub fn new(client: MetastoreClient, storage: Arc<dyn SampleStorage>) -> Self {
        Self { client, storage }
    }

    /// Normalizes `profile` into rows and appends them to storage, returning
    /// the number of rows written.
    ///
    /// `labels` must carry `__name__`, which names the profile. String labels
    /// of individual samples extend the series labels for that sample; the
    /// series labels win on conflict. Rows are stamped with `timestamp` when
    /// given and with the profile's own time otherwise. Nothing is written
    /// unless every record resolves; a failure fails the whole call.
    pub async fn ingest(
        &self,
        ctx: &RequestContext,
        labels: &LabelSet,
        profile: &pprof::Profile,
        is_delta: bool,
        timestamp: Option<i64>,
    ) -> Result<usize, QueryError> {
        let (name, series) = labels.take(METRIC_NAME_LABEL);
        let name = name
            .filter(|name| !name.is_empty())
            .ok_or_else(|| QueryError::invalid("labels must include __name__"))?;
        if profile.samples.is_empty() {
            debug!(request_id = %ctx.request_id(), profile = %name, "profile has no samples");
            return Ok(0);
        }

        let index = ProfileIndex::new(profile)?;
        let kinds = index.sample_kinds(&name, is_delta)?;
        if let Some(sample) = profile
            .samples
            .iter()
            .find(|sample| sample.values.len() != kinds.len())
        {
            return Err(QueryError::invalid(format!(
                "sample has {} values for {} sample types",
                sample.values.len(),
                kinds.len()
            )));
        }

        let stacks: FxIndexSet<&[u64]> = profile
            .samples
            .iter()
            .map(|sample| sample.location_ids.as_slice())
            .collect();
        let pprof_locations: FxIndexSet<u64> = stacks.iter().flat_map(|stack| stack.iter().copied()).collect();
        let locations = pprof_locations
            .iter()
            .map(|id| index.get_location(*id))
            .collect::<Result<Vec<_>, _>>()?;

        let pprof_mappings: FxIndexSet<u64> = locations
            .iter()
            .map(|location| location.mapping_id)
            .filter(|id| *id != 0)
            .collect();
        let mapping_records = pprof_mappings
            .iter()
            .map(|id| index.get_mapping(*id))
            .collect::<Result<Vec<_>, _>>()?;
        let mapping_ids = self
            .client
            .resolve_or_create_mappings(ctx, mapping_records)
            .await?;
        let mappings: FxHashMap<u64, MappingId> = pprof_mappings.into_iter().zip(mapping_ids).collect();

        let pprof_functions: FxIndexSet<u64> = locations
            .iter()
            .flat_map(|location| location.lines.iter().map(|line| line.function_id))
            .collect();
        let function_records = pprof_functions
            .iter()
            .map(|id| index.get_function(*id))
            .collect::<Result<Vec<_>, _>>()?;
        let function_ids = self
            .client
            .resolve_or_create_functions(ctx, function_records)
            .await?;
        let functions: FxHashMap<u64, FunctionId> =
            pprof_functions.into_iter().zip(function_ids).collect();

        let location_records = locations
            .iter()
            .map(|location| {
                let mapping_id = match location.mapping_id {
                    0 => None,
                    id => Some(lookup(&mappings, id, "mapping")?),
                };
                let lines = location
                    .lines
                    .iter()
                    .map(|line| {
                        Ok(LineRecord {
                            function_id: lookup(&functions, line.function_id, "function")?,
                            line: line.line,
                        })
                    })
                    .collect::<Result<Vec<_>, QueryError>>()?;
                Ok(LocationRecord {
                    address: location.address,
                    mapping_id,
                    lines,
                })
            })
            .collect::<Result<Vec<_>, QueryError>>()?;
        let location_ids = self
            .client
            .resolve_or_create_locations(ctx, location_records)
            .await?;
        let location_map: FxHashMap<u64, LocationId> =
            pprof_locations.into_iter().zip(location_ids).collect();

        let stack_records = stacks
            .iter()
            .map(|stack| {
                stack
                    .iter()
                    .map(|id| lookup(&location_map, *id, "location"))
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<Vec<_>, _>>()?;
        let stack_ids: FxHashMap<&[u64], StacktraceId> = stacks
            .iter()
            .copied()
            .zip(self.client.resolve_or_create_stacktraces(ctx, stack_records).await?)
            .collect();

        let timestamp = timestamp.unwrap_or(profile.time_nanos / NANOS_PER_MILLI);
        let mut rows = Vec::with_capacity(profile.samples.len() * kinds.len());
        for sample in &profile.samples {
            let stacktrace = lookup(&stack_ids, sample.location_ids.as_slice(), "stacktrace")?;
            let labels = if sample.labels.is_empty() {
                series.clone()
            } else {
                series.with_defaults(index.sample_labels(sample)?)
            };
            for (kind, value) in kinds.iter().zip(&sample.values) {
                rows.push(SampleRow {
                    labels: labels.clone(),
                    stacktrace,
                    kind: kind.clone(),
                    timestamp,
                    value: *value,
                });
            }
        }

        let written = self.append(ctx, rows).await?;
        debug!(
            request_id = %ctx.request_id(),
            profile = %name,
            stacks = stacks.len(),
            rows = written,
            "ingested profile"
        );
        Ok(written)
    }

    /// Appends rows that were normalized elsewhere; their stacktrace ids must
    /// already be resolved. Returns the number of rows written.
    pub async fn ingest_samples(
        &self,
        ctx: &RequestContext,
        rows: Vec<SampleRow>,
    ) -> Result<usize, QueryError> {
        if let Some(row) = rows.iter().find(|row| {
            row.kind.name.is_empty() || row.labels.get(METRIC_NAME_LABEL).is_some()
        }) {
            return Err(QueryError::invalid(format!(
                "row for stacktrace {} must name its profile in its kind, not in its labels",
                row.stacktrace
            )));
        }
        self.append(ctx, rows).await
    }

    /// Sums rows that only differ by value, then writes them in one call.
    async fn append(&self, ctx: &RequestContext, rows: Vec<SampleRow>) -> Result<usize, QueryError> {
        let mut merged: FxIndexMap<(LabelSet, StacktraceId, SampleKind, i64), i64> =
            FxIndexMap::default();
        for row in rows {
            let value = merged
                .entry((row.labels, row.stacktrace, row.kind, row.timestamp))
                .or_insert(0);
            *value = value
                .checked_add(row.value)
                .ok_or(AggregationError::Overflow("summing duplicate rows"))?;
        }
        if merged.is_empty() {
            return Ok(0);
        }
        let rows: Vec<SampleRow> = merged
            .into_iter()
            .map(|((labels, stacktrace, kind, timestamp), value)| SampleRow {
                labels,
                stacktrace,
                kind,
                timestamp,
                value,
            })
            .collect();
        let written = rows.len();
        let operation = "storage.append_rows";
        ctx.run(operation, async {
            self.storage
                .append_rows(rows)
                .await
                .map_err(QueryError::unavailable(operation))
        })
        .await?;
        Ok(written)
    }
}

fn lookup<K: Hash + Eq, V: Copy>(
    map: &FxHashMap<K, V>,
    key: K,
    what: &'static str,
) -> Result<V, QueryError> {
    map.get(&key)
        .copied()
        .ok_or_else(|| QueryError::invalid(format!("unresolved pprof {what}")))
}
