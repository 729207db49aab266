// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::*;
use crate::collections::identifiable::FxIndexMap;
use crate::context::RequestContext;
use crate::error::{AggregationError, QueryError};
use crate::frames::{Frame, FrameLine, FrameMapping, ResolvedStack};
use lru::LruCache;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Bounded cache of resolved functions, shared by the clients it is handed
/// to. Functions never change once created, so entries never go stale.
#[derive(Debug)]
pub struct FunctionCache {
    // None when the capacity is zero, which disables caching.
    entries: Option<Mutex<LruCache<FunctionId, Arc<Function>>>>,
}

impl FunctionCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: NonZeroUsize::new(capacity).map(|capacity| Mutex::new(LruCache::new(capacity))),
        }
    }

    pub fn get(&self, id: &FunctionId) -> Option<Arc<Function>> {
        self.entries.as_ref()?.lock().get(id).cloned()
    }

    pub fn put(&self, id: FunctionId, function: Arc<Function>) {
        if let Some(entries) = &self.entries {
            entries.lock().put(id, function);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.as_ref().map_or(0, |entries| entries.lock().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Resolves records to ids on the write path, and ids back to frames on the
/// read path. Every store call runs under the request's context, so it is
/// abandoned on cancellation or once the deadline passes.
#[derive(Clone)]
pub struct MetastoreClient {
    store: Arc<dyn MetadataStore>,
    functions: Arc<FunctionCache>,
}

impl MetastoreClient {
    pub fn new(store: Arc<dyn MetadataStore>, functions: Arc<FunctionCache>) -> Self {
        Self { store, functions }
    }

    pub fn function_cache(&self) -> &Arc<FunctionCache> {
        &self.functions
    }

    /// Sends each distinct record once and maps the returned ids back onto
    /// the input order.
    async fn resolve_or_create(
        &self,
        ctx: &RequestContext,
        operation: &'static str,
        records: Vec<MetaRecord>,
    ) -> Result<Vec<ContentId>, QueryError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let order: Vec<ContentId> = records.iter().map(MetaRecord::content_id).collect();
        let mut distinct = FxIndexMap::default();
        for (id, record) in order.iter().zip(records) {
            distinct.entry(*id).or_insert(record);
        }
        let keys: Vec<ContentId> = distinct.keys().copied().collect();
        let created = ctx
            .run(operation, async {
                self.store
                    .resolve_or_create_many(distinct.into_iter().collect())
                    .await
                    .map_err(QueryError::unavailable(operation))
            })
            .await?;
        if created.len() != keys.len() {
            return Err(QueryError::unavailable(operation)(StoreError::unavailable(
                format!("store returned {} ids for {} records", created.len(), keys.len()),
            )));
        }
        // The store's id is authoritative, even for a key it already held.
        let resolved: FxHashMap<ContentId, ContentId> = keys.into_iter().zip(created).collect();
        Ok(order
            .iter()
            .map(|key| resolved.get(key).copied().unwrap_or(*key))
            .collect())
    }

    pub async fn resolve_or_create_mappings(
        &self,
        ctx: &RequestContext,
        mappings: Vec<Mapping>,
    ) -> Result<Vec<MappingId>, QueryError> {
        let records = mappings.into_iter().map(MetaRecord::Mapping).collect();
        let ids = self
            .resolve_or_create(ctx, "metastore.create_mappings", records)
            .await?;
        Ok(ids.into_iter().map(MappingId).collect())
    }

    pub async fn resolve_or_create_functions(
        &self,
        ctx: &RequestContext,
        functions: Vec<Function>,
    ) -> Result<Vec<FunctionId>, QueryError> {
        let records = functions.into_iter().map(MetaRecord::Function).collect();
        let ids = self
            .resolve_or_create(ctx, "metastore.create_functions", records)
            .await?;
        Ok(ids.into_iter().map(FunctionId).collect())
    }

    pub async fn resolve_or_create_locations(
        &self,
        ctx: &RequestContext,
        locations: Vec<LocationRecord>,
    ) -> Result<Vec<LocationId>, QueryError> {
        let records = locations.into_iter().map(MetaRecord::Location).collect();
        let ids = self
            .resolve_or_create(ctx, "metastore.create_locations", records)
            .await?;
        Ok(ids.into_iter().map(LocationId).collect())
    }

    /// Each stacktrace is given as its location ids, leaf first.
    pub async fn resolve_or_create_stacktraces(
        &self,
        ctx: &RequestContext,
        stacktraces: Vec<Vec<LocationId>>,
    ) -> Result<Vec<StacktraceId>, QueryError> {
        let records = stacktraces
            .into_iter()
            .map(|location_ids| MetaRecord::Stacktrace(StacktraceRecord { location_ids }))
            .collect();
        let ids = self
            .resolve_or_create(ctx, "metastore.create_stacktraces", records)
            .await?;
        Ok(ids.into_iter().map(StacktraceId).collect())
    }

    async fn get_many(
        &self,
        ctx: &RequestContext,
        operation: &'static str,
        kind: RecordKind,
        ids: &[ContentId],
    ) -> Result<Vec<Option<MetaRecord>>, QueryError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let records = ctx
            .run(operation, async {
                self.store
                    .get_many(kind, ids)
                    .await
                    .map_err(QueryError::unavailable(operation))
            })
            .await?;
        if records.len() != ids.len() {
            return Err(QueryError::unavailable(operation)(StoreError::unavailable(
                format!("store returned {} records for {} ids", records.len(), ids.len()),
            )));
        }
        Ok(records)
    }

    /// Resolves stacktraces down to their frames. Ids may repeat; each is
    /// looked up once. A reference to a record the store doesn't hold is an
    /// aggregation fault.
    pub async fn resolve_stacktraces(
        &self,
        ctx: &RequestContext,
        ids: &[StacktraceId],
    ) -> Result<FxHashMap<StacktraceId, ResolvedStack>, QueryError> {
        let mut stack_ids: Vec<ContentId> = ids.iter().map(|id| id.0).collect();
        stack_ids.sort_unstable();
        stack_ids.dedup();

        let records = self
            .get_many(ctx, "metastore.get_stacktraces", RecordKind::Stacktrace, &stack_ids)
            .await?;
        let mut stacks = Vec::with_capacity(stack_ids.len());
        for (id, record) in stack_ids.iter().zip(records) {
            match record {
                Some(MetaRecord::Stacktrace(record)) => stacks.push((StacktraceId(*id), record)),
                _ => return Err(AggregationError::MissingStacktrace(StacktraceId(*id)).into()),
            }
        }

        let mut location_ids: Vec<ContentId> = stacks
            .iter()
            .flat_map(|(_, record)| record.location_ids.iter().map(|id| id.0))
            .collect();
        location_ids.sort_unstable();
        location_ids.dedup();
        let records = self
            .get_many(ctx, "metastore.get_locations", RecordKind::Location, &location_ids)
            .await?;
        let mut locations = FxHashMap::default();
        for (id, record) in location_ids.iter().zip(records) {
            match record {
                Some(MetaRecord::Location(record)) => {
                    locations.insert(LocationId(*id), record);
                }
                _ => return Err(AggregationError::MissingLocation(LocationId(*id)).into()),
            }
        }

        let mappings = self.resolve_mappings(ctx, locations.values()).await?;
        let functions = self.resolve_functions(ctx, locations.values()).await?;

        let mut frames: FxHashMap<LocationId, Arc<Frame>> = FxHashMap::default();
        for (id, location) in &locations {
            let mapping = match location.mapping_id {
                Some(mapping_id) => Some(FrameMapping {
                    id: mapping_id,
                    mapping: mappings
                        .get(&mapping_id)
                        .cloned()
                        .ok_or(AggregationError::MissingMapping(mapping_id))?,
                }),
                None => None,
            };
            let lines = location
                .lines
                .iter()
                .map(|line| {
                    let function = functions
                        .get(&line.function_id)
                        .cloned()
                        .ok_or(AggregationError::MissingFunction(line.function_id))?;
                    Ok(FrameLine {
                        function_id: line.function_id,
                        function,
                        line: line.line,
                    })
                })
                .collect::<Result<Vec<_>, AggregationError>>()?;
            let frame = Frame {
                location_id: *id,
                address: location.address,
                mapping,
                lines,
            };
            frames.insert(*id, Arc::new(frame));
        }

        let mut resolved = FxHashMap::default();
        for (id, record) in stacks {
            let frames = record
                .location_ids
                .iter()
                .map(|location_id| {
                    frames
                        .get(location_id)
                        .cloned()
                        .ok_or(AggregationError::MissingLocation(*location_id))
                })
                .collect::<Result<Arc<[_]>, _>>()?;
            resolved.insert(id, ResolvedStack { id, frames });
        }
        Ok(resolved)
    }

    async fn resolve_mappings<'a>(
        &self,
        ctx: &RequestContext,
        locations: impl Iterator<Item = &'a LocationRecord>,
    ) -> Result<FxHashMap<MappingId, Arc<Mapping>>, QueryError> {
        let mut ids: Vec<ContentId> = locations
            .filter_map(|location| location.mapping_id.map(ContentId::from))
            .collect();
        ids.sort_unstable();
        ids.dedup();
        let records = self
            .get_many(ctx, "metastore.get_mappings", RecordKind::Mapping, &ids)
            .await?;
        let mut mappings = FxHashMap::default();
        for (id, record) in ids.iter().zip(records) {
            match record {
                Some(MetaRecord::Mapping(mapping)) => {
                    mappings.insert(MappingId(*id), Arc::new(mapping));
                }
                _ => return Err(AggregationError::MissingMapping(MappingId(*id)).into()),
            }
        }
        Ok(mappings)
    }

    /// Functions are served from the cache when possible; only the misses
    /// go to the store.
    async fn resolve_functions<'a>(
        &self,
        ctx: &RequestContext,
        locations: impl Iterator<Item = &'a LocationRecord>,
    ) -> Result<FxHashMap<FunctionId, Arc<Function>>, QueryError> {
        let mut functions = FxHashMap::default();
        let mut misses = Vec::new();
        for line in locations.flat_map(|location| location.lines.iter()) {
            let id = line.function_id;
            if functions.contains_key(&id) {
                continue;
            }
            match self.functions.get(&id) {
                Some(function) => {
                    functions.insert(id, function);
                }
                None => misses.push(id.0),
            }
        }
        misses.sort_unstable();
        misses.dedup();

        let records = self
            .get_many(ctx, "metastore.get_functions", RecordKind::Function, &misses)
            .await?;
        for (id, record) in misses.iter().zip(records) {
            match record {
                Some(MetaRecord::Function(function)) => {
                    let function = Arc::new(function);
                    self.functions.put(FunctionId(*id), function.clone());
                    functions.insert(FunctionId(*id), function);
                }
                _ => return Err(AggregationError::MissingFunction(FunctionId(*id)).into()),
            }
        }
        Ok(functions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn client(store: Arc<InMemoryMetastore>) -> MetastoreClient {
        MetastoreClient::new(store, Arc::new(FunctionCache::new(16)))
    }

    async fn create_stack(client: &MetastoreClient, ctx: &RequestContext, names: &[&str]) -> StacktraceId {
        let functions = names
            .iter()
            .map(|name| Function {
                name: name.to_string(),
                ..Default::default()
            })
            .collect();
        let function_ids = client.resolve_or_create_functions(ctx, functions).await.unwrap();
        let locations = function_ids
            .iter()
            .enumerate()
            .map(|(address, function_id)| LocationRecord {
                address: address as u64 + 1,
                mapping_id: None,
                lines: vec![LineRecord {
                    function_id: *function_id,
                    line: 0,
                }],
            })
            .collect();
        let location_ids = client.resolve_or_create_locations(ctx, locations).await.unwrap();
        client
            .resolve_or_create_stacktraces(ctx, vec![location_ids])
            .await
            .unwrap()[0]
    }

    #[tokio::test]
    async fn create_then_resolve() {
        let store = Arc::new(InMemoryMetastore::new());
        let client = client(store.clone());
        let ctx = RequestContext::background();

        let id = create_stack(&client, &ctx, &["leaf", "main"]).await;
        assert_eq!(id, create_stack(&client, &ctx, &["leaf", "main"]).await);

        let resolved = client.resolve_stacktraces(&ctx, &[id, id]).await.unwrap();
        assert_eq!(resolved.len(), 1);
        let names: Vec<_> = resolved[&id].frames.iter().map(|frame| frame.name()).collect();
        assert_eq!(names, ["leaf", "main"]);
        assert_eq!(client.function_cache().len(), 2);
    }

    #[tokio::test]
    async fn duplicates_in_a_batch_are_sent_once() {
        let store = Arc::new(InMemoryMetastore::new());
        let client = client(store.clone());
        let ctx = RequestContext::background();

        let function = Function {
            name: "main".into(),
            ..Default::default()
        };
        let ids = client
            .resolve_or_create_functions(&ctx, vec![function.clone(), function.clone()])
            .await
            .unwrap();
        assert_eq!(ids, vec![function_key(&function); 2]);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn missing_stacktrace_is_an_aggregation_fault() {
        let client = client(Arc::new(InMemoryMetastore::new()));
        let ctx = RequestContext::background();
        let err = client
            .resolve_stacktraces(&ctx, &[stacktrace_key(&[])])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Aggregation);
    }

    #[tokio::test]
    async fn store_failures_are_unavailable() {
        let store = Arc::new(InMemoryMetastore::new());
        store.set_unavailable(true);
        let client = client(store);
        let err = client
            .resolve_or_create_stacktraces(&RequestContext::background(), vec![vec![]])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
        assert!(err.to_string().starts_with("metastore.create_stacktraces"));
    }

    #[test]
    fn zero_capacity_disables_the_cache() {
        let cache = FunctionCache::new(0);
        let function = Arc::new(Function::default());
        cache.put(function_key(&function), function.clone());
        assert!(cache.is_empty());
        assert!(cache.get(&function_key(&function)).is_none());
    }
}
