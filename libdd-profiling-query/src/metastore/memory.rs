// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::*;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

const SHARDS: usize = 16;

type Shard = RwLock<FxHashMap<(RecordKind, ContentId), MetaRecord>>;

/// A [MetadataStore] held in process memory, sharded by id.
///
/// Create-if-absent takes the shard's read lock first and only upgrades to
/// the write lock when the id is missing, re-checking under it so a losing
/// racer returns the winner's record instead of overwriting it.
#[derive(Debug)]
pub struct InMemoryMetastore {
    shards: Box<[Shard]>,
    unavailable: AtomicBool,
    calls: AtomicUsize,
}

impl Default for InMemoryMetastore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMetastore {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARDS).map(|_| RwLock::default()).collect(),
            unavailable: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    #[inline]
    fn shard(&self, id: &ContentId) -> &Shard {
        // Ids are digests, so any byte spreads evenly.
        &self.shards[id.as_bytes()[0] as usize & (SHARDS - 1)]
    }

    /// Makes every following call fail as unavailable, or recover.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of calls served (or refused) so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of records held.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn begin_call(&self) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("metastore is unavailable"));
        }
        Ok(())
    }

    fn insert(&self, id: ContentId, record: MetaRecord) -> ContentId {
        let key = (record.kind(), id);
        let lock = self.shard(&id);

        let read_len = {
            let guard = lock.read();
            if guard.contains_key(&key) {
                return id;
            }
            guard.len()
        };

        let mut guard = lock.write();
        if guard.len() != read_len && guard.contains_key(&key) {
            return id;
        }
        guard.insert(key, record);
        id
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetastore {
    async fn get_many(
        &self,
        kind: RecordKind,
        ids: &[ContentId],
    ) -> Result<Vec<Option<MetaRecord>>, StoreError> {
        self.begin_call()?;
        Ok(ids
            .iter()
            .map(|id| self.shard(id).read().get(&(kind, *id)).cloned())
            .collect())
    }

    async fn resolve_or_create_many(
        &self,
        records: Vec<(ContentId, MetaRecord)>,
    ) -> Result<Vec<ContentId>, StoreError> {
        self.begin_call()?;
        Ok(records
            .into_iter()
            .map(|(id, record)| self.insert(id, record))
            .collect())
    }
}
