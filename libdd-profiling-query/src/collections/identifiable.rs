// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::error::AggregationError;
use std::hash::{BuildHasherDefault, Hash};
use std::num::NonZeroU32;

pub type FxIndexMap<K, V> = indexmap::IndexMap<K, V, BuildHasherDefault<rustc_hash::FxHasher>>;
pub type FxIndexSet<K> = indexmap::IndexSet<K, BuildHasherDefault<rustc_hash::FxHasher>>;

/// Creates a non-zero, 32-bit unsigned id from the offset. It's guaranteed to
/// be the offset + 1, with guards to not overflow the size of u32.
///
/// This is useful because many pprof collections do not allow an item with an
/// id of zero, even if it's the first item in the collection.
#[inline]
pub fn small_non_zero_pprof_id(offset: usize) -> Option<NonZeroU32> {
    let small: u32 = offset.try_into().ok()?;
    NonZeroU32::new(small.checked_add(1)?)
}

/// Assigns pprof ids to items in insertion order, returning the same id for
/// equal items.
pub trait Dedup<T> {
    /// Deduplicate the item and return its pprof id (offset + 1).
    fn dedup(&mut self, item: T) -> Result<u64, AggregationError>;
}

impl<T: Hash + Eq> Dedup<T> for FxIndexSet<T> {
    fn dedup(&mut self, item: T) -> Result<u64, AggregationError> {
        let (offset, _) = self.insert_full(item);
        small_non_zero_pprof_id(offset)
            .map(|id| u64::from(id.get()))
            .ok_or_else(|| {
                AggregationError::invalid_target(format!("pprof id overflow at offset {offset}"))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_non_zero_pprof_id() {
        assert_eq!(NonZeroU32::new(1), small_non_zero_pprof_id(0));
        assert_eq!(NonZeroU32::new(2), small_non_zero_pprof_id(1));
        assert_eq!(
            NonZeroU32::new(u32::MAX),
            small_non_zero_pprof_id((u32::MAX - 1) as usize)
        );

        assert_eq!(None, small_non_zero_pprof_id(u32::MAX as usize));
        assert_eq!(None, small_non_zero_pprof_id(usize::MAX));
    }

    #[test]
    fn dedup_is_stable() {
        let mut set = FxIndexSet::default();
        assert_eq!(set.dedup("a").unwrap(), 1);
        assert_eq!(set.dedup("b").unwrap(), 2);
        assert_eq!(set.dedup("a").unwrap(), 1);
        assert_eq!(set.len(), 2);
    }
}
