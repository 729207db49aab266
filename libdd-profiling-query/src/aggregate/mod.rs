// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Folding weighted stacks into trees and flat lists.
//!
//! Folding is pure: a tree only ever holds one request's stacks. Large fold
//! sets are split into disjoint partitions folded on blocking workers, and
//! the partial trees are merged with the same node matching a diff uses.

#[cfg(test)]
pub(crate) mod test_utils;
mod top;
mod tree;

pub use top::*;
pub use tree::*;

use crate::config::QueryConfig;
use crate::error::AggregationError;
use crate::frames::WeightedStack;
use futures::future::try_join_all;

#[derive(Copy, Clone, Debug)]
pub struct FoldOptions {
    /// Sets with at least this many stacks are partitioned.
    pub parallel_threshold: usize,
    pub partitions: usize,
}

impl Default for FoldOptions {
    fn default() -> Self {
        Self::from(&QueryConfig::default())
    }
}

impl From<&QueryConfig> for FoldOptions {
    fn from(config: &QueryConfig) -> Self {
        Self {
            parallel_threshold: config.parallel_fold_threshold,
            partitions: config.fold_partitions,
        }
    }
}

/// Folds every stack on the current thread.
pub fn fold_all(stacks: &[WeightedStack], side: Side) -> Result<StackTree, AggregationError> {
    let mut tree = StackTree::new();
    for stack in stacks {
        tree.add(side, &stack.stack, stack.value)?;
    }
    Ok(tree)
}

/// Folds `stacks`, partitioning them across blocking workers once there are
/// enough of them.
pub async fn fold(
    stacks: Vec<WeightedStack>,
    side: Side,
    options: FoldOptions,
) -> Result<StackTree, AggregationError> {
    if options.partitions < 2 || stacks.len() < options.parallel_threshold.max(2) {
        return fold_all(&stacks, side);
    }

    let chunk_len = stacks.len().div_ceil(options.partitions);
    let mut rest = stacks;
    let mut workers = Vec::with_capacity(options.partitions);
    while !rest.is_empty() {
        let tail = rest.split_off(chunk_len.min(rest.len()));
        let chunk = std::mem::replace(&mut rest, tail);
        workers.push(tokio::task::spawn_blocking(move || fold_all(&chunk, side)));
    }
    let partials = try_join_all(workers)
        .await
        .map_err(|err| AggregationError::Worker(err.to_string().into()))?
        .into_iter()
        .collect::<Result<Vec<_>, _>>()?;
    merge_pairwise(partials)
}

/// Merges trees two at a time until one is left.
pub fn merge_pairwise(mut trees: Vec<StackTree>) -> Result<StackTree, AggregationError> {
    while trees.len() > 1 {
        let mut merged = Vec::with_capacity(trees.len().div_ceil(2));
        let mut pairs = trees.into_iter();
        while let Some(mut left) = pairs.next() {
            if let Some(right) = pairs.next() {
                left.merge(&right)?;
            }
            merged.push(left);
        }
        trees = merged;
    }
    Ok(trees.pop().unwrap_or_default())
}

/// Builds the diff tree of `b` against the baseline `a`: cumulative values
/// are B's, diff values are `B - A`.
pub async fn diff(
    a: Vec<WeightedStack>,
    b: Vec<WeightedStack>,
    options: FoldOptions,
) -> Result<StackTree, AggregationError> {
    let baseline = fold(a, Side::A, options).await?;
    let mut tree = fold(b, Side::B, options).await?;
    tree.merge(&baseline)?;
    Ok(tree)
}

#[cfg(test)]
mod tests {
    use super::test_utils::*;
    use super::*;
    use proptest::prelude::*;

    const NAMES: [&str; 4] = ["main", "a", "b", "c"];

    fn weighted_stacks() -> impl Strategy<Value = Vec<WeightedStack>> {
        proptest::collection::vec(
            (proptest::collection::vec(0..NAMES.len(), 0..5), -1000i64..1000),
            0..32,
        )
        .prop_map(|stacks| {
            stacks
                .into_iter()
                .map(|(frames, value)| {
                    let names: Vec<&str> = frames.into_iter().map(|i| NAMES[i]).collect();
                    weighted(&names, value)
                })
                .collect()
        })
    }

    fn block_on<T>(fut: impl std::future::Future<Output = T>) -> T {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .build()
            .unwrap()
            .block_on(fut)
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: if cfg!(miri) { 4 } else { 64 },
            .. ProptestConfig::default()
        })]

        #[test]
        fn proptest_fold_order_does_not_matter(stacks in weighted_stacks(), seed in any::<u64>()) {
            let mut shuffled = stacks.clone();
            if !shuffled.is_empty() {
                let len = shuffled.len();
                shuffled.rotate_left((seed as usize) % len);
                shuffled.reverse();
            }
            let tree = fold_all(&stacks, Side::Single).unwrap();
            let other = fold_all(&shuffled, Side::Single).unwrap();
            prop_assert_eq!(tree.paths(), other.paths());
            prop_assert_eq!(tree.height(), other.height());
        }

        #[test]
        fn proptest_partitioned_fold_matches(stacks in weighted_stacks()) {
            let options = FoldOptions { parallel_threshold: 2, partitions: 3 };
            let partitioned = block_on(fold(stacks.clone(), Side::Single, options)).unwrap();
            let single = fold_all(&stacks, Side::Single).unwrap();
            prop_assert_eq!(partitioned.paths(), single.paths());
        }

        #[test]
        fn proptest_self_diff_is_zero(stacks in weighted_stacks()) {
            let tree = block_on(diff(stacks.clone(), stacks.clone(), FoldOptions::default())).unwrap();
            let single = fold_all(&stacks, Side::Single).unwrap();
            for (path, cumulative, diff) in tree.paths() {
                prop_assert_eq!(diff, 0, "at {:?}", path);
                let expected = single
                    .paths()
                    .into_iter()
                    .find(|(p, _, _)| *p == path)
                    .map(|(_, cumulative, _)| cumulative);
                prop_assert_eq!(Some(cumulative), expected);
            }
        }

        #[test]
        fn proptest_diff_is_antisymmetric(a in weighted_stacks(), b in weighted_stacks()) {
            let ab = block_on(diff(a.clone(), b.clone(), FoldOptions::default())).unwrap();
            let ba = block_on(diff(b, a, FoldOptions::default())).unwrap();
            let ab: Vec<_> = ab.paths().into_iter().map(|(path, _, diff)| (path, -diff)).collect();
            let ba: Vec<_> = ba.paths().into_iter().map(|(path, _, diff)| (path, diff)).collect();
            prop_assert_eq!(ab, ba);
        }
    }

    #[test]
    fn merge_pairwise_of_nothing_is_empty() {
        let tree = merge_pairwise(Vec::new()).unwrap();
        assert!(tree.is_empty());
    }
}
