// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::StackTree;
use crate::collections::identifiable::FxIndexMap;
use crate::error::AggregationError;
use crate::frames::{Frame, FrameKey};
use std::cmp::Reverse;
use std::sync::Arc;

/// One frame's values summed over every node of the tree it appears in.
#[derive(Clone, Debug)]
pub struct TopEntry {
    pub key: FrameKey,
    pub frame: Arc<Frame>,
    pub flat: i64,
    pub cumulative: i64,
    pub diff: i64,
}

fn checked_add(a: i64, b: i64, what: &'static str) -> Result<i64, AggregationError> {
    a.checked_add(b).ok_or(AggregationError::Overflow(what))
}

/// Flattens the tree into one entry per frame key, regardless of depth. A
/// frame recursing into itself counts once per level it appears at. Entries
/// are ordered by descending cumulative value, ties broken by frame key.
pub fn top_entries(tree: &StackTree) -> Result<Vec<TopEntry>, AggregationError> {
    let mut entries: FxIndexMap<FrameKey, TopEntry> = FxIndexMap::default();
    for node in tree.nodes() {
        let (Some(key), Some(frame)) = (&node.key, &node.frame) else {
            continue;
        };
        match entries.get_mut(key) {
            Some(entry) => {
                entry.flat = checked_add(entry.flat, node.flat, "summing top flat values")?;
                entry.cumulative =
                    checked_add(entry.cumulative, node.cumulative, "summing top cumulative values")?;
                entry.diff = checked_add(entry.diff, node.diff, "summing top diff values")?;
                if frame.location_id < entry.frame.location_id {
                    entry.frame = frame.clone();
                }
            }
            None => {
                entries.insert(
                    key.clone(),
                    TopEntry {
                        key: key.clone(),
                        frame: frame.clone(),
                        flat: node.flat,
                        cumulative: node.cumulative,
                        diff: node.diff,
                    },
                );
            }
        }
    }
    let mut entries: Vec<TopEntry> = entries.into_values().collect();
    entries.sort_by(|a, b| {
        (Reverse(a.cumulative), &a.key).cmp(&(Reverse(b.cumulative), &b.key))
    });
    Ok(entries)
}
